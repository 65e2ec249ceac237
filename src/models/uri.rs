//! URL normalization for prepared requests.

use crate::errors::{HttpError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// Characters left alone when re-quoting, on top of the unreserved set.
const REQUOTE_SAFE_WITHOUT_PERCENT: &AsciiSet = &UNRESERVED
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'?')
    .remove(b'@')
    .remove(b'[')
    .remove(b']');

const REQUOTE_SAFE: &AsciiSet = &REQUOTE_SAFE_WITHOUT_PERCENT.remove(b'%');

/// Splits an absolute URL into its parts without normalizing them.
#[derive(Debug, Default, PartialEq, Eq)]
struct UrlParts<'a> {
    scheme: &'a str,
    userinfo: Option<&'a str>,
    host: &'a str,
    port: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

fn split_url(url: &str) -> Option<UrlParts<'_>> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }

    let (rest, fragment) = match rest.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (rest, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((r, q)) => (r, Some(q)),
        None => (rest, None),
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, authority),
    };

    let (host, port) = if let Some(stripped) = hostport.strip_prefix('[') {
        // IPv6 literal
        match stripped.split_once(']') {
            Some((_, after)) => {
                let host = &hostport[..hostport.len() - after.len()];
                (host, after.strip_prefix(':'))
            }
            None => (hostport, None),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };

    Some(UrlParts {
        scheme,
        userinfo,
        host,
        port,
        path,
        query,
        fragment,
    })
}

/// Normalizes a request URL and appends the encoded `params`.
///
/// URLs that carry a colon but do not start with `http` are returned verbatim so
/// non HTTP schemes reach their adapter untouched.
pub(crate) fn prepare_url(url: &str, params: &[(String, String)]) -> Result<String> {
    let url = url.trim_start();

    if url.contains(':') && !url.to_ascii_lowercase().starts_with("http") {
        return Ok(url.to_string());
    }

    let parts = split_url(url).ok_or_else(|| HttpError::MissingSchema(url.to_string()))?;

    if parts.host.is_empty() {
        return Err(HttpError::invalid_url(url, "No host supplied"));
    }

    let host = if !parts.host.is_ascii() {
        match url::Host::parse(parts.host) {
            Ok(url::Host::Domain(domain)) => domain,
            _ => return Err(HttpError::invalid_url(url, "URL has an invalid label.")),
        }
    } else if parts.host.starts_with('*') || parts.host.starts_with('.') {
        return Err(HttpError::invalid_url(url, "URL has an invalid label."));
    } else {
        parts.host.to_string()
    };

    let mut netloc = String::new();
    if let Some(userinfo) = parts.userinfo {
        netloc.push_str(userinfo);
        netloc.push('@');
    }
    netloc.push_str(&host);
    if let Some(port) = parts.port.filter(|p| !p.is_empty()) {
        if port.parse::<u16>().is_err() {
            return Err(HttpError::invalid_url(url, format!("invalid port {port:?}")));
        }
        netloc.push(':');
        netloc.push_str(port);
    }

    let path = if parts.path.is_empty() { "/" } else { parts.path };

    let mut query = parts.query.unwrap_or_default().to_string();
    let encoded = encode_pairs(params);
    if !encoded.is_empty() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&encoded);
    }

    let mut out = format!("{}://{}{}", parts.scheme, netloc, path);
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    if let Some(fragment) = parts.fragment {
        out.push('#');
        out.push_str(fragment);
    }

    let out = requote_uri(&out);
    url::Url::parse(&out).map_err(|e| HttpError::invalid_url(url, e.to_string()))?;
    Ok(out)
}

/// `application/x-www-form-urlencoded` serialization of ordered pairs.
pub(crate) fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Decodes percent escapes of unreserved characters, leaving every other escape as is.
///
/// Returns `None` when an escape is malformed.
fn unquote_unreserved(uri: &str) -> Option<String> {
    let mut parts = uri.split('%');
    let mut out = String::with_capacity(uri.len());
    out.push_str(parts.next().unwrap_or_default());

    for part in parts {
        let hex = part.get(..2)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let c = char::from(u8::from_str_radix(hex, 16).ok()?);
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
            out.push(c);
            out.push_str(&part[2..]);
        } else {
            out.push('%');
            out.push_str(part);
        }
    }
    Some(out)
}

/// Re-quotes a URI so that it is fully and consistently percent-encoded.
pub fn requote_uri(uri: &str) -> String {
    match unquote_unreserved(uri) {
        Some(unquoted) => utf8_percent_encode(&unquoted, REQUOTE_SAFE).to_string(),
        // Malformed escapes: quote the stray percent signs as well.
        None => utf8_percent_encode(uri, REQUOTE_SAFE_WITHOUT_PERCENT).to_string(),
    }
}

/// Percent-decodes URL embedded credentials.
pub(crate) fn unquote(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
