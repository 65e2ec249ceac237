//! In-memory cookie jar.
//!
//! A **cookie jar** holds the cookies of a session, or the transient set of
//! cookies attached to one prepared request. The session keeps its long-lived
//! jar behind a [`CookieJarHandle`]; a prepared request owns a plain copy.
//!
//! ## Parsing behavior
//! - Accepts multiple `Set-Cookie` headers.
//! - Attributes handled: `Path`, `Domain` (leading dot stripped), `Expires`
//!   (stored as raw string), `Max-Age` (only `<= 0` is acted upon, by removing
//!   the cookie), `SameSite`, `Secure`, `HttpOnly`.
//! - Without `Domain` the cookie is bound to the request host only.
//! - If `Path` is absent, a default path is derived from the request URL.
//! - Last write wins for cookies sharing name, domain and path.

use super::cookie::domain_matches;
use crate::cookies::Cookie;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use url::Url;

/// A handle to the session cookie jar. Read lock for queries, write lock for
/// extraction and merges.
pub type CookieJarHandle = Arc<RwLock<CookieJar>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a jar into a shareable handle.
    pub fn into_handle(self) -> CookieJarHandle {
        Arc::new(RwLock::new(self))
    }

    /// Sets a cookie that is sent to every host.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.insert(Cookie::new(name, value));
    }

    /// Inserts a cookie, replacing one with the same name, domain and path.
    pub fn insert(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| c.same_slot(&cookie)) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Returns the value of the first cookie named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Removes every cookie named `name`.
    pub fn remove(&mut self, name: &str) {
        self.cookies.retain(|c| c.name != name);
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// Copies every cookie of `other` into this jar. Cookies of `other` win.
    pub fn merge(&mut self, other: &CookieJar) {
        for cookie in &other.cookies {
            self.insert(cookie.clone());
        }
    }

    /// Stores cookies found in the `Set-Cookie` headers of a response to `url`.
    pub fn extract(&mut self, url: &Url, headers: &HeaderMap) {
        let host = url.host_str().unwrap_or_default().to_string();
        let default_path = url
            .path()
            .rsplit_once('/')
            .map_or("/", |(a, _)| if a.is_empty() { "/" } else { a })
            .to_string();

        for header in headers.get_all(http::header::SET_COOKIE) {
            let Ok(header_str) = header.to_str() else {
                continue;
            };
            let Some(mut cookie) = parse_set_cookie(header_str) else {
                continue;
            };

            match &cookie.domain {
                None => {
                    cookie.domain = Some(host.clone());
                    cookie.host_only = true;
                }
                Some(domain) if !domain_matches(&host, domain) => {
                    log::debug!("rejecting cookie {} for {domain} set by {host}", cookie.name);
                    continue;
                }
                Some(_) => {}
            }
            if cookie.path.is_none() {
                cookie.path = Some(default_path.clone());
            }

            if cookie_expired(header_str) {
                self.cookies.retain(|c| !c.same_slot(&cookie));
                continue;
            }
            self.insert(cookie);
        }
    }

    /// Returns the `Cookie` request header value to send to `url`, if any.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let header = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieJar {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut jar = CookieJar::new();
        for (k, v) in iter {
            jar.set(k, v);
        }
        jar
    }
}

fn parse_set_cookie(header: &str) -> Option<Cookie> {
    let (name, rest) = header.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut parts = rest.split(';');
    let mut cookie = Cookie::new(name, parts.next().unwrap_or_default().trim());

    for part in parts {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim();
            match k.trim().to_ascii_lowercase().as_str() {
                "path" => cookie.path = Some(v.to_string()),
                "domain" if !v.is_empty() => {
                    cookie.domain = Some(v.trim_start_matches('.').to_ascii_lowercase())
                }
                "expires" => cookie.expires = Some(v.to_string()),
                "samesite" => {
                    // normalize to "Lax" | "Strict" | "None"
                    cookie.same_site = Some(if v.eq_ignore_ascii_case("lax") {
                        "Lax".to_string()
                    } else if v.eq_ignore_ascii_case("strict") {
                        "Strict".to_string()
                    } else if v.eq_ignore_ascii_case("none") {
                        "None".to_string()
                    } else {
                        v.to_string()
                    });
                }
                _ => {}
            }
        } else if part.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if part.eq_ignore_ascii_case("httponly") {
            cookie.http_only = true;
        }
    }

    Some(cookie)
}

fn cookie_expired(header: &str) -> bool {
    header.split(';').skip(1).any(|part| {
        part.split_once('=').is_some_and(|(k, v)| {
            k.trim().eq_ignore_ascii_case("max-age")
                && v.trim().parse::<i64>().is_ok_and(|age| age <= 0)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::SET_COOKIE;
    use http::HeaderValue;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(SET_COOKIE, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn extract_and_serialize() {
        let mut jar = CookieJar::new();
        let url = Url::parse("http://example.com/app/login").unwrap();
        jar.extract(&url, &headers(&["sid=abc; Path=/", "theme=dark"]));

        assert_eq!(jar.len(), 2);
        // theme has the default path /app, so it is not sent to /
        let root = Url::parse("http://example.com/").unwrap();
        assert_eq!(jar.cookie_header(&root).as_deref(), Some("sid=abc"));

        let app = Url::parse("http://example.com/app/x").unwrap();
        assert_eq!(jar.cookie_header(&app).as_deref(), Some("sid=abc; theme=dark"));
    }

    #[test]
    fn host_only_cookies_do_not_leak_to_other_hosts() {
        let mut jar = CookieJar::new();
        let url = Url::parse("http://a.example.com/").unwrap();
        jar.extract(&url, &headers(&["sid=abc; Path=/"]));

        assert!(jar
            .cookie_header(&Url::parse("http://b.example.com/").unwrap())
            .is_none());
    }

    #[test]
    fn domain_attribute_covers_subdomains() {
        let mut jar = CookieJar::new();
        let url = Url::parse("http://a.example.com/").unwrap();
        jar.extract(&url, &headers(&["sid=abc; Domain=.example.com; Path=/"]));

        let other = Url::parse("http://b.example.com/").unwrap();
        assert_eq!(jar.cookie_header(&other).as_deref(), Some("sid=abc"));
    }

    #[test]
    fn last_write_wins_and_max_age_zero_removes() {
        let mut jar = CookieJar::new();
        let url = Url::parse("http://example.com/").unwrap();
        jar.extract(&url, &headers(&["sid=one; Path=/"]));
        jar.extract(&url, &headers(&["sid=two; Path=/"]));
        assert_eq!(jar.get("sid"), Some("two"));

        jar.extract(&url, &headers(&["sid=gone; Path=/; Max-Age=0"]));
        assert!(jar.is_empty());
    }

    #[test]
    fn merge_prefers_other_jar() {
        let mut base: CookieJar = [("a", "1"), ("b", "2")].into_iter().collect();
        let other: CookieJar = [("b", "3")].into_iter().collect();
        base.merge(&other);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("3"));
    }

    #[test]
    fn attributes_are_parsed() {
        let mut jar = CookieJar::new();
        let url = Url::parse("https://example.com/").unwrap();
        jar.extract(
            &url,
            &headers(&["sid=abc; Secure; HttpOnly; SameSite=strict; Expires=Wed, 21 Oct 2037 07:28:00 GMT"]),
        );
        let c = jar.iter().next().unwrap();
        assert!(c.secure);
        assert!(c.http_only);
        assert_eq!(c.same_site.as_deref(), Some("Strict"));
        assert!(c.expires.is_some());
    }

    #[test]
    fn foreign_domain_attribute_is_rejected() {
        let mut jar = CookieJar::new();
        let url = Url::parse("http://evil.test/").unwrap();
        jar.extract(&url, &headers(&["sid=evil; Domain=victim.test; Path=/"]));

        assert!(jar.is_empty());
        assert!(jar
            .cookie_header(&Url::parse("http://victim.test/").unwrap())
            .is_none());
    }
}
