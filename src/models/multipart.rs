//! `multipart/form-data` encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::path::Path;

/// One file field of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub filename: Option<String>,
    pub content: Bytes,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl FilePart {
    /// Bare content. The field name doubles as the file name when encoded.
    pub fn new(content: impl Into<Bytes>) -> Self {
        FilePart {
            filename: None,
            content: content.into(),
            content_type: None,
            headers: Vec::new(),
        }
    }

    /// Reads a file from disk, guessing its content type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let content_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(FilePart {
            filename,
            content: Bytes::from(content),
            content_type,
            headers: Vec::new(),
        })
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A random 32 character hex boundary.
pub(crate) fn choose_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn escape_param(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn write_part(
    out: &mut BytesMut,
    boundary: &str,
    name: &str,
    filename: Option<&str>,
    content_type: Option<&str>,
    headers: &[(String, String)],
    data: &[u8],
) {
    out.put_slice(format!("--{boundary}\r\n").as_bytes());
    let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", escape_param(name));
    if let Some(filename) = filename {
        disposition.push_str(&format!("; filename=\"{}\"", escape_param(filename)));
    }
    out.put_slice(disposition.as_bytes());
    out.put_slice(b"\r\n");
    if let Some(ct) = content_type {
        out.put_slice(format!("Content-Type: {ct}\r\n").as_bytes());
    }
    for (k, v) in headers {
        out.put_slice(format!("{k}: {v}\r\n").as_bytes());
    }
    out.put_slice(b"\r\n");
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

/// Encodes form fields followed by files. Returns the body and its content type.
pub(crate) fn encode_multipart(
    fields: &[(String, String)],
    files: &[(String, FilePart)],
) -> (Bytes, String) {
    encode_with_boundary(fields, files, &choose_boundary())
}

fn encode_with_boundary(
    fields: &[(String, String)],
    files: &[(String, FilePart)],
    boundary: &str,
) -> (Bytes, String) {
    let mut out = BytesMut::new();

    for (name, value) in fields {
        write_part(&mut out, boundary, name, None, None, &[], value.as_bytes());
    }

    for (name, part) in files {
        let filename = part.filename.as_deref().unwrap_or(name);
        write_part(
            &mut out,
            boundary,
            name,
            Some(filename),
            part.content_type.as_deref(),
            &part.headers,
            &part.content,
        );
    }

    out.put_slice(format!("--{boundary}--\r\n").as_bytes());
    (out.freeze(), format!("multipart/form-data; boundary={boundary}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_32_hex_chars() {
        let b = choose_boundary();
        assert_eq!(b.len(), 32);
        assert!(b.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fields_come_before_files() {
        let fields = vec![("title".to_string(), "hello".to_string())];
        let files = vec![(
            "upload".to_string(),
            FilePart::new("data")
                .filename("a.txt")
                .content_type("text/plain")
                .header("X-Part", "1"),
        )];
        let (body, ct) = encode_with_boundary(&fields, &files, "BOUNDARY");

        assert_eq!(ct, "multipart/form-data; boundary=BOUNDARY");
        let expected = "--BOUNDARY\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n\
            --BOUNDARY\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            X-Part: 1\r\n\r\ndata\r\n\
            --BOUNDARY--\r\n";
        assert_eq!(body, Bytes::from(expected));
    }

    #[test]
    fn bare_content_uses_field_name_as_filename() {
        let files = vec![("report".to_string(), FilePart::new("x"))];
        let (body, _) = encode_with_boundary(&[], &files, "B");
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("name=\"report\"; filename=\"report\""));
        assert!(!text.contains("Content-Type"));
    }

    #[test]
    fn from_path_guesses_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        std::fs::write(&path, b"{}").unwrap();

        let part = FilePart::from_path(&path).unwrap();
        assert_eq!(part.filename.as_deref(), Some("notes.json"));
        assert_eq!(part.content_type.as_deref(), Some("application/json"));
        assert_eq!(part.content, Bytes::from_static(b"{}"));
    }
}
