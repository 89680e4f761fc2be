//! Minimal `multipart/form-data` codec for the frame upload body.
//!
//! Only what the relay protocol needs: one file part plus optional short text
//! fields, in both directions.

use anyhow::{anyhow, Result};

use super::request::find;

/// Form field carrying the image.
pub const FILE_FIELD: &str = "file";
/// Optional form field carrying a per-request confidence threshold.
pub const CONFIDENCE_FIELD: &str = "confidence";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl FormPart {
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or("").trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(anyhow!(
            "expected multipart/form-data body, got '{}'",
            mime
        ));
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| anyhow!("multipart content type is missing a boundary"))
}

/// Split a form body into its parts.
pub fn parse_form(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let mut pos = find(body, &delimiter).ok_or_else(|| anyhow!("multipart boundary not found"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            break;
        }
        let rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| anyhow!("malformed multipart delimiter line"))?;
        let header_end =
            find(rest, b"\r\n\r\n").ok_or_else(|| anyhow!("multipart part headers truncated"))?;
        let head = String::from_utf8_lossy(&rest[..header_end]);
        let content = &rest[header_end + 4..];
        let data_end =
            find(content, &closing).ok_or_else(|| anyhow!("multipart part is not terminated"))?;

        parts.push(parse_part_headers(&head, content[..data_end].to_vec())?);

        let consumed = body.len() - content.len() + data_end + closing.len();
        pos = consumed;
        if pos > body.len() {
            return Err(anyhow!("multipart body truncated"));
        }
    }

    Ok(parts)
}

fn parse_part_headers(head: &str, data: Vec<u8>) -> Result<FormPart> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_lowercase().as_str() {
            "content-disposition" => {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim() {
                            "name" => name = Some(v),
                            "filename" => filename = Some(v),
                            _ => {}
                        }
                    }
                }
            }
            "content-type" => content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Ok(FormPart {
        name: name.ok_or_else(|| anyhow!("multipart part without a name"))?,
        filename,
        content_type,
        data,
    })
}

/// Incremental builder for an outgoing form body.
pub struct FormBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl FormBuilder {
    pub fn new() -> Self {
        Self {
            boundary: format!("----pyrovision{:016x}", rand::random::<u64>()),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            name
        ));
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n",
            name, filename, content_type
        ));
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Close the form. Returns the `Content-Type` header value and the body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }

    fn open_part(&mut self, headers: &str) {
        self.body
            .extend_from_slice(format!("--{}\r\n{}\r\n", self.boundary, headers).as_bytes());
    }
}

impl Default for FormBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_output_parses_back() -> Result<()> {
        let payload = [0xFF, 0xD8, b'\r', b'\n', b'-', b'-', 0x00, 0xFF, 0xD9];
        let (content_type, body) = FormBuilder::new()
            .text(CONFIDENCE_FIELD, "0.55")
            .file(FILE_FIELD, "frame.jpg", "image/jpeg", &payload)
            .finish();
        let boundary = boundary_from_content_type(&content_type)?;
        let parts = parse_form(&body, &boundary)?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, CONFIDENCE_FIELD);
        assert_eq!(parts[0].text(), Some("0.55"));
        assert!(!parts[0].is_file());
        assert_eq!(parts[1].name, FILE_FIELD);
        assert_eq!(parts[1].filename.as_deref(), Some("frame.jpg"));
        assert_eq!(parts[1].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(parts[1].data, payload);
        Ok(())
    }

    #[test]
    fn parses_curl_style_body_with_preamble() -> Result<()> {
        let body = b"preamble\r\n--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\n\
Content-Type: image/png\r\n\r\n\
PNGDATA\r\n--XyZ--\r\n";
        let parts = parse_form(body, "XyZ")?;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].data, b"PNGDATA");
        Ok(())
    }

    #[test]
    fn quoted_boundary_is_accepted() -> Result<()> {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc 123\"")?,
            "abc 123"
        );
        Ok(())
    }

    #[test]
    fn non_multipart_content_type_is_rejected() {
        assert!(boundary_from_content_type("image/jpeg").is_err());
        assert!(boundary_from_content_type("multipart/form-data").is_err());
    }

    #[test]
    fn unterminated_part_is_rejected() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc";
        assert!(parse_form(body, "b").is_err());
    }
}
