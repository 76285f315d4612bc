//! Minimal `multipart/form-data` reader for the `/predict` upload.
//!
//! Only what a browser form or `curl -F` sends: named parts, an optional
//! filename, an optional per-part content type. No nested multipart, no
//! transfer encodings.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extract `boundary=` from a `multipart/form-data` content type.
pub(crate) fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| anyhow!("multipart body has no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart boundary line"));
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| anyhow!("multipart part is missing its header terminator"))?;
        let headers = parse_headers(&body[pos..header_end])?;
        let data_start = header_end + 4;
        let data_end = find(body, &closing, data_start)
            .ok_or_else(|| anyhow!("multipart body is missing its closing boundary"))?;

        let disposition = headers
            .get("content-disposition")
            .ok_or_else(|| anyhow!("multipart part has no content-disposition"))?;
        let name = disposition_param(disposition, "name")
            .ok_or_else(|| anyhow!("multipart part has no name"))?;
        parts.push(Part {
            name,
            filename: disposition_param(disposition, "filename"),
            content_type: headers.get("content-type").cloned(),
            data: body[data_start..data_end].to_vec(),
        });
        pos = data_end + closing.len();
    }
    Ok(parts)
}

fn parse_headers(raw: &[u8]) -> Result<HashMap<String, String>> {
    let text = std::str::from_utf8(raw).map_err(|_| anyhow!("multipart headers are not UTF-8"))?;
    let mut headers = HashMap::new();
    for line in text.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    Ok(headers)
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    disposition
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(boundary: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        body.extend_from_slice(&[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x00]);
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"x\"\r\n\r\n12.5");
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn reads_boundary_from_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----abc123").as_deref(),
            Some("----abc123")
        );
        assert_eq!(
            boundary("Multipart/Form-Data; charset=utf-8; boundary=\"q q\"").as_deref(),
            Some("q q")
        );
        assert_eq!(boundary("application/json"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_file_and_text_parts() {
        let parts = parse(&body("XyZ"), "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].filename.as_deref(), Some("a.png"));
        assert_eq!(parts[0].content_type.as_deref(), Some("image/png"));
        // CRLF inside binary data survives
        assert_eq!(parts[0].data, vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x00]);
        assert_eq!(parts[1].name, "x");
        assert_eq!(parts[1].data, b"12.5");
    }

    #[test]
    fn rejects_truncated_body() {
        let mut truncated = body("XyZ");
        truncated.truncate(60);
        assert!(parse(&truncated, "XyZ").is_err());
        assert!(parse(b"no boundary here", "XyZ").is_err());
    }
}
