/*
 * multipart.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Snekwest, an HTTP client engine.
 *
 * Snekwest is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Snekwest is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Snekwest.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Build multipart/form-data bodies (RFC 7578) from scalar fields and file parts.

use bytes::Bytes;
use rand::Rng;

const BOUNDARY_LEN: usize = 32;

/// One multipart part: a scalar field or a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        content: Bytes,
        /// Explicit media type; guessed from the filename extension when absent.
        content_type: Option<String>,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Part::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Part::File {
            name: name.into(),
            filename: filename.into(),
            content: content.into(),
            content_type: None,
        }
    }

    /// Set the media type of a file part. No-op on text parts.
    pub fn with_content_type(mut self, media_type: impl Into<String>) -> Self {
        if let Part::File { content_type, .. } = &mut self {
            *content_type = Some(media_type.into());
        }
        self
    }

    fn content(&self) -> &[u8] {
        match self {
            Part::Text { value, .. } => value.as_bytes(),
            Part::File { content, .. } => content,
        }
    }
}

/// Media type for a file part: explicit, else by extension, else application/octet-stream.
pub fn media_type_for(filename: &str, explicit: Option<&str>) -> String {
    match explicit {
        Some(t) => t.to_string(),
        None => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Random boundary token (hex) not occurring in any part's content.
pub fn choose_boundary(parts: &[Part]) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let token: String = (0..BOUNDARY_LEN)
            .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
            .collect();
        if !parts.iter().any(|p| contains(p.content(), token.as_bytes())) {
            return token;
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Encode `parts` with `boundary`. Returns the body bytes.
pub fn encode(parts: &[Part], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        match part {
            Part::Text { name, value } => {
                append_header(
                    &mut out,
                    "Content-Disposition",
                    &format!("form-data; name=\"{}\"", quote(name)),
                );
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content,
                content_type,
            } => {
                append_header(
                    &mut out,
                    "Content-Disposition",
                    &format!(
                        "form-data; name=\"{}\"; filename=\"{}\"",
                        quote(name),
                        quote(filename)
                    ),
                );
                append_header(
                    &mut out,
                    "Content-Type",
                    &media_type_for(filename, content_type.as_deref()),
                );
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(content);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\r\n");
    out
}

fn append_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Escape a quoted-string parameter (backslash, quote; CR/LF percent-encoded per WHATWG).
fn quote(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_text_and_file_parts() {
        let parts = vec![
            Part::text("title", "hello"),
            Part::file("upload", "notes.txt", &b"line one\nline two"[..]),
        ];
        let body = encode(&parts, "XYZ");
        let s = String::from_utf8(body).unwrap();
        assert_eq!(
            s,
            "--XYZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nline one\nline two\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn media_type_guess_and_override() {
        assert_eq!(media_type_for("a.png", None), "image/png");
        assert_eq!(media_type_for("a.unknownext", None), "application/octet-stream");
        assert_eq!(media_type_for("a.png", Some("image/x-custom")), "image/x-custom");
    }

    #[test]
    fn boundary_avoids_content() {
        let parts = vec![Part::text("a", "b")];
        let b = choose_boundary(&parts);
        assert_eq!(b.len(), BOUNDARY_LEN);
        assert!(b.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote("a\"b\\c"), "a%22b\\\\c");
    }
}
