/*
 * h1.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length, chunked
//! or read-until-close).

use bytes::Buf;
use bytes::BytesMut;
use http::{HeaderMap, Method, StatusCode, Version};
use std::borrow::Cow;
use std::io;

/// Longest status line or header line accepted.
const MAX_LINE: usize = 64 * 1024;

/// Callback for HTTP/1.1 response events.
pub trait H1ResponseHandler {
    fn status(&mut self, version: Version, code: u16, reason: &str);
    /// `value` is raw field content; obs-text bytes are passed through.
    fn header(&mut self, name: &str, value: &[u8]);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, _name: &str, _value: &[u8]) {}
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    StatusLine,
    Headers,
    /// Headers done; caller must call `set_body_mode()`.
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl BodyMode {
    /// RFC 9112 §6.3 message body length for a response to `method`.
    pub fn for_response(method: &Method, status: StatusCode, headers: &HeaderMap) -> BodyMode {
        if *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || (*method == Method::CONNECT && status.is_success())
        {
            return BodyMode::Empty;
        }
        let chunked = headers
            .get_all(http::header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .last()
            .map_or(false, |last| last.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return BodyMode::Chunked;
        }
        match headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => BodyMode::Empty,
            Some(n) => BodyMode::Length(n),
            None => BodyMode::UntilClose,
        }
    }
}

/// Push parser for HTTP/1.1 responses. Feed bytes via `receive`; handler is invoked as complete tokens are parsed.
pub struct ResponseParser {
    state: ParseState,
    remaining: u64,
    mode: BodyMode,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            remaining: 0,
            mode: BodyMode::Empty,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn mode(&self) -> BodyMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.remaining = 0;
        self.mode = BodyMode::Empty;
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Take one CRLF-terminated line (without the CRLF), or None if incomplete.
    fn take_line(buf: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        match Self::find_crlf(buf) {
            Some(n) => {
                let mut line = buf.split_to(n + 2);
                line.truncate(n);
                Ok(Some(line))
            }
            None if buf.len() > MAX_LINE => Err(invalid("line too long")),
            None => Ok(None),
        }
    }

    /// Consume and parse as much as possible from buf. Partial data remains in buf.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> io::Result<()> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let line = match Self::take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let (version, code, reason) = parse_status_line(&line)?;
                    handler.status(version, code, &reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line = match Self::take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    let (name, value) = parse_header_line(&line)?;
                    handler.header(name, value);
                }
                ParseState::Body => {
                    if self.mode == BodyMode::UntilClose {
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                        return Ok(());
                    }
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        self.finish(handler);
                        return Ok(());
                    }
                }
                ParseState::ChunkSize => {
                    let line = match Self::take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let text = std::str::from_utf8(&line).map_err(|_| invalid("invalid chunk size"))?;
                    let hex = text.split(';').next().unwrap_or(text).trim();
                    self.remaining =
                        u64::from_str_radix(hex, 16).map_err(|_| invalid("invalid chunk size"))?;
                    self.state = if self.remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(invalid("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let line = match Self::take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        self.finish(handler);
                        return Ok(());
                    }
                    let (name, value) = parse_header_line(&line)?;
                    handler.trailer(name, value);
                }
                ParseState::HeadersComplete | ParseState::Idle => return Ok(()),
            }
        }
        Ok(())
    }

    fn finish<H: H1ResponseHandler>(&mut self, handler: &mut H) {
        handler.complete();
        self.state = ParseState::Idle;
    }

    /// Called after headers are received (state HeadersComplete).
    pub fn set_body_mode<H: H1ResponseHandler>(&mut self, mode: BodyMode, handler: &mut H) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.mode = mode;
        match mode {
            BodyMode::Empty => self.finish(handler),
            BodyMode::Length(n) => {
                self.remaining = n;
                self.state = ParseState::Body;
            }
            BodyMode::Chunked => self.state = ParseState::ChunkSize,
            BodyMode::UntilClose => self.state = ParseState::Body,
        }
    }

    /// The peer closed the stream. Completes a read-until-close body; anything else is truncation.
    pub fn eof<H: H1ResponseHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        match (self.state, self.mode) {
            (ParseState::Idle, _) => Ok(()),
            (ParseState::Body, BodyMode::UntilClose) => {
                self.finish(handler);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response was complete",
            )),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn trim_ows(mut b: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = b {
        b = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = b {
        b = rest;
    }
    b
}

/// `HTTP/1.1 200 OK` or `HTTP/1.1 200`. The reason phrase may carry obs-text.
fn parse_status_line(line: &[u8]) -> io::Result<(Version, u16, Cow<'_, str>)> {
    let mut parts = line.splitn(3, |b| *b == b' ');
    let version = match parts.next() {
        Some(b"HTTP/1.1") => Version::HTTP_11,
        Some(b"HTTP/1.0") => Version::HTTP_10,
        _ => return Err(invalid("not an HTTP/1.x response")),
    };
    let code = parts
        .next()
        .filter(|c| c.len() == 3)
        .and_then(|c| std::str::from_utf8(c).ok())
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..1000).contains(c))
        .ok_or_else(|| invalid("invalid status code"))?;
    let reason = String::from_utf8_lossy(trim_ows(parts.next().unwrap_or(b"")));
    Ok((version, code, reason))
}

/// Split `name: value`. The name must be ASCII; the value is returned as raw bytes.
fn parse_header_line(line: &[u8]) -> io::Result<(&str, &[u8])> {
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| invalid("header line without colon"))?;
    let name = std::str::from_utf8(trim_ows(&line[..colon]))
        .ok()
        .filter(|n| !n.is_empty() && n.is_ascii())
        .ok_or_else(|| invalid("invalid header name"))?;
    Ok((name, trim_ows(&line[colon + 1..])))
}
