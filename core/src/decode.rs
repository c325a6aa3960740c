/*
 * decode.rs
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

//! Incremental `Content-Encoding` decoding (gzip, deflate). Unknown codings pass through.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    Gzip,
    Deflate,
}

impl Coding {
    fn from_token(token: &str) -> Option<Option<Coding>> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Some(Coding::Gzip)),
            "deflate" => Some(Some(Coding::Deflate)),
            "identity" | "" => Some(None),
            _ => None,
        }
    }
}

/// Codings listed in `Content-Encoding`, in the order they were applied.
/// Empty when the body is identity-coded or uses a coding we do not know.
pub fn codings(headers: &HeaderMap) -> Vec<Coding> {
    let mut out = Vec::new();
    for value in headers.get_all(CONTENT_ENCODING) {
        let Ok(value) = value.to_str() else {
            return Vec::new();
        };
        for token in value.split(',') {
            match Coding::from_token(token) {
                Some(Some(c)) => out.push(c),
                Some(None) => {}
                None => return Vec::new(),
            }
        }
    }
    out
}

enum Stage {
    Gzip(GzDecoder<Vec<u8>>),
    /// zlib-wrapped or raw deflate, decided from the first two bytes.
    Deflate(Option<DeflateStage>, Vec<u8>),
}

enum DeflateStage {
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

fn looks_like_zlib(b: &[u8]) -> bool {
    b[0] & 0x0f == 8 && (u16::from(b[0]) << 8 | u16::from(b[1])) % 31 == 0
}

impl DeflateStage {
    fn write(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            DeflateStage::Zlib(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            DeflateStage::Raw(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            DeflateStage::Zlib(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            DeflateStage::Raw(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }
}

impl Stage {
    fn new(coding: Coding) -> Stage {
        match coding {
            Coding::Gzip => Stage::Gzip(GzDecoder::new(Vec::new())),
            Coding::Deflate => Stage::Deflate(None, Vec::new()),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Stage::Gzip(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Deflate(Some(stage), _) => stage.write(data),
            Stage::Deflate(pending_stage @ None, pending) => {
                pending.extend_from_slice(data);
                if pending.len() < 2 {
                    return Ok(Vec::new());
                }
                let mut stage = if looks_like_zlib(pending) {
                    DeflateStage::Zlib(ZlibDecoder::new(Vec::new()))
                } else {
                    DeflateStage::Raw(DeflateDecoder::new(Vec::new()))
                };
                let out = stage.write(&std::mem::take(pending))?;
                *pending_stage = Some(stage);
                Ok(out)
            }
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Stage::Gzip(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Deflate(Some(stage), _) => stage.finish(),
            Stage::Deflate(None, pending) if pending.is_empty() => Ok(Vec::new()),
            Stage::Deflate(None, _) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated deflate stream",
            )),
        }
    }
}

/// Streaming decoder for one response body.
pub struct Decoder {
    /// Innermost coding last: stages run in reverse order of application.
    stages: Vec<Stage>,
    received: bool,
}

impl Decoder {
    pub fn new(codings: &[Coding]) -> Decoder {
        Decoder {
            stages: codings.iter().rev().map(|c| Stage::new(*c)).collect(),
            received: false,
        }
    }

    pub fn for_headers(headers: &HeaderMap) -> Decoder {
        Decoder::new(&codings(headers))
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    /// Decode the next piece of body. May return an empty buffer while the decoder waits for more input.
    pub fn decode(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        if self.stages.is_empty() {
            return Ok(Bytes::copy_from_slice(chunk));
        }
        self.received |= !chunk.is_empty();
        let mut data = chunk.to_vec();
        for stage in &mut self.stages {
            data = stage.write(&data)?;
        }
        Ok(Bytes::from(data))
    }

    /// Flush at end of body. Fails if the compressed stream was truncated.
    /// An empty body (HEAD, 204, 304) decodes to nothing.
    pub fn finish(&mut self) -> io::Result<Bytes> {
        if !self.received {
            return Ok(Bytes::new());
        }
        let mut carry: Vec<u8> = Vec::new();
        for stage in &mut self.stages {
            let mut out = if carry.is_empty() {
                Vec::new()
            } else {
                stage.write(&carry)?
            };
            out.extend(stage.finish()?);
            carry = out;
        }
        Ok(Bytes::from(carry))
    }
}

/// Decode a complete body in one go.
pub fn decode_all(headers: &HeaderMap, body: &[u8]) -> io::Result<Bytes> {
    let mut decoder = Decoder::for_headers(headers);
    if decoder.is_identity() || body.is_empty() {
        return Ok(Bytes::copy_from_slice(body));
    }
    let mut out = decoder.decode(body)?.to_vec();
    out.extend_from_slice(&decoder.finish()?);
    Ok(Bytes::from(out))
}
