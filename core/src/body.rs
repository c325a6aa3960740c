/*
 * body.rs
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

//! Request body encoding: raw, form-urlencoded, multipart/form-data or JSON.
//!
//! Exactly one mode is selected from the request's `data` / `json` / `files` attributes.
//! Form pairs may accompany files, in which case they become the leading scalar fields
//! of the multipart body. Every other combination is `InvalidRequestBody`.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::multipart::{self, Part};
use crate::request::Data;
use crate::uri;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Encoded body plus the Content-Type the encoder would set by default.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Selected body mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Raw(Bytes),
    Form(Vec<(String, String)>),
    Multipart(Vec<Part>),
    Json(serde_json::Value),
}

impl Body {
    /// Pick the body mode from the three body-producing attributes.
    pub fn select(
        data: Option<Data>,
        json: Option<std::result::Result<serde_json::Value, serde_json::Error>>,
        files: Vec<Part>,
    ) -> Result<Body> {
        match (data, json, files.is_empty()) {
            (None, None, true) => Ok(Body::None),
            (None, Some(json), true) => json.map(Body::Json).map_err(Error::JsonEncode),
            (Some(_), Some(_), _) | (None, Some(_), false) => Err(Error::InvalidRequestBody(
                "json cannot be combined with data or files".into(),
            )),
            (Some(Data::Raw(bytes)), None, true) => Ok(Body::Raw(bytes)),
            (Some(Data::Raw(_)), None, false) => Err(Error::InvalidRequestBody(
                "raw data cannot be combined with files".into(),
            )),
            (Some(Data::Form(pairs)), None, true) => Ok(Body::Form(pairs)),
            (Some(Data::Form(pairs)), None, false) => {
                let mut parts: Vec<Part> = pairs
                    .into_iter()
                    .map(|(k, v)| Part::text(k, v))
                    .collect();
                parts.extend(files);
                Ok(Body::Multipart(parts))
            }
            (None, None, false) => Ok(Body::Multipart(files)),
        }
    }

    /// Serialize the body. `None` yields no body at all.
    pub fn encode(self) -> Result<Option<EncodedBody>> {
        let encoded = match self {
            Body::None => return Ok(None),
            Body::Raw(bytes) => EncodedBody {
                bytes,
                content_type: None,
            },
            Body::Form(pairs) => EncodedBody {
                bytes: Bytes::from(uri::encode_form_pairs(&pairs)),
                content_type: Some(FORM_CONTENT_TYPE.to_string()),
            },
            Body::Multipart(parts) => {
                let boundary = multipart::choose_boundary(&parts);
                EncodedBody {
                    bytes: Bytes::from(multipart::encode(&parts, &boundary)),
                    content_type: Some(format!("multipart/form-data; boundary={}", boundary)),
                }
            }
            Body::Json(value) => EncodedBody {
                bytes: Bytes::from(serde_json::to_vec(&value).map_err(Error::JsonEncode)?),
                content_type: Some(JSON_CONTENT_TYPE.to_string()),
            },
        };
        Ok(Some(encoded))
    }
}
