//! Marshalling for callers that cross a method-call boundary (FFI, RPC).
//!
//! Arguments arrive as a loosely typed map. Both the descriptive field names
//! and the short keys used by existing host bindings (`video`, `path`,
//! `maxw`, `maxh`, `timeMs`) are accepted.

use std::collections::HashMap;

use thiserror::Error;

use crate::decoder::Decoder;
use crate::error::ThumbnailError;
use crate::extract::Extractor;
use crate::request::{EncodedOutput, OutputFormat, OutputMode, ThumbnailRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ThumbnailArgs {
    #[serde(alias = "video")]
    pub source: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    #[serde(alias = "path")]
    pub output_directory: Option<String>,
    pub format: Option<i64>,
    #[serde(alias = "maxw")]
    pub max_width: Option<i64>,
    #[serde(alias = "maxh")]
    pub max_height: Option<i64>,
    #[serde(alias = "timeMs")]
    pub time_ms: Option<i64>,
    pub quality: Option<i64>,
}

impl ThumbnailArgs {
    /// Apply defaults and coercions and build a request.
    pub fn into_request(self) -> Result<ThumbnailRequest, ThumbnailError> {
        let source = self.source.unwrap_or_default();

        ThumbnailRequest::builder(source)
            .headers(self.headers.unwrap_or_default())
            .output_directory(self.output_directory.unwrap_or_default())
            .format(self.format.map(OutputFormat::from_code).unwrap_or_default())
            .max_width(bound(self.max_width))
            .max_height(bound(self.max_height))
            .time_ms(self.time_ms.unwrap_or(0))
            .quality(self.quality.unwrap_or(100))
            .build()
    }
}

/// Non-positive bounds mean "unconstrained".
fn bound(value: Option<i64>) -> u32 {
    value.unwrap_or(0).clamp(0, i64::from(u32::MAX)) as u32
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("method not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
}

impl CallError {
    pub fn code(&self) -> &'static str {
        match self {
            CallError::NotImplemented(_) => "NOT_IMPLEMENTED",
            CallError::Thumbnail(e) => e.code(),
        }
    }
}

/// Output mode for a method name: `"file"` or `"data"`.
pub fn method_mode(method: &str) -> Result<OutputMode, CallError> {
    match method {
        "file" => Ok(OutputMode::File),
        "data" => Ok(OutputMode::Bytes),
        other => Err(CallError::NotImplemented(other.to_string())),
    }
}

/// Route a method call to `extractor`, running it on the calling thread.
pub fn dispatch<D: Decoder + 'static>(
    extractor: &Extractor<D>,
    method: &str,
    args: ThumbnailArgs,
) -> Result<EncodedOutput, CallError> {
    let mode = method_mode(method)?;
    let request = args.into_request()?;
    Ok(extractor.extract(&request, mode)?)
}
