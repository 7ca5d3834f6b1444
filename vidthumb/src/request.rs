use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, ThumbnailError};

/// Encoding of the produced thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    Jpeg,
    #[default]
    Png,
    WebP,
}

impl OutputFormat {
    /// Map a wire format code (0 = JPEG, 1 = PNG, 2 = WebP). Unknown codes fall
    /// back to PNG.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => OutputFormat::Jpeg,
            2 => OutputFormat::WebP,
            _ => OutputFormat::Png,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

/// Where the encoded thumbnail goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Persist under a content-derived filename and return the path.
    File,
    /// Return the encoded buffer without touching the filesystem.
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedOutput {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl EncodedOutput {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            EncodedOutput::Bytes(b) => Some(b),
            EncodedOutput::File(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            EncodedOutput::File(p) => Some(p),
            EncodedOutput::Bytes(_) => None,
        }
    }
}

/// A fully described extraction. Built through [`ThumbnailRequest::builder`],
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    source: String,
    headers: HashMap<String, String>,
    output_directory: Option<PathBuf>,
    format: OutputFormat,
    max_width: u32,
    max_height: u32,
    time_ms: u32,
    quality: u8,
}

impl ThumbnailRequest {
    pub fn builder(source: impl Into<String>) -> ThumbnailRequestBuilder {
        ThumbnailRequestBuilder {
            source: source.into(),
            headers: HashMap::new(),
            output_directory: None,
            format: OutputFormat::default(),
            max_width: 0,
            max_height: 0,
            time_ms: 0,
            quality: 100,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn output_directory(&self) -> Option<&std::path::Path> {
        self.output_directory.as_deref()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    pub fn time_ms(&self) -> u32 {
        self.time_ms
    }

    /// Sample time in the decoder's microsecond time base.
    pub fn time_us(&self) -> i64 {
        i64::from(self.time_ms) * 1000
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailRequestBuilder {
    source: String,
    headers: HashMap<String, String>,
    output_directory: Option<PathBuf>,
    format: OutputFormat,
    max_width: u32,
    max_height: u32,
    time_ms: u32,
    quality: u8,
}

impl ThumbnailRequestBuilder {
    /// Request headers for remote sources. Ignored for local files.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Destination root for file mode. An empty path selects the cache dir.
    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.output_directory = if dir.as_os_str().is_empty() {
            None
        } else {
            Some(dir)
        };
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width;
        self
    }

    pub fn max_height(mut self, max_height: u32) -> Self {
        self.max_height = max_height;
        self
    }

    /// Negative times are coerced to 0.
    pub fn time_ms(mut self, time_ms: i64) -> Self {
        self.time_ms = time_ms.clamp(0, i64::from(u32::MAX)) as u32;
        self
    }

    /// Clamped to [0, 100].
    pub fn quality(mut self, quality: i64) -> Self {
        self.quality = quality.clamp(0, 100) as u8;
        self
    }

    pub fn build(self) -> Result<ThumbnailRequest> {
        if self.source.trim().is_empty() {
            return Err(ThumbnailError::InvalidArgument(
                "Video path or URL is required".to_string(),
            ));
        }

        Ok(ThumbnailRequest {
            source: self.source,
            headers: self.headers,
            output_directory: self.output_directory,
            format: self.format,
            max_width: self.max_width,
            max_height: self.max_height,
            time_ms: self.time_ms,
            quality: self.quality,
        })
    }
}
