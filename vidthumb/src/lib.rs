//! Extract a single still frame from a video, optionally scale it to fit
//! within bounds, and encode it as JPEG, PNG or WebP.
//!
//! Decoding is delegated to a [`Decoder`] implementation (see the
//! `vidthumb-ffmpeg` crate). This crate handles source classification,
//! frame sampling, scaling, encoding and content-addressed output naming.

pub mod args;
pub mod config;
pub mod decoder;
pub mod encode;
pub mod error;
pub mod extract;
pub mod output;
pub mod pool;
pub mod request;
pub mod scale;
pub mod source;
pub mod version;

pub use config::{ExtractorConfig, validate_config};
pub use decoder::{DecodedFrame, Decoder, MediaHandle, SeekPolicy};
pub use error::{Result, ThumbnailError};
pub use extract::{Extractor, PendingThumbnail};
pub use request::{EncodedOutput, OutputFormat, OutputMode, ThumbnailRequest};
pub use source::MediaSource;

/// Re-exported so decoder implementations build frames against the same
/// `image` version.
pub use image;
