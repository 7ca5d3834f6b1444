use std::collections::HashMap;
use std::path::PathBuf;

/// A classified media location, ready to be handed to a [`Decoder`](crate::Decoder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// `http://` or `https://` URL, fetched with the given request headers.
    Remote {
        url: String,
        headers: HashMap<String, String>,
    },
    /// Platform content reference (`content://...`), resolved by the decoder
    /// if it knows how.
    Content(String),
    /// Local filesystem path (`file://` prefix already stripped).
    File(PathBuf),
}

impl MediaSource {
    /// Classify `source`. Headers are only kept for remote sources.
    pub fn classify(source: &str, headers: &HashMap<String, String>) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            MediaSource::Remote {
                url: source.to_string(),
                headers: headers.clone(),
            }
        } else if let Some(path) = source.strip_prefix("file://") {
            MediaSource::File(PathBuf::from(path))
        } else if source.starts_with("content://") {
            MediaSource::Content(source.to_string())
        } else {
            MediaSource::File(PathBuf::from(source))
        }
    }

    /// Printable form for logs. Header values are never included.
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Remote { url, headers } if headers.is_empty() => url.clone(),
            MediaSource::Remote { url, headers } => {
                format!("{} ({} custom header(s))", url, headers.len())
            }
            MediaSource::Content(uri) => uri.clone(),
            MediaSource::File(path) => path.display().to_string(),
        }
    }
}
