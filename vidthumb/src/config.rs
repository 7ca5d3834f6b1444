use std::path::PathBuf;

use crate::decoder::SeekPolicy;
use crate::output::default_cache_dir;

/// Configuration for an [`Extractor`](crate::Extractor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Destination for file-mode requests that do not name an output directory.
    pub cache_dir: PathBuf,
    /// Upper bound on concurrently running extractions.
    pub max_workers: usize,
    pub seek_policy: SeekPolicy,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_workers: 4,
            seek_policy: SeekPolicy::ClosestSync,
        }
    }
}

/// Validate an extractor configuration.
pub fn validate_config(config: &ExtractorConfig) -> Result<(), String> {
    if config.max_workers == 0 {
        return Err("max_workers must be at least 1".into());
    }
    if config.cache_dir.as_os_str().is_empty() {
        return Err("cache_dir must not be empty".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ExtractorConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.seek_policy, SeekPolicy::ClosestSync);
    }

    #[test]
    fn rejects_zero_workers() {
        let config = ExtractorConfig {
            max_workers: 0,
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("max_workers"));
    }

    #[test]
    fn rejects_empty_cache_dir() {
        let config = ExtractorConfig {
            cache_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
