use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use crate::config::{ExtractorConfig, validate_config};
use crate::decoder::{Decoder, sample_frame};
use crate::encode::encode_image;
use crate::error::{Result, ThumbnailError};
use crate::output::{thumbnail_file_name, write_thumbnail};
use crate::pool::WorkerPool;
use crate::request::{EncodedOutput, OutputMode, ThumbnailRequest};
use crate::scale::scale_frame;
use crate::source::MediaSource;

/// Turns [`ThumbnailRequest`]s into encoded thumbnails using a platform
/// [`Decoder`], either inline ([`extract`](Self::extract)) or on a bounded
/// worker pool ([`submit`](Self::submit)).
pub struct Extractor<D: Decoder> {
    inner: Arc<Inner<D>>,
    pool: WorkerPool,
}

struct Inner<D> {
    decoder: D,
    config: ExtractorConfig,
}

impl<D: Decoder + 'static> Extractor<D> {
    /// Create an extractor with the default configuration.
    pub fn new(decoder: D) -> Self {
        Self::build(decoder, ExtractorConfig::default())
    }

    pub fn with_config(decoder: D, config: ExtractorConfig) -> Result<Self> {
        validate_config(&config).map_err(ThumbnailError::InvalidArgument)?;
        Ok(Self::build(decoder, config))
    }

    fn build(decoder: D, config: ExtractorConfig) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        Self {
            inner: Arc::new(Inner { decoder, config }),
            pool,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.inner.config
    }

    pub fn decoder(&self) -> &D {
        &self.inner.decoder
    }

    /// Run one extraction on the calling thread.
    pub fn extract(&self, request: &ThumbnailRequest, mode: OutputMode) -> Result<EncodedOutput> {
        self.inner.extract(request, mode)
    }

    /// Queue an extraction on the worker pool. The returned handle yields its
    /// result exactly once.
    pub fn submit(&self, request: ThumbnailRequest, mode: OutputMode) -> PendingThumbnail {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit_with(request, mode, move |result| {
            // The caller may have dropped the handle; nothing else to notify.
            let _ = tx.send(result);
        });
        PendingThumbnail { rx, done: false }
    }

    /// Queue an extraction and invoke `callback` once, on the worker thread,
    /// with its result.
    pub fn submit_with<F>(&self, request: ThumbnailRequest, mode: OutputMode, callback: F)
    where
        F: FnOnce(Result<EncodedOutput>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.pool.execute(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| inner.extract(&request, mode)))
                .unwrap_or_else(|_| {
                    Err(ThumbnailError::FrameExtractionFailed(format!(
                        "extraction of {} panicked",
                        request.source()
                    )))
                });
            callback(result);
        });
    }
}

impl<D: Decoder> Inner<D> {
    fn extract(&self, request: &ThumbnailRequest, mode: OutputMode) -> Result<EncodedOutput> {
        let result = self.run(request, mode);
        if let Err(ref e) = result {
            log::warn!("Thumbnail of {} at {} ms failed: {}", request.source(), request.time_ms(), e);
        }
        result
    }

    fn run(&self, request: &ThumbnailRequest, mode: OutputMode) -> Result<EncodedOutput> {
        let source = MediaSource::classify(request.source(), request.headers());
        log::debug!(
            "Extracting {} at {} ms as {:?} ({:?} mode)",
            source.describe(),
            request.time_ms(),
            request.format(),
            mode
        );

        // The handle is released at the end of this block, before any
        // scaling or encoding work.
        let frame = {
            let mut handle = self.decoder.open(&source)?;
            sample_frame(&mut handle, request.time_us(), self.config.seek_policy)?
        };

        let frame = scale_frame(frame, request.max_width(), request.max_height());
        let data = encode_image(frame.image(), request.format(), request.quality())?;
        drop(frame);

        match mode {
            OutputMode::Bytes => Ok(EncodedOutput::Bytes(data)),
            OutputMode::File => {
                let dir = request
                    .output_directory()
                    .unwrap_or(self.config.cache_dir.as_path());
                let file_name =
                    thumbnail_file_name(request.source(), request.time_ms(), request.format());
                let path = write_thumbnail(dir, &file_name, &data)?;
                Ok(EncodedOutput::File(path))
            }
        }
    }
}

/// Handle to a queued extraction.
pub struct PendingThumbnail {
    rx: Receiver<Result<EncodedOutput>>,
    done: bool,
}

impl PendingThumbnail {
    /// Block until the extraction completes.
    pub fn wait(self) -> Result<EncodedOutput> {
        self.rx.recv().unwrap_or_else(|_| Err(lost_result()))
    }

    /// Poll for completion. Returns `Some` exactly once.
    pub fn try_take(&mut self) -> Option<Result<EncodedOutput>> {
        if self.done {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(lost_result()),
        };
        self.done = true;
        Some(result)
    }
}

fn lost_result() -> ThumbnailError {
    ThumbnailError::FrameExtractionFailed("extraction worker exited without a result".to_string())
}
