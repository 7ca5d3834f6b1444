use std::collections::HashMap;
use std::io::Write;

use clap::{ArgAction, Parser, ValueEnum};

use vidthumb::{
    EncodedOutput, Extractor, ExtractorConfig, OutputFormat, OutputMode, SeekPolicy,
    ThumbnailRequest,
};
use vidthumb_ffmpeg::FfmpegDecoder;

/// Video thumbnail tool: extracts a still frame from each input video.
#[derive(Parser)]
#[command(name = "vidthumb")]
struct Args {
    /// Request header for http(s) sources, as "Name: Value" (repeatable)
    #[arg(long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Output directory (empty = platform cache dir under video_thumbnails)
    #[arg(long = "output-folder", default_value = "")]
    output_folder: String,

    /// Output encoding
    #[arg(long = "format", value_enum, default_value_t = FormatArg::Png)]
    format: FormatArg,

    /// Maximum output width (0 = unconstrained)
    #[arg(long = "max-width", default_value_t = 0)]
    max_width: u32,

    /// Maximum output height (0 = unconstrained)
    #[arg(long = "max-height", default_value_t = 0)]
    max_height: u32,

    /// Timestamp to sample, in milliseconds (negative values are treated as 0)
    #[arg(long = "time-ms", default_value_t = 0, allow_negative_numbers = true)]
    time_ms: i64,

    /// Encoder quality for JPEG/WebP, clamped to 0-100
    #[arg(long = "quality", default_value_t = 100, allow_negative_numbers = true)]
    quality: i64,

    /// Write the encoded image to stdout instead of a file (single input only)
    #[arg(long = "stdout", default_value_t = false)]
    stdout: bool,

    /// Decode up to the exact timestamp instead of the preceding sync frame
    #[arg(long = "exact", default_value_t = false)]
    exact: bool,

    /// Maximum number of concurrent extractions
    #[arg(long = "workers", default_value_t = 4)]
    workers: usize,

    /// Stop on the first error instead of continuing and reporting failures at the end
    #[arg(long = "fail-fast", default_value_t = false, action = ArgAction::Set)]
    fail_fast: bool,

    /// Display version and quit
    #[arg(long = "version")]
    version: bool,

    /// Input videos (paths, file:// URIs or http(s) URLs)
    sources: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
    Webp,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Webp => OutputFormat::WebP,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        vidthumb::version::print_cli_version_banner(
            "Video Thumbnail Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    validate_args(args)?;

    let config = ExtractorConfig {
        max_workers: args.workers,
        seek_policy: if args.exact {
            SeekPolicy::Exact
        } else {
            SeekPolicy::ClosestSync
        },
        ..Default::default()
    };
    let extractor = Extractor::with_config(FfmpegDecoder::new(), config)?;

    let headers = parse_headers(&args.headers)?;
    let requests = build_requests(args, &headers)?;

    if args.stdout {
        // validate_args guarantees exactly one request here
        for request in &requests {
            let out = extractor.extract(request, OutputMode::Bytes)?;
            if let EncodedOutput::Bytes(data) = out {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&data)?;
                stdout.flush()?;
            }
        }
        return Ok(());
    }

    extract_all(&extractor, requests, args.fail_fast)
}

fn validate_args(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.sources.is_empty() {
        return Err("Expected at least one video as input!".into());
    }

    if args.stdout && args.sources.len() != 1 {
        return Err("--stdout requires exactly one input video".into());
    }

    if args.workers == 0 {
        return Err("--workers must be at least 1".into());
    }

    Ok(())
}

/// Parse `Name: Value` header arguments.
fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    let mut headers = HashMap::new();
    for h in raw {
        let (name, value) = h
            .split_once(':')
            .ok_or_else(|| format!("Invalid header '{}', expected 'Name: Value'", h))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Invalid header '{}': empty name", h).into());
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn build_requests(
    args: &Args,
    headers: &HashMap<String, String>,
) -> Result<Vec<ThumbnailRequest>, Box<dyn std::error::Error>> {
    args.sources
        .iter()
        .map(|source| {
            ThumbnailRequest::builder(source.as_str())
                .headers(headers.clone())
                .output_directory(args.output_folder.as_str())
                .format(args.format.into())
                .max_width(args.max_width)
                .max_height(args.max_height)
                .time_ms(args.time_ms)
                .quality(args.quality)
                .build()
                .map_err(|e| format!("{}: {}", source, e).into())
        })
        .collect()
}

/// A failure collected when not in fail-fast mode.
#[derive(Debug)]
struct DeferredError {
    source: String,
    error: String,
}

impl std::fmt::Display for DeferredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to extract thumbnail from {}: {}", self.source, self.error)
    }
}

/// Run every request on the worker pool and print the resulting paths in
/// input order.
fn extract_all(
    extractor: &Extractor<FfmpegDecoder>,
    requests: Vec<ThumbnailRequest>,
    fail_fast: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pending: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let source = request.source().to_string();
            (source, extractor.submit(request, OutputMode::File))
        })
        .collect();

    let mut errors: Vec<DeferredError> = Vec::new();
    for (source, handle) in pending {
        match handle.wait() {
            Ok(EncodedOutput::File(path)) => {
                log::info!("Wrote thumbnail for {}", source);
                println!("{}", path.display());
            }
            Ok(EncodedOutput::Bytes(_)) => {}
            Err(e) => {
                if fail_fast {
                    return Err(format!("{}: {}", source, e).into());
                }
                log::warn!("{}: {}", source, e);
                errors.push(DeferredError {
                    source,
                    error: e.to_string(),
                });
            }
        }
    }

    if !errors.is_empty() {
        log::error!("");
        log::error!("OPERATION COMPLETED WITH ERRORS:");
        for e in &errors {
            log::error!("  {}", e);
        }
        return Err(format!("{} error(s) encountered during processing", errors.len()).into());
    }

    Ok(())
}
