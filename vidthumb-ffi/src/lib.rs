use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use vidthumb::args::{CallError, ThumbnailArgs, dispatch, method_mode};
use vidthumb::{EncodedOutput, Extractor, ExtractorConfig, SeekPolicy, validate_config};
use vidthumb_ffmpeg::FfmpegDecoder;

// ---------------------------------------------------------------------------
// Version info injected at build time
// ---------------------------------------------------------------------------
const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_COMMIT: &str = env!("GIT_COMMIT");
const RELEASE_VERSION: &str = env!("RELEASE_VERSION");

// ---------------------------------------------------------------------------
// JSON serde types
// ---------------------------------------------------------------------------

#[derive(serde::Serialize)]
struct VersionInfo {
    version: &'static str,
    git_commit: &'static str,
    release_version: &'static str,
    webp: bool,
}

#[derive(serde::Deserialize, Default)]
#[serde(default)]
struct FfiExtractorConfig {
    cache_dir: Option<String>,
    max_workers: Option<usize>,
    seek_policy: Option<SeekPolicy>,
}

#[derive(serde::Serialize)]
struct ErrorJson<'a> {
    code: &'a str,
    message: &'a str,
}

/// Signature of the completion callback for [`vidthumb_submit`]:
/// `(request_id, path, data, data_len, error_json)`.
///
/// Exactly one of `path` (file mode), `data` (data mode) or `error_json` is
/// non-null. All pointers are only valid for the duration of the call.
pub type CompletionCallback =
    extern "C" fn(i64, *const c_char, *const u8, usize, *const c_char);

// ---------------------------------------------------------------------------
// Shared extractor
// ---------------------------------------------------------------------------

static EXTRACTOR: Mutex<Option<Arc<Extractor<FfmpegDecoder>>>> = Mutex::new(None);

/// The configured extractor, creating one with defaults on first use.
fn extractor() -> Arc<Extractor<FfmpegDecoder>> {
    let mut guard = EXTRACTOR.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(guard.get_or_insert_with(|| Arc::new(Extractor::new(FfmpegDecoder::new()))))
}

/// Convert the FFI config JSON into an `ExtractorConfig`, filling in defaults
/// for any fields that were not specified.
fn ffi_config_to_extractor_config(ffi: FfiExtractorConfig) -> ExtractorConfig {
    let defaults = ExtractorConfig::default();
    ExtractorConfig {
        cache_dir: ffi.cache_dir.map(PathBuf::from).unwrap_or(defaults.cache_dir),
        max_workers: ffi.max_workers.unwrap_or(defaults.max_workers),
        seek_policy: ffi.seek_policy.unwrap_or(defaults.seek_policy),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error_json(code: &str, message: &str) -> String {
    serde_json::to_string(&ErrorJson { code, message }).unwrap_or_default()
}

fn call_error_json(e: &CallError) -> String {
    error_json(e.code(), &e.to_string())
}

/// Write a `{"code","message"}` error into `*error_out` if the pointer is
/// non-null.
///
/// # Safety
///
/// `error_out` must be either null or point to a valid `*mut c_char` location.
unsafe fn set_error(error_out: *mut *mut c_char, json: &str) {
    if !error_out.is_null() {
        if let Ok(c) = CString::new(json) {
            unsafe {
                *error_out = c.into_raw();
            }
        }
    }
}

/// # Safety
///
/// `error_out` must be either null or point to a valid `*mut c_char` location.
unsafe fn clear_error(error_out: *mut *mut c_char) {
    if !error_out.is_null() {
        unsafe {
            *error_out = std::ptr::null_mut();
        }
    }
}

/// Convert a Rust string to a heap-allocated `*mut c_char`.
/// Returns `std::ptr::null_mut()` if the string contains interior NULs.
fn string_to_c(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Borrow a NUL-terminated UTF-8 argument, naming it in the error.
///
/// # Safety
///
/// `ptr` must be either null or a valid NUL-terminated C string.
unsafe fn read_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(error_json("INVALID_ARGUMENT", &format!("{} is NULL", name)));
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().map_err(|e| {
        error_json("INVALID_ARGUMENT", &format!("Invalid UTF-8 in {}: {}", name, e))
    })
}

fn parse_args(json: &str) -> Result<ThumbnailArgs, String> {
    serde_json::from_str(json)
        .map_err(|e| error_json("INVALID_ARGUMENT", &format!("Invalid args JSON: {}", e)))
}

/// Run `method` synchronously on the shared extractor. Errors come back
/// already rendered as error JSON.
fn call(method: &str, args_json: &str) -> Result<EncodedOutput, String> {
    let args = parse_args(args_json)?;
    let extractor = extractor();
    dispatch(&*extractor, method, args).map_err(|e| call_error_json(&e))
}

/// Hand a byte buffer to the caller. Freed with [`vidthumb_free_bytes`].
///
/// # Safety
///
/// `out_len` must be either null or point to a valid `usize` location.
unsafe fn bytes_to_c(data: Vec<u8>, out_len: *mut usize) -> *mut u8 {
    let boxed = data.into_boxed_slice();
    if !out_len.is_null() {
        unsafe {
            *out_len = boxed.len();
        }
    }
    Box::into_raw(boxed) as *mut u8
}

// ---------------------------------------------------------------------------
// FFI entry points
// ---------------------------------------------------------------------------

/// Initialise FFmpeg. Safe to call multiple times; only the first call has
/// any effect.
///
/// Returns `true` on success.
#[unsafe(no_mangle)]
pub extern "C" fn vidthumb_init() -> bool {
    panic::catch_unwind(|| match vidthumb_ffmpeg::init() {
        Ok(()) => true,
        Err(e) => {
            log::error!("{}", e);
            false
        }
    })
    .unwrap_or(false)
}

/// Return a JSON string containing version information.
///
/// The caller **must** free the returned string with `vidthumb_free_string`.
/// Returns `NULL` on internal error.
#[unsafe(no_mangle)]
pub extern "C" fn vidthumb_version() -> *mut c_char {
    panic::catch_unwind(|| {
        let info = VersionInfo {
            version: VERSION,
            git_commit: GIT_COMMIT,
            release_version: RELEASE_VERSION,
            webp: vidthumb::encode::WEBP_SUPPORTED,
        };
        string_to_c(&serde_json::to_string(&info).unwrap_or_default())
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Replace the shared extractor with one built from `config_json`
/// (`{"cache_dir","max_workers","seek_policy"}`, all optional).
///
/// Work queued on the previous extractor still completes; its pool shuts
/// down once no in-flight call holds it.
///
/// Returns `true` on success; otherwise `*error_out` receives error JSON.
///
/// # Safety
///
/// - `config_json` must be either null or a valid NUL-terminated UTF-8 C string.
/// - `error_out` must be either null or point to a valid `*mut c_char` location.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_configure(
    config_json: *const c_char,
    error_out: *mut *mut c_char,
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), String> {
        unsafe { clear_error(error_out) };

        let config_str = unsafe { read_str(config_json, "config_json") }?;
        let ffi_config: FfiExtractorConfig = serde_json::from_str(config_str)
            .map_err(|e| error_json("INVALID_ARGUMENT", &format!("Invalid config JSON: {}", e)))?;
        let config = ffi_config_to_extractor_config(ffi_config);
        validate_config(&config).map_err(|msg| error_json("INVALID_ARGUMENT", &msg))?;

        let extractor = Extractor::with_config(FfmpegDecoder::new(), config)
            .map_err(|e| error_json(e.code(), &e.to_string()))?;

        let previous = {
            let mut guard = EXTRACTOR.lock().unwrap_or_else(|e| e.into_inner());
            guard.replace(Arc::new(extractor))
        };
        // Joined outside the lock so new calls are not blocked on old work.
        drop(previous);
        Ok(())
    })) {
        Ok(Ok(())) => true,
        Ok(Err(json)) => {
            unsafe { set_error(error_out, &json) };
            false
        }
        Err(_) => {
            unsafe {
                set_error(
                    error_out,
                    &error_json("INTERNAL", "Internal panic during vidthumb_configure"),
                )
            };
            false
        }
    }
}

/// Extract a thumbnail to a file and return its absolute path.
///
/// `args_json` keys: `video`, `headers`, `path`, `format` (0 JPEG, 1 PNG,
/// 2 WebP), `maxw`, `maxh`, `timeMs`, `quality`.
///
/// The caller **must** free the returned string with `vidthumb_free_string`.
/// Returns `NULL` on error; `*error_out` then receives error JSON, which the
/// caller must also free with `vidthumb_free_string`.
///
/// # Safety
///
/// - `args_json` must be either null or a valid NUL-terminated UTF-8 C string.
/// - `error_out` must be either null or point to a valid `*mut c_char` location.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_file(
    args_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    match panic::catch_unwind(AssertUnwindSafe(|| -> Result<String, String> {
        unsafe { clear_error(error_out) };
        let args = unsafe { read_str(args_json, "args_json") }?;
        match call("file", args)? {
            EncodedOutput::File(path) => Ok(path.to_string_lossy().into_owned()),
            EncodedOutput::Bytes(_) => Err(error_json("INTERNAL", "Unexpected bytes output")),
        }
    })) {
        Ok(Ok(path)) => string_to_c(&path),
        Ok(Err(json)) => {
            unsafe { set_error(error_out, &json) };
            std::ptr::null_mut()
        }
        Err(_) => {
            unsafe {
                set_error(
                    error_out,
                    &error_json("INTERNAL", "Internal panic during vidthumb_file"),
                )
            };
            std::ptr::null_mut()
        }
    }
}

/// Extract a thumbnail and return the encoded image bytes.
///
/// Takes the same `args_json` as [`vidthumb_file`]; `path` is ignored. On
/// success `*out_len` receives the buffer length.
///
/// The caller **must** free the returned buffer with `vidthumb_free_bytes`,
/// passing the same length. Returns `NULL` on error (check `*error_out`).
///
/// # Safety
///
/// - `args_json` must be either null or a valid NUL-terminated UTF-8 C string.
/// - `out_len` must be either null or point to a valid `usize` location.
/// - `error_out` must be either null or point to a valid `*mut c_char` location.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_data(
    args_json: *const c_char,
    out_len: *mut usize,
    error_out: *mut *mut c_char,
) -> *mut u8 {
    if !out_len.is_null() {
        unsafe {
            *out_len = 0;
        }
    }
    match panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<u8>, String> {
        unsafe { clear_error(error_out) };
        let args = unsafe { read_str(args_json, "args_json") }?;
        match call("data", args)? {
            EncodedOutput::Bytes(data) => Ok(data),
            EncodedOutput::File(_) => Err(error_json("INTERNAL", "Unexpected file output")),
        }
    })) {
        Ok(Ok(data)) => unsafe { bytes_to_c(data, out_len) },
        Ok(Err(json)) => {
            unsafe { set_error(error_out, &json) };
            std::ptr::null_mut()
        }
        Err(_) => {
            unsafe {
                set_error(
                    error_out,
                    &error_json("INTERNAL", "Internal panic during vidthumb_data"),
                )
            };
            std::ptr::null_mut()
        }
    }
}

/// Queue an extraction on the worker pool. `method` is `"file"` or `"data"`.
///
/// `callback` is invoked exactly once with `request_id`, on a worker thread,
/// or on the calling thread if the request is rejected before queueing
/// (unknown method, malformed arguments).
///
/// # Safety
///
/// - `method` and `args_json` must be either null or valid NUL-terminated
///   UTF-8 C strings.
/// - `callback` must be safe to call from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_submit(
    method: *const c_char,
    args_json: *const c_char,
    callback: CompletionCallback,
    request_id: i64,
) {
    let queued = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), String> {
        let method = unsafe { read_str(method, "method") }?;
        let mode = method_mode(method).map_err(|e| call_error_json(&e))?;
        let args = unsafe { read_str(args_json, "args_json") }?;
        let request = parse_args(args)?
            .into_request()
            .map_err(|e| error_json(e.code(), &e.to_string()))?;

        extractor().submit_with(request, mode, move |result| match result {
            Ok(output) => deliver(callback, request_id, output),
            Err(e) => deliver_error(callback, request_id, &error_json(e.code(), &e.to_string())),
        });
        Ok(())
    }));

    match queued {
        Ok(Ok(())) => {}
        Ok(Err(json)) => deliver_error(callback, request_id, &json),
        Err(_) => deliver_error(
            callback,
            request_id,
            &error_json("INTERNAL", "Internal panic during vidthumb_submit"),
        ),
    }
}

fn deliver(callback: CompletionCallback, request_id: i64, output: EncodedOutput) {
    match output {
        EncodedOutput::File(path) => match CString::new(path.to_string_lossy().as_bytes()) {
            Ok(c_path) => callback(request_id, c_path.as_ptr(), std::ptr::null(), 0, std::ptr::null()),
            Err(_) => deliver_error(
                callback,
                request_id,
                &error_json("WRITE_FAILED", "Output path contains a NUL byte"),
            ),
        },
        EncodedOutput::Bytes(data) => {
            callback(request_id, std::ptr::null(), data.as_ptr(), data.len(), std::ptr::null())
        }
    }
}

fn deliver_error(callback: CompletionCallback, request_id: i64, json: &str) {
    // error_json never produces interior NULs
    let c_json = CString::new(json).unwrap_or_default();
    callback(request_id, std::ptr::null(), std::ptr::null(), 0, c_json.as_ptr());
}

/// Free a string that was returned by one of the `vidthumb_*` functions.
///
/// Passing `NULL` is safe and has no effect.
///
/// # Safety
///
/// `s` must be either null or a pointer previously returned by one of the
/// `vidthumb_*` functions in this library. Each pointer must only be freed once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

/// Free a buffer returned by `vidthumb_data`.
///
/// Passing `NULL` is safe and has no effect.
///
/// # Safety
///
/// `data` must be either null or a pointer previously returned by
/// `vidthumb_data`, and `len` the length it reported. Each buffer must only
/// be freed once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vidthumb_free_bytes(data: *mut u8, len: usize) {
    if !data.is_null() {
        unsafe {
            let _ = Box::from_raw(std::ptr::slice_from_raw_parts_mut(data, len));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn take_string(s: *mut c_char) -> String {
        assert!(!s.is_null());
        let owned = unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned();
        unsafe { vidthumb_free_string(s) };
        owned
    }

    fn error_code(json: &str) -> String {
        let v: serde_json::Value = serde_json::from_str(json).unwrap();
        v["code"].as_str().unwrap().to_string()
    }

    #[test]
    fn version_is_json() {
        let json = take_string(vidthumb_version());
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["version"], VERSION);
        assert!(v["webp"].is_boolean());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let ffi: FfiExtractorConfig = serde_json::from_str(r#"{"max_workers":2}"#).unwrap();
        let config = ffi_config_to_extractor_config(ffi);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.seek_policy, SeekPolicy::ClosestSync);
        assert_eq!(config.cache_dir, ExtractorConfig::default().cache_dir);
    }

    #[test]
    fn config_accepts_exact_seek() {
        let ffi: FfiExtractorConfig = serde_json::from_str(r#"{"seek_policy":"exact"}"#).unwrap();
        assert_eq!(ffi_config_to_extractor_config(ffi).seek_policy, SeekPolicy::Exact);
    }

    #[test]
    fn configure_rejects_zero_workers() {
        let json = CString::new(r#"{"max_workers":0}"#).unwrap();
        let mut err: *mut c_char = std::ptr::null_mut();
        let ok = unsafe { vidthumb_configure(json.as_ptr(), &mut err) };
        assert!(!ok);
        assert_eq!(error_code(&take_string(err)), "INVALID_ARGUMENT");
    }

    #[test]
    fn file_requires_video() {
        let json = CString::new(r#"{"video":"  "}"#).unwrap();
        let mut err: *mut c_char = std::ptr::null_mut();
        let out = unsafe { vidthumb_file(json.as_ptr(), &mut err) };
        assert!(out.is_null());
        let err = take_string(err);
        assert_eq!(error_code(&err), "INVALID_ARGUMENT");
        assert!(err.contains("Video path or URL is required"));
    }

    #[test]
    fn data_reports_malformed_json() {
        let json = CString::new("{not json").unwrap();
        let mut err: *mut c_char = std::ptr::null_mut();
        let mut len = 99usize;
        let out = unsafe { vidthumb_data(json.as_ptr(), &mut len, &mut err) };
        assert!(out.is_null());
        assert_eq!(len, 0);
        assert_eq!(error_code(&take_string(err)), "INVALID_ARGUMENT");
    }

    #[test]
    fn null_arguments_are_rejected() {
        let mut err: *mut c_char = std::ptr::null_mut();
        let out = unsafe { vidthumb_file(std::ptr::null(), &mut err) };
        assert!(out.is_null());
        assert!(take_string(err).contains("args_json is NULL"));
    }

    #[test]
    fn missing_source_reports_source_unavailable() {
        let json = CString::new(r#"{"video":"/nonexistent/clip.mp4","timeMs":0}"#).unwrap();
        let mut err: *mut c_char = std::ptr::null_mut();
        let mut len = 0usize;
        let out = unsafe { vidthumb_data(json.as_ptr(), &mut len, &mut err) };
        assert!(out.is_null());
        assert_eq!(error_code(&take_string(err)), "SOURCE_UNAVAILABLE");
    }

    static RESULTS: Mutex<Option<mpsc::Sender<(i64, String)>>> = Mutex::new(None);

    extern "C" fn record(
        request_id: i64,
        _path: *const c_char,
        _data: *const u8,
        _len: usize,
        error_json: *const c_char,
    ) {
        let err = if error_json.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(error_json) }.to_string_lossy().into_owned()
        };
        if let Some(tx) = RESULTS.lock().unwrap().as_ref() {
            tx.send((request_id, err)).unwrap();
        }
    }

    #[test]
    fn submit_invokes_callback_once_per_request() {
        let (tx, rx) = mpsc::channel();
        *RESULTS.lock().unwrap() = Some(tx);

        let unknown = CString::new("thumbnail").unwrap();
        let file = CString::new("file").unwrap();
        let args = CString::new(r#"{"video":"/nonexistent/clip.mp4"}"#).unwrap();

        unsafe {
            vidthumb_submit(unknown.as_ptr(), args.as_ptr(), record, 1);
            vidthumb_submit(file.as_ptr(), args.as_ptr(), record, 2);
        }

        let mut seen: Vec<(i64, String)> = (0..2)
            .map(|_| rx.recv_timeout(std::time::Duration::from_secs(30)).unwrap())
            .collect();
        seen.sort_by_key(|(id, _)| *id);

        assert_eq!(error_code(&seen[0].1), "NOT_IMPLEMENTED");
        assert_eq!(error_code(&seen[1].1), "SOURCE_UNAVAILABLE");
        assert!(rx.recv_timeout(std::time::Duration::from_millis(200)).is_err());
    }
}
