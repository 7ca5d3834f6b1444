//! [`Decoder`] implementation on top of FFmpeg (libavformat/libavcodec).
//!
//! Handles local files and `http(s)://` URLs (with custom request headers).
//! Content URIs have no meaning outside a platform content resolver and are
//! reported as unavailable.

extern crate ffmpeg_next as ffmpeg;
extern crate ffmpeg_sys_next as ffi;

use std::collections::HashMap;
use std::sync::OnceLock;

use vidthumb::image::{DynamicImage, RgbImage};
use vidthumb::{DecodedFrame, Decoder, MediaHandle, MediaSource, SeekPolicy, ThumbnailError};

/// Read/write timeout applied to remote sources, in microseconds.
const REMOTE_RW_TIMEOUT_US: &str = "30000000";

/// Opens media through FFmpeg. Stateless; one instance can serve any number
/// of concurrent requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Initialise FFmpeg. Safe to call multiple times; only the first call has
/// any effect.
pub fn init() -> vidthumb::Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| e.to_string())?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
    .clone()
    .map_err(|e| ThumbnailError::source_unavailable(format!("FFmpeg initialisation failed: {}", e)))
}

impl Decoder for FfmpegDecoder {
    type Handle = FfmpegHandle;

    fn open(&self, source: &MediaSource) -> vidthumb::Result<FfmpegHandle> {
        init()?;

        let input = match source {
            MediaSource::File(path) => ffmpeg::format::input(path).map_err(|e| {
                ThumbnailError::source_unavailable(format!("Opening {}: {}", path.display(), e))
            })?,
            MediaSource::Remote { url, headers } => {
                let mut options = ffmpeg::Dictionary::new();
                let header_block = format_headers(headers);
                if !header_block.is_empty() {
                    options.set("headers", &header_block);
                }
                options.set("rw_timeout", REMOTE_RW_TIMEOUT_US);

                ffmpeg::format::input_with_dictionary(url, options).map_err(|e| {
                    ThumbnailError::source_unavailable(format!("Fetching {}: {}", url, e))
                })?
            }
            MediaSource::Content(uri) => {
                return Err(ThumbnailError::source_unavailable(format!(
                    "{}: content URIs cannot be resolved by the FFmpeg decoder",
                    uri
                )));
            }
        };

        FfmpegHandle::new(input, source)
    }
}

/// Render request headers as the CRLF-terminated block FFmpeg's HTTP
/// protocol expects. Headers containing line breaks are dropped.
fn format_headers(headers: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = headers.keys().collect();
    names.sort();

    let mut block = String::new();
    for name in names {
        let value = &headers[name];
        if [name, value].iter().any(|s| s.contains(['\r', '\n'])) {
            log::warn!("Dropping request header '{}' containing a line break", name.trim());
            continue;
        }
        block.push_str(name);
        block.push_str(": ");
        block.push_str(value);
        block.push_str("\r\n");
    }
    block
}

/// An open input with its best video stream's decoder. Dropping the handle
/// closes both.
pub struct FfmpegHandle {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    /// Container start time in `AV_TIME_BASE` units; request times are
    /// relative to it.
    start_us: i64,
    /// First timestamp of the video stream, in `time_base` units.
    stream_start: i64,
    duration_us: Option<i64>,
    rotation: Rotation,
}

impl FfmpegHandle {
    fn new(input: ffmpeg::format::context::Input, source: &MediaSource) -> vidthumb::Result<Self> {
        let (stream_index, time_base, stream_start, rotation, parameters) = {
            let video = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| {
                    ThumbnailError::FrameExtractionFailed(format!(
                        "{}: no video stream",
                        source.describe()
                    ))
                })?;
            (
                video.index(),
                video.time_base(),
                known_or_zero(video.start_time()),
                display_rotation(&video),
                video.parameters(),
            )
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| ThumbnailError::FrameExtractionFailed(format!("Video decoder: {}", e)))?;

        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(ThumbnailError::FrameExtractionFailed(
                "Zero video dimensions".to_string(),
            ));
        }

        // AV_TIME_BASE is microseconds; unknown durations are reported as
        // AV_NOPTS_VALUE (negative).
        let duration = input.duration();
        let duration_us = (duration > 0).then_some(duration);
        let start_us = known_or_zero(unsafe { (*input.as_ptr()).start_time });

        log::debug!(
            "Opened {}: stream #{} {}x{} {:?}, start {} us, duration {:?} us, {:?}",
            source.describe(),
            stream_index,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            start_us,
            duration_us,
            rotation
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            time_base,
            start_us,
            stream_start,
            duration_us,
            rotation,
        })
    }
}

impl MediaHandle for FfmpegHandle {
    fn frame_at(&mut self, time_us: i64, policy: SeekPolicy) -> vidthumb::Result<DecodedFrame> {
        // With no lower bound and the target as the upper one, FFmpeg lands
        // on the sync sample at or before it.
        let target = self.start_us.saturating_add(time_us);
        let policy = match self.input.seek(target, ..target) {
            Ok(()) => policy,
            Err(e) if time_us > 0 => {
                log::warn!("Seek to {} us failed ({}), decoding forward", time_us, e);
                SeekPolicy::Exact
            }
            Err(_) => policy,
        };
        self.decoder.flush();

        let mut sampler = Sampler::new(time_us, policy, self.time_base, self.stream_start);
        // Without a container duration nothing has ruled out a target past
        // the end yet.
        sampler.check_coverage = self.duration_us.is_none();
        let mut decoded = ffmpeg::frame::Video::empty();

        'packets: for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if sampler.offer(&mut decoded) == Step::Done {
                    break 'packets;
                }
            }
        }

        // Flush the decoder to retrieve any buffered frames (e.g. H.264/HEVC
        // with B-frames may buffer several packets before producing output).
        if !sampler.done {
            self.decoder.send_eof().ok();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if sampler.offer(&mut decoded) == Step::Done {
                    break;
                }
            }
        }

        if sampler.ran_past_end() {
            return Err(ThumbnailError::FrameExtractionFailed(format!(
                "requested time {} ms is beyond the end of the stream",
                time_us / 1000
            )));
        }

        let frame = sampler.candidate.take().ok_or_else(|| {
            ThumbnailError::FrameExtractionFailed(format!(
                "No video frame decoded at or before {} ms",
                time_us / 1000
            ))
        })?;

        let pts_us = sampler.pts_us(&frame);
        let decoded = DecodedFrame::new(self.rotation.apply(to_image(&frame)?));
        Ok(match pts_us {
            Some(pts) => decoded.with_pts(pts),
            None => decoded,
        })
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }
}

fn known_or_zero(ts: i64) -> i64 {
    if ts == ffi::AV_NOPTS_VALUE { 0 } else { ts }
}

/// Clockwise turn that makes a stored frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// `angle` is the counter-clockwise rotation in degrees reported by
    /// `av_display_rotation_get`. Phone portrait recordings report -90.
    fn from_display_angle(angle: f64) -> Self {
        if !angle.is_finite() {
            return Rotation::None;
        }
        match (angle.round() as i64).rem_euclid(360) {
            46..=134 => Rotation::Clockwise270,
            135..=225 => Rotation::Clockwise180,
            226..=314 => Rotation::Clockwise90,
            _ => Rotation::None,
        }
    }

    fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Rotation::None => image,
            Rotation::Clockwise90 => image.rotate90(),
            Rotation::Clockwise180 => image.rotate180(),
            Rotation::Clockwise270 => image.rotate270(),
        }
    }
}

/// Size of the 3x3 `int32_t` display matrix side data.
const DISPLAY_MATRIX_SIZE: usize = 9 * 4;

/// Read the stream's display matrix, if the container carries one.
fn display_rotation(stream: &ffmpeg::format::stream::Stream) -> Rotation {
    let angle = unsafe {
        let par = (*stream.as_ptr()).codecpar;
        if par.is_null() {
            return Rotation::None;
        }
        let side_data = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || ((*side_data).size as usize) < DISPLAY_MATRIX_SIZE {
            return Rotation::None;
        }
        ffi::av_display_rotation_get((*side_data).data as *const i32)
    };
    Rotation::from_display_angle(angle)
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

/// Chooses which decoded frame answers the request. Times are microseconds
/// from the start of the stream.
struct Sampler {
    target_us: i64,
    policy: SeekPolicy,
    time_base: ffmpeg::Rational,
    stream_start: i64,
    /// Fail when the stream ends before reaching the target.
    check_coverage: bool,
    /// Latest end time (pts + duration) of any frame seen.
    reached_us: Option<i64>,
    candidate: Option<ffmpeg::frame::Video>,
    done: bool,
}

impl Sampler {
    fn new(target_us: i64, policy: SeekPolicy, time_base: ffmpeg::Rational, stream_start: i64) -> Self {
        Self {
            target_us,
            policy,
            time_base,
            stream_start,
            check_coverage: false,
            reached_us: None,
            candidate: None,
            done: false,
        }
    }

    fn offer(&mut self, frame: &mut ffmpeg::frame::Video) -> Step {
        let pts = self.pts_us(frame);
        if let Some(pts) = pts {
            let end = pts + self.frame_duration_us(frame);
            self.reached_us = Some(self.reached_us.map_or(end, |r| r.max(end)));
        }

        let step = match self.policy {
            SeekPolicy::ClosestSync => {
                if self.candidate.is_none() {
                    self.take(frame);
                }
                if !self.check_coverage || pts.is_none() || self.covers_target() {
                    Step::Done
                } else {
                    Step::Continue
                }
            }
            SeekPolicy::Exact => match pts {
                Some(pts) if pts > self.target_us => {
                    // Seeking overshot; the first frame is the best we have.
                    if self.candidate.is_none() {
                        self.take(frame);
                    }
                    Step::Done
                }
                Some(_) => {
                    self.take(frame);
                    Step::Continue
                }
                // Untimed frames cannot get any closer to the target.
                None if self.candidate.is_some() => Step::Done,
                None => {
                    self.take(frame);
                    Step::Continue
                }
            },
        };

        self.done = step == Step::Done;
        step
    }

    fn covers_target(&self) -> bool {
        self.reached_us.is_some_and(|r| r >= self.target_us)
    }

    /// Whether the frames seen so far stop short of the target.
    fn ran_past_end(&self) -> bool {
        self.check_coverage && self.reached_us.is_some_and(|r| r < self.target_us)
    }

    /// Keep `frame` as the candidate, handing the previous buffer back to be
    /// reused by the decoder.
    fn take(&mut self, frame: &mut ffmpeg::frame::Video) {
        let mut slot = self
            .candidate
            .take()
            .unwrap_or_else(ffmpeg::frame::Video::empty);
        std::mem::swap(&mut slot, frame);
        self.candidate = Some(slot);
    }

    fn pts_us(&self, frame: &ffmpeg::frame::Video) -> Option<i64> {
        let pts = frame.timestamp().or_else(|| frame.pts())?;
        Some(rescale_to_us(pts - self.stream_start, self.time_base))
    }

    fn frame_duration_us(&self, frame: &ffmpeg::frame::Video) -> i64 {
        let duration = unsafe { (*frame.as_ptr()).duration };
        if duration > 0 {
            rescale_to_us(duration, self.time_base)
        } else {
            0
        }
    }
}

fn rescale_to_us(ts: i64, time_base: ffmpeg::Rational) -> i64 {
    let num = i128::from(time_base.numerator());
    let den = i128::from(time_base.denominator());
    if den == 0 {
        return ts;
    }
    (i128::from(ts) * num * 1_000_000 / den) as i64
}

/// Convert a decoded frame of any pixel format to packed RGB.
fn to_image(frame: &ffmpeg::frame::Video) -> vidthumb::Result<DynamicImage> {
    let (width, height) = (frame.width(), frame.height());

    let mut scaler = ffmpeg::software::scaling::Context::get(
        frame.format(),
        width,
        height,
        ffmpeg::format::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| ThumbnailError::FrameExtractionFailed(format!("Scaler: {}", e)))?;

    let mut rgb = ffmpeg::frame::Video::empty();
    scaler
        .run(frame, &mut rgb)
        .map_err(|e| ThumbnailError::FrameExtractionFailed(format!("Pixel conversion: {}", e)))?;

    let stride = rgb.stride(0);
    let row_len = width as usize * 3;
    let data = rgb.data(0);

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride.max(1)).take(height as usize) {
        if let Some(px) = row.get(..row_len) {
            pixels.extend_from_slice(px);
        }
    }

    RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| {
            ThumbnailError::FrameExtractionFailed(format!(
                "Converted frame is smaller than {}x{}",
                width, height
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_crlf_terminated_and_sorted() {
        let headers = HashMap::from([
            ("User-Agent".to_string(), "vidthumb".to_string()),
            ("Authorization".to_string(), "Bearer t".to_string()),
        ]);
        assert_eq!(
            format_headers(&headers),
            "Authorization: Bearer t\r\nUser-Agent: vidthumb\r\n"
        );
    }

    #[test]
    fn headers_with_line_breaks_are_dropped() {
        let headers = HashMap::from([
            ("X-Ok".to_string(), "1".to_string()),
            ("X-Bad".to_string(), "a\r\nInjected: yes".to_string()),
        ]);
        assert_eq!(format_headers(&headers), "X-Ok: 1\r\n");
    }

    #[test]
    fn empty_headers_produce_no_block() {
        assert_eq!(format_headers(&HashMap::new()), "");
    }

    #[test]
    fn rescales_stream_time_to_microseconds() {
        assert_eq!(rescale_to_us(90_000, ffmpeg::Rational::new(1, 90_000)), 1_000_000);
        assert_eq!(rescale_to_us(48, ffmpeg::Rational::new(1, 24)), 2_000_000);
        assert_eq!(rescale_to_us(1001, ffmpeg::Rational::new(1, 30_000)), 33_366);
        assert_eq!(rescale_to_us(7, ffmpeg::Rational::new(1, 0)), 7);
    }

    const TENTHS: ffmpeg::Rational = ffmpeg::Rational(1, 10);

    /// A frame stamped in tenths of a second, one tenth long.
    fn frame(pts: Option<i64>) -> ffmpeg::frame::Video {
        let mut frame = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, 2, 2);
        frame.set_pts(pts);
        unsafe { (*frame.as_mut_ptr()).duration = 1 };
        frame
    }

    /// Offer frames until the sampler is done, like the decode loop does.
    fn feed(sampler: &mut Sampler, stamps: &[Option<i64>]) -> Vec<Step> {
        let mut steps = Vec::new();
        for &pts in stamps {
            let step = sampler.offer(&mut frame(pts));
            let done = step == Step::Done;
            steps.push(step);
            if done {
                break;
            }
        }
        steps
    }

    fn candidate_pts(sampler: &Sampler) -> Option<i64> {
        sampler.candidate.as_ref().and_then(|f| sampler.pts_us(f))
    }

    #[test]
    fn display_angles_map_to_clockwise_turns() {
        assert_eq!(Rotation::from_display_angle(-90.0), Rotation::Clockwise90);
        assert_eq!(Rotation::from_display_angle(270.0), Rotation::Clockwise90);
        assert_eq!(Rotation::from_display_angle(90.0), Rotation::Clockwise270);
        assert_eq!(Rotation::from_display_angle(180.0), Rotation::Clockwise180);
        assert_eq!(Rotation::from_display_angle(-180.0), Rotation::Clockwise180);
        assert_eq!(Rotation::from_display_angle(-89.9), Rotation::Clockwise90);
        assert_eq!(Rotation::from_display_angle(0.0), Rotation::None);
        assert_eq!(Rotation::from_display_angle(10.0), Rotation::None);
        assert_eq!(Rotation::from_display_angle(f64::NAN), Rotation::None);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let turned = Rotation::Clockwise90.apply(image.clone());
        assert_eq!((turned.width(), turned.height()), (2, 4));
        let turned = Rotation::Clockwise180.apply(image.clone());
        assert_eq!((turned.width(), turned.height()), (4, 2));
        let turned = Rotation::Clockwise270.apply(image);
        assert_eq!((turned.width(), turned.height()), (2, 4));
    }

    #[test]
    fn closest_sync_takes_first_frame_when_duration_is_known() {
        let mut sampler = Sampler::new(2_500_000, SeekPolicy::ClosestSync, TENTHS, 0);
        assert_eq!(feed(&mut sampler, &[Some(20)]), vec![Step::Done]);
        assert_eq!(candidate_pts(&sampler), Some(2_000_000));
        assert!(!sampler.ran_past_end());
    }

    #[test]
    fn closest_sync_without_duration_decodes_until_target_is_covered() {
        let mut sampler = Sampler::new(2_500_000, SeekPolicy::ClosestSync, TENTHS, 0);
        sampler.check_coverage = true;
        let steps = feed(&mut sampler, &[Some(20), Some(21), Some(22), Some(23), Some(24)]);
        assert_eq!(steps.last(), Some(&Step::Done));
        assert!(steps[..4].iter().all(|s| *s == Step::Continue));
        // The sync frame stays the answer.
        assert_eq!(candidate_pts(&sampler), Some(2_000_000));
        assert!(!sampler.ran_past_end());
    }

    #[test]
    fn target_after_last_frame_is_past_the_end_without_duration() {
        for policy in [SeekPolicy::ClosestSync, SeekPolicy::Exact] {
            let mut sampler = Sampler::new(60_000_000, policy, TENTHS, 0);
            sampler.check_coverage = true;
            let steps = feed(&mut sampler, &[Some(90), Some(95), Some(99)]);
            assert!(steps.iter().all(|s| *s == Step::Continue));
            assert!(sampler.ran_past_end(), "{:?}", policy);
        }
    }

    #[test]
    fn target_inside_last_frame_is_not_past_the_end() {
        let mut sampler = Sampler::new(9_950_000, SeekPolicy::Exact, TENTHS, 0);
        sampler.check_coverage = true;
        feed(&mut sampler, &[Some(98), Some(99)]);
        assert!(!sampler.ran_past_end());
        assert_eq!(candidate_pts(&sampler), Some(9_900_000));
    }

    #[test]
    fn exact_keeps_last_frame_at_or_before_target() {
        let mut sampler = Sampler::new(2_500_000, SeekPolicy::Exact, TENTHS, 0);
        let steps = feed(&mut sampler, &[Some(20), Some(24), Some(25), Some(26)]);
        assert_eq!(steps, vec![Step::Continue, Step::Continue, Step::Continue, Step::Done]);
        assert_eq!(candidate_pts(&sampler), Some(2_500_000));
    }

    #[test]
    fn exact_overshoot_keeps_first_frame() {
        let mut sampler = Sampler::new(1_000_000, SeekPolicy::Exact, TENTHS, 0);
        assert_eq!(feed(&mut sampler, &[Some(30)]), vec![Step::Done]);
        assert_eq!(candidate_pts(&sampler), Some(3_000_000));
    }

    #[test]
    fn exact_stops_at_untimed_frame_once_a_candidate_exists() {
        let mut sampler = Sampler::new(5_000_000, SeekPolicy::Exact, TENTHS, 0);
        let steps = feed(&mut sampler, &[Some(10), None, Some(12)]);
        assert_eq!(steps, vec![Step::Continue, Step::Done]);
        assert_eq!(candidate_pts(&sampler), Some(1_000_000));

        let mut sampler = Sampler::new(5_000_000, SeekPolicy::Exact, TENTHS, 0);
        assert_eq!(feed(&mut sampler, &[None, None]), vec![Step::Continue, Step::Done]);
        assert!(sampler.candidate.is_some());
    }

    #[test]
    fn timestamps_are_relative_to_stream_start() {
        let mut sampler = Sampler::new(2_000_000, SeekPolicy::Exact, TENTHS, 14);
        feed(&mut sampler, &[Some(34), Some(35)]);
        assert_eq!(candidate_pts(&sampler), Some(2_000_000));
    }
}
