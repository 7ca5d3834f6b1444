use image::imageops::FilterType;

use crate::decoder::DecodedFrame;

/// Compute output dimensions for a `src_w`x`src_h` frame bounded by
/// `max_w`x`max_h`, where 0 leaves that axis unconstrained.
///
/// With both bounds set the frame is fitted inside the box, preserving the
/// aspect ratio. With one bound set that axis is the exact target and the
/// other follows proportionally. Neither axis goes below 1 pixel.
pub fn target_size(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (src_w, src_h);
    }

    match (max_w, max_h) {
        (0, 0) => (src_w, src_h),
        (w, 0) => {
            let r = w as f64 / src_w as f64;
            (w, scale_axis(src_h, r))
        }
        (0, h) => {
            let r = h as f64 / src_h as f64;
            (scale_axis(src_w, r), h)
        }
        (w, h) => {
            let r = (w as f64 / src_w as f64).min(h as f64 / src_h as f64);
            (scale_axis(src_w, r).min(w), scale_axis(src_h, r).min(h))
        }
    }
}

fn scale_axis(len: u32, ratio: f64) -> u32 {
    ((len as f64 * ratio).round() as u32).max(1)
}

/// Resample `frame` to fit the given bounds.
///
/// The frame is consumed: when the size changes a new buffer is produced and
/// the original is released on return, otherwise it is passed through as-is.
pub fn scale_frame(frame: DecodedFrame, max_w: u32, max_h: u32) -> DecodedFrame {
    let (src_w, src_h) = (frame.width(), frame.height());
    let (dst_w, dst_h) = target_size(src_w, src_h, max_w, max_h);

    if (dst_w, dst_h) == (src_w, src_h) {
        return frame;
    }

    log::debug!("Scaling {}x{} -> {}x{}", src_w, src_h, dst_w, dst_h);

    let pts = frame.pts_us();
    let resized = frame
        .into_image()
        .resize_exact(dst_w, dst_h, FilterType::Triangle);

    let scaled = DecodedFrame::new(resized);
    match pts {
        Some(pts) => scaled.with_pts(pts),
        None => scaled,
    }
}
