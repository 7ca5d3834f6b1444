//! Synthetic clips written with FFmpeg's built-in MPEG-4 Part 2 encoder, so
//! the decode tests need no checked-in media.

use std::path::Path;

use ffmpeg::{Dictionary, Packet, Rational, codec, encoder, format, frame};

pub struct Clip {
    pub width: u32,
    pub height: u32,
    pub fps: i32,
    pub frames: i64,
    /// Distance between sync frames, in frames.
    pub gop: u32,
    /// Counter-clockwise display rotation stored in the container.
    pub rotation: Option<f64>,
    /// Shift applied to every timestamp, in seconds.
    pub start_offset_s: i64,
}

impl Default for Clip {
    /// Ten seconds at 10 fps with a sync frame every second.
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 10,
            frames: 100,
            gop: 10,
            rotation: None,
            start_offset_s: 0,
        }
    }
}

/// Encode `clip` into `path`; the container is picked from the extension.
pub fn write_clip(path: &Path, clip: &Clip) {
    vidthumb_ffmpeg::init().unwrap();

    let mut octx = format::output(path).unwrap();
    let codec = encoder::find(codec::Id::MPEG4).expect("FFmpeg built without the mpeg4 encoder");
    let global_header = octx.format().flags().contains(format::flag::Flags::GLOBAL_HEADER);
    let encoder_tb = Rational(1, clip.fps);

    let mut enc = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .unwrap();
    enc.set_width(clip.width);
    enc.set_height(clip.height);
    enc.set_format(format::Pixel::YUV420P);
    enc.set_time_base(encoder_tb);
    enc.set_frame_rate(Some(Rational(clip.fps, 1)));
    enc.set_gop(clip.gop);
    enc.set_max_b_frames(0);
    enc.set_bit_rate(400_000);
    if global_header {
        enc.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    // Keep sync frames on the gop grid only.
    let mut options = Dictionary::new();
    options.set("sc_threshold", "1000000000");
    let mut enc = enc.open_as_with(codec, options).unwrap();

    {
        let mut ost = octx.add_stream(codec).unwrap();
        ost.set_parameters(&enc);
        ost.set_time_base(encoder_tb);
        if let Some(angle) = clip.rotation {
            unsafe {
                let par = (*ost.as_mut_ptr()).codecpar;
                let side_data = ffi::av_packet_side_data_new(
                    &mut (*par).coded_side_data,
                    &mut (*par).nb_coded_side_data,
                    ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
                    9 * 4,
                    0,
                );
                assert!(!side_data.is_null());
                ffi::av_display_rotation_set((*side_data).data as *mut i32, angle);
            }
        }
    }

    octx.write_header().unwrap();
    let stream_tb = octx.stream(0).unwrap().time_base();
    let offset = i64::from(stream_tb.denominator()) * clip.start_offset_s
        / i64::from(stream_tb.numerator());

    let mut picture = frame::Video::new(format::Pixel::YUV420P, clip.width, clip.height);
    for i in 0..clip.frames {
        picture.data_mut(0).fill((i * 2 % 256) as u8);
        picture.data_mut(1).fill(128);
        picture.data_mut(2).fill(128);
        picture.set_pts(Some(i));
        enc.send_frame(&picture).unwrap();
        write_packets(&mut enc, &mut octx, encoder_tb, stream_tb, offset);
    }
    enc.send_eof().unwrap();
    write_packets(&mut enc, &mut octx, encoder_tb, stream_tb, offset);

    octx.write_trailer().unwrap();
}

fn write_packets(
    enc: &mut encoder::video::Encoder,
    octx: &mut format::context::Output,
    encoder_tb: Rational,
    stream_tb: Rational,
    offset: i64,
) {
    let mut packet = Packet::empty();
    while enc.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(encoder_tb, stream_tb);
        packet.set_pts(packet.pts().map(|ts| ts + offset));
        packet.set_dts(packet.dts().map(|ts| ts + offset));
        packet.write_interleaved(octx).unwrap();
    }
}
