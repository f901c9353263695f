use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg_next::util::frame::video::Video as AvFrame;
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, info};

use crate::{
    BenchError, EncoderConfig, EncoderFactory, Frame, HwAccel, Packet, PixelFormat, VideoEncoder,
};

const HW_ENCODER_SUFFIXES: &[&str] = &[
    "_nvenc",
    "_vaapi",
    "_qsv",
    "_videotoolbox",
    "_amf",
    "_v4l2m2m",
];

/// Hardware encoder names to try for a software codec name, in preference order.
fn hw_candidates(codec: &str) -> &'static [&'static str] {
    match codec {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_videotoolbox"],
        "libx265" | "hevc" | "h265" => &[
            "hevc_nvenc",
            "hevc_vaapi",
            "hevc_qsv",
            "hevc_videotoolbox",
        ],
        "libsvtav1" | "libaom-av1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        "libvpx-vp9" | "vp9" => &["vp9_vaapi", "vp9_qsv"],
        _ => &[],
    }
}

fn is_hw_encoder_name(codec: &str) -> bool {
    HW_ENCODER_SUFFIXES.iter().any(|suffix| codec.ends_with(suffix))
}

fn resolve_codec(codec: &str, hwaccel: HwAccel) -> Result<ffmpeg_next::Codec, BenchError> {
    if hwaccel.is_on() && !is_hw_encoder_name(codec) {
        return hw_candidates(codec)
            .iter()
            .find_map(|name| ffmpeg_next::encoder::find_by_name(name))
            .ok_or_else(|| {
                BenchError::EncoderUnsupported(format!("no hardware encoder available for {codec}"))
            });
    }
    ffmpeg_next::encoder::find_by_name(codec)
        .ok_or_else(|| BenchError::EncoderUnsupported(format!("encoder not found: {codec}")))
}

/// Opens libavcodec encoders by name.
#[derive(Debug)]
pub struct FfmpegEncoderFactory;

impl FfmpegEncoderFactory {
    pub fn new() -> Result<Self, BenchError> {
        ffmpeg_next::init()
            .map_err(|err| BenchError::EncoderUnsupported(format!("ffmpeg init failed: {err}")))?;
        Ok(Self)
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError> {
        Ok(Box::new(FfmpegEncoder::open(config)?))
    }
}

pub struct FfmpegEncoder {
    encoder: Option<ffmpeg_next::codec::encoder::Video>,
    scaler: Scaler,
    name: String,
    width: u32,
    height: u32,
    eof_sent: bool,
}

impl FfmpegEncoder {
    pub fn open(config: &EncoderConfig) -> Result<Self, BenchError> {
        if config.pixel_format != PixelFormat::Yuv420p {
            return Err(BenchError::EncoderUnsupported(format!(
                "pixel format {} is not supported",
                config.pixel_format
            )));
        }
        let codec = resolve_codec(&config.codec, config.hwaccel)?;
        let name = codec.name().to_string();
        let width = config.resolution.width();
        let height = config.resolution.height();
        let fps = i32::try_from(config.frame_rate.get())
            .map_err(|_| BenchError::InvalidConfig("frame rate out of range".to_string()))?;
        let (tb_num, tb_den) = config.time_base();

        let mut video = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|err| BenchError::EncoderUnsupported(format!("{name}: {err}")))?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_frame_rate(Some(Rational::new(fps, 1)));
        video.set_time_base(Rational::new(tb_num, tb_den));
        video.set_max_b_frames(config.max_b_frames as usize);
        video.set_gop(config.gop_size);

        let mut options = Dictionary::new();
        for (key, value) in config.rate_control.to_pairs() {
            options.set(key, &value);
        }
        // Failing to open means the codec or device is not usable here.
        let encoder = video
            .open_with(options)
            .map_err(|err| BenchError::EncoderUnsupported(format!("cannot open {name}: {err}")))?;
        let scaler = Scaler::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|err| BenchError::EncoderUnsupported(format!("no rgb24 converter: {err}")))?;
        info!(encoder = %name, %config, "ffmpeg encoder opened");

        Ok(Self {
            encoder: Some(encoder),
            scaler,
            name,
            width,
            height,
            eof_sent: false,
        })
    }

    fn to_yuv(&mut self, frame: &Frame) -> Result<AvFrame, BenchError> {
        if frame.format != PixelFormat::Rgb24 {
            return Err(BenchError::EncodeFailure(format!(
                "{} expects rgb24 input, got {}",
                self.name, frame.format
            )));
        }
        let mut rgb = AvFrame::new(Pixel::RGB24, self.width, self.height);
        let row_len = self.width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (y, src_row) in frame.data.chunks_exact(row_len).enumerate() {
            plane[y * stride..y * stride + row_len].copy_from_slice(src_row);
        }
        let mut yuv = AvFrame::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(|err| BenchError::EncodeFailure(format!("rgb24 -> yuv420p: {err}")))?;
        yuv.set_pts(Some(frame.pts));
        Ok(yuv)
    }

    fn encoder_mut(&mut self) -> Result<&mut ffmpeg_next::codec::encoder::Video, BenchError> {
        self.encoder
            .as_mut()
            .ok_or_else(|| BenchError::EncodeFailure("encoder already released".to_string()))
    }

    fn receive_packets(&mut self) -> Result<Vec<Packet>, BenchError> {
        let encoder = self.encoder_mut()?;
        let mut packets = Vec::new();
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match encoder.receive_packet(&mut packet) {
                Ok(()) => packets.push(Packet {
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    pts: packet.pts(),
                    is_keyframe: packet.is_key(),
                }),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(BenchError::EncodeFailure(err.to_string())),
            }
        }
        Ok(packets)
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError> {
        let yuv = self.to_yuv(frame)?;
        self.encoder_mut()?
            .send_frame(&yuv)
            .map_err(|err| BenchError::EncodeFailure(format!("pts {}: {err}", frame.pts)))?;
        self.receive_packets()
    }

    fn flush(&mut self) -> Result<Vec<Packet>, BenchError> {
        if !self.eof_sent {
            self.eof_sent = true;
            self.encoder_mut()?
                .send_eof()
                .map_err(|err| BenchError::EncodeFailure(format!("send eof: {err}")))?;
        }
        self.receive_packets()
    }

    fn release(&mut self) {
        if self.encoder.take().is_some() {
            debug!(encoder = %self.name, "ffmpeg encoder closed");
        }
    }
}
