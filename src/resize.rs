use std::str::FromStr;
use std::{fmt, fmt::Display};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use tracing::debug;

use crate::pipeline::{BoundedQueueRx, StageItem, StageSender};
use crate::{BenchError, Frame, PixelFormat, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("nearest"),
            Self::Triangle => f.write_str("triangle"),
            Self::CatmullRom => f.write_str("catmull-rom"),
            Self::Lanczos3 => f.write_str("lanczos3"),
        }
    }
}

impl FromStr for ResizeFilter {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "triangle" | "bilinear" => Ok(Self::Triangle),
            "catmull-rom" | "bicubic" => Ok(Self::CatmullRom),
            "lanczos3" | "lanczos" => Ok(Self::Lanczos3),
            other => Err(BenchError::InvalidConfig(format!(
                "unknown resize filter '{other}'"
            ))),
        }
    }
}

/// Returns `frame` untouched when it already has `target` dimensions,
/// otherwise a resampled copy with the same `pts`.
pub fn resize_frame(
    frame: Frame,
    target: Resolution,
    filter: ResizeFilter,
) -> Result<Frame, BenchError> {
    if frame.resolution == target {
        return Ok(frame);
    }
    if frame.format != PixelFormat::Rgb24 {
        return Err(BenchError::ResizeFailure(format!(
            "cannot resample {} frames",
            frame.format
        )));
    }
    let Frame {
        resolution,
        pts,
        data,
        ..
    } = frame;
    let src: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(resolution.width(), resolution.height(), data).ok_or_else(|| {
            BenchError::ResizeFailure(format!("buffer does not match {resolution} rgb24"))
        })?;
    let resized = imageops::resize(&src, target.width(), target.height(), filter.filter_type());
    Frame::new(target, PixelFormat::Rgb24, pts, resized.into_raw())
        .map_err(|err| BenchError::ResizeFailure(err.to_string()))
}

/// Resize stage body. Forwards frames in arrival order and ends `output`
/// after `input` ends. Returns the number of frames that needed resampling.
pub fn run_resize_stage(
    target: Resolution,
    filter: ResizeFilter,
    input: &BoundedQueueRx<StageItem>,
    output: StageSender,
) -> Result<usize, BenchError> {
    let mut resampled = 0;
    // A disconnected input without a marker means the source died; ending the
    // stream here lets the coordinator collect the source's error.
    while let Ok(StageItem::Frame(frame)) = input.recv() {
        if frame.resolution != target {
            resampled += 1;
        }
        let frame = resize_frame(frame, target, filter)?;
        if output.send(frame).is_err() {
            debug!("resize stage stopped: downstream closed");
            return Ok(resampled);
        }
    }
    output.finish();
    Ok(resampled)
}
