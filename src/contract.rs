use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{fmt, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Result<Self, BenchError> {
        match (NonZeroU32::new(width), NonZeroU32::new(height)) {
            (Some(width), Some(height)) => Ok(Self { width, height }),
            _ => Err(BenchError::InvalidConfig(format!(
                "resolution must be positive, got {width}x{height}"
            ))),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width.get()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height.get()
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || BenchError::InvalidConfig(format!("invalid resolution '{s}', expected WxH"));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuv420p,
}

impl PixelFormat {
    #[must_use]
    pub fn buffer_len(self, resolution: Resolution) -> usize {
        let pixels = resolution.pixel_count();
        match self {
            Self::Rgb24 => pixels * 3,
            Self::Yuv420p => {
                let chroma_w = (resolution.width() as usize).div_ceil(2);
                let chroma_h = (resolution.height() as usize).div_ceil(2);
                pixels + 2 * chroma_w * chroma_h
            }
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb24 => f.write_str("rgb24"),
            Self::Yuv420p => f.write_str("yuv420p"),
        }
    }
}

/// One decoded picture. `pts` is the position the frame source assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub pts: i64,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(
        resolution: Resolution,
        format: PixelFormat,
        pts: i64,
        data: Vec<u8>,
    ) -> Result<Self, BenchError> {
        let expected = format.buffer_len(resolution);
        if data.len() != expected {
            return Err(BenchError::InvalidConfig(format!(
                "{format} frame at {resolution} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            resolution,
            format,
            pts,
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub is_keyframe: bool,
}

impl Packet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HwAccel {
    #[default]
    Off,
    On,
}

impl HwAccel {
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On => f.write_str("on"),
        }
    }
}

/// Rate-control options handed to the encoder. Only the keys listed in
/// [`RateControl::KEYS`] are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RateControl {
    pub crf: Option<u32>,
    pub qp: Option<u32>,
    pub bitrate: Option<u64>,
    pub preset: Option<String>,
    pub tune: Option<String>,
}

impl RateControl {
    pub const KEYS: [&'static str; 5] = ["crf", "qp", "b", "preset", "tune"];

    #[must_use]
    pub fn crf(value: u32) -> Self {
        Self {
            crf: Some(value),
            ..Self::default()
        }
    }

    pub fn from_options<I, K, V>(options: I) -> Result<Self, BenchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut out = Self::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                "crf" => out.crf = Some(parse_option(key, value)?),
                "qp" => out.qp = Some(parse_option(key, value)?),
                "b" => out.bitrate = Some(parse_option(key, value)?),
                "preset" => out.preset = Some(value.to_string()),
                "tune" => out.tune = Some(value.to_string()),
                other => {
                    return Err(BenchError::InvalidConfig(format!(
                        "unknown encoder option '{other}' (recognized: {})",
                        Self::KEYS.join(", ")
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Set options as key/value strings in `KEYS` order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(crf) = self.crf {
            pairs.push(("crf", crf.to_string()));
        }
        if let Some(qp) = self.qp {
            pairs.push(("qp", qp.to_string()));
        }
        if let Some(bitrate) = self.bitrate {
            pairs.push(("b", bitrate.to_string()));
        }
        if let Some(preset) = &self.preset {
            pairs.push(("preset", preset.clone()));
        }
        if let Some(tune) = &self.tune {
            pairs.push(("tune", tune.clone()));
        }
        pairs
    }
}

fn parse_option<T: FromStr>(key: &str, value: &str) -> Result<T, BenchError> {
    value.parse::<T>().map_err(|_| {
        BenchError::InvalidConfig(format!("encoder option '{key}' has invalid value '{value}'"))
    })
}

/// Benchmark-wide knobs threaded through the grid runner, pipeline and report.
#[derive(Debug, Clone)]
pub struct BenchSettings {
    pub frame_rate: NonZeroU32,
    pub gop_size: u32,
    pub rate_control: RateControl,
    pub channel_capacity: usize,
}

impl BenchSettings {
    pub const DEFAULT_FRAME_RATE: u32 = 30;
    pub const DEFAULT_GOP_SIZE: u32 = 15;
    pub const DEFAULT_CRF: u32 = 30;
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Result<Self, BenchError> {
        self.frame_rate = NonZeroU32::new(frame_rate).ok_or_else(|| {
            BenchError::InvalidConfig("frame rate must be positive".to_string())
        })?;
        Ok(self)
    }
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            frame_rate: NonZeroU32::new(Self::DEFAULT_FRAME_RATE).unwrap_or(NonZeroU32::MIN),
            gop_size: Self::DEFAULT_GOP_SIZE,
            rate_control: RateControl::crf(Self::DEFAULT_CRF),
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub codec: String,
    pub hwaccel: HwAccel,
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    pub frame_rate: NonZeroU32,
    pub max_b_frames: u32,
    pub gop_size: u32,
    pub rate_control: RateControl,
}

impl EncoderConfig {
    #[must_use]
    pub fn new(key: &CellKey, settings: &BenchSettings) -> Self {
        Self {
            codec: key.codec.clone(),
            hwaccel: key.hwaccel,
            pixel_format: PixelFormat::Yuv420p,
            resolution: key.resolution,
            frame_rate: settings.frame_rate,
            max_b_frames: 0,
            gop_size: settings.gop_size,
            rate_control: settings.rate_control.clone(),
        }
    }

    /// Numerator and denominator of one tick.
    #[must_use]
    pub fn time_base(&self) -> (i32, i32) {
        (1, i32::try_from(self.frame_rate.get()).unwrap_or(i32::MAX))
    }
}

impl Display for EncoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncoderConfig(codec={}, hwaccel={}, {} {}, fps={}, gop={}, bf={})",
            self.codec,
            self.hwaccel,
            self.resolution,
            self.pixel_format,
            self.frame_rate,
            self.gop_size,
            self.max_b_frames
        )
    }
}

/// One grid cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub codec: String,
    pub resolution: Resolution,
    pub hwaccel: HwAccel,
}

impl CellKey {
    #[must_use]
    pub fn new(codec: impl Into<String>, resolution: Resolution, hwaccel: HwAccel) -> Self {
        Self {
            codec: codec.into(),
            resolution,
            hwaccel,
        }
    }
}

impl Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.resolution, self.codec)?;
        if self.hwaccel.is_on() {
            f.write_str("-hw")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPolicy {
    /// Every encode call and the flush are timed.
    Uniform,
    /// The first `warmup` submissions are neither timed nor counted as frames.
    ExcludePriming { warmup: usize },
}

impl Display for TimingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => f.write_str("every encode call timed"),
            Self::ExcludePriming { warmup } => {
                write!(f, "first {warmup} encode call(s) excluded from timing")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub frame_count: usize,
    /// Timed encode calls plus the final flush.
    pub total_encode_time: Duration,
    /// Share of `total_encode_time` spent draining the encoder.
    pub flush_time: Duration,
    pub total_bytes: u64,
    pub packet_count: usize,
    pub keyframe_count: usize,
    pub min_call: Option<Duration>,
    pub max_call: Option<Duration>,
    pub timing: TimingPolicy,
}

impl RunResult {
    /// Mean duration of a timed `encode` call; the flush is not a call.
    #[must_use]
    pub fn mean_call(&self) -> Option<Duration> {
        let frames = u32::try_from(self.frame_count).ok().filter(|n| *n > 0)?;
        Some(self.total_encode_time.saturating_sub(self.flush_time) / frames)
    }
}

impl Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunResult(frames={}, time={:?}, flush={:?}, bytes={}, packets={}, keyframes={})",
            self.frame_count,
            self.total_encode_time,
            self.flush_time,
            self.total_bytes,
            self.packet_count,
            self.keyframe_count
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("failed to decode {}: {reason}", path.display())]
    DecodeFailure { path: PathBuf, reason: String },
    #[error("resize failed: {0}")]
    ResizeFailure(String),
    #[error("encoder unsupported: {0}")]
    EncoderUnsupported(String),
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("pipeline stage failed: {0}")]
    StageFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BenchError {
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::EncoderUnsupported(_))
    }
}

pub trait FrameDecoder: Send + Sync {
    fn decode(&self, path: &Path, pts: i64) -> Result<Frame, BenchError>;
}

pub trait VideoEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError>;

    /// Drain packets still buffered inside the encoder.
    fn flush(&mut self) -> Result<Vec<Packet>, BenchError>;

    /// Finalize internal buffers. Called exactly once per opened encoder.
    fn release(&mut self);
}

pub trait EncoderFactory {
    fn open(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError>;
}

impl<F> EncoderFactory for F
where
    F: Fn(&EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError>,
{
    fn open(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError> {
        self(config)
    }
}
