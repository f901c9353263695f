mod contract;
pub mod encode_stage;
#[cfg(feature = "backend-ffmpeg")]
pub mod ffmpeg_backend;
pub mod grid;
pub mod pipeline;
pub mod pipeline_scheduler;
pub mod probe;
pub mod report;
pub mod resize;
pub mod source;
pub mod synthetic;

pub use contract::{
    BenchError, BenchSettings, CellKey, EncoderConfig, EncoderFactory, Frame, FrameDecoder,
    HwAccel, Packet, PixelFormat, RateControl, Resolution, RunResult, TimingPolicy, VideoEncoder,
};
pub use grid::{CellFailure, FailureKind, GridOutcome, GridSpec, run_grid};
pub use pipeline::{
    BoundedQueueRx, BoundedQueueTx, QueueProbe, QueueRecvError, QueueSendError, QueueStats,
    StageItem, StageSender, bounded_queue, stage_channel,
};
pub use pipeline_scheduler::{PipelineRun, run_pipeline};
pub use probe::{encode_in_memory, run_synthetic_cell};
pub use report::{AggregateRow, aggregate, codec_label, render_latency_table, render_markdown};
pub use resize::{ResizeFilter, resize_frame};
pub use source::{FrameSource, ImageFileDecoder, list_images};

/// Codec list used when none is given on the command line.
pub const DEFAULT_CODECS: &[&str] = &["libx264", "h264_nvenc", "libsvtav1", "av1_nvenc"];

/// Resolution list used when none is given on the command line.
pub const DEFAULT_RESOLUTIONS: &[(u32, u32)] = &[
    (320, 240),
    (640, 480),
    (848, 480),
    (1280, 800),
    (1920, 1080),
];

/// Encoder factory for this build: libavcodec with `backend-ffmpeg`,
/// otherwise one that reports every codec as unsupported.
pub fn default_encoder_factory() -> Result<Box<dyn EncoderFactory>, BenchError> {
    #[cfg(feature = "backend-ffmpeg")]
    {
        Ok(Box::new(ffmpeg_backend::FfmpegEncoderFactory::new()?))
    }
    #[cfg(not(feature = "backend-ffmpeg"))]
    {
        Ok(Box::new(UnsupportedEncoderFactory::new(
            "built without an encoder backend; enable the `backend-ffmpeg` feature",
        )))
    }
}

/// Fails every `open` with [`BenchError::EncoderUnsupported`], so a grid
/// still runs to completion and lists every cell as skipped.
#[derive(Debug, Clone)]
pub struct UnsupportedEncoderFactory {
    message: String,
}

impl UnsupportedEncoderFactory {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl EncoderFactory for UnsupportedEncoderFactory {
    fn open(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError> {
        Err(BenchError::EncoderUnsupported(format!(
            "{} ({})",
            config.codec, self.message
        )))
    }
}
