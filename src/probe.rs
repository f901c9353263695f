//! Single-threaded, in-memory variant: frames are prepared up front, so only
//! encoder time is on the clock. The first `warmup` submissions absorb
//! one-time setup cost and are excluded from timing.

use tracing::debug;

use crate::encode_stage::EncodeStage;
use crate::synthetic::make_test_clip;
use crate::{
    BenchError, BenchSettings, CellKey, EncoderConfig, EncoderFactory, Frame, RunResult,
    TimingPolicy,
};

pub const DEFAULT_WARMUP: usize = 1;

pub fn encode_in_memory(
    frames: &[Frame],
    key: &CellKey,
    settings: &BenchSettings,
    warmup: usize,
    factory: &dyn EncoderFactory,
) -> Result<RunResult, BenchError> {
    if frames.len() <= warmup {
        return Err(BenchError::InvalidConfig(format!(
            "need more than {warmup} frame(s) to time anything, got {}",
            frames.len()
        )));
    }
    let config = EncoderConfig::new(key, settings);
    let encoder = factory.open(&config)?;
    let mut stage = EncodeStage::new(encoder, config, TimingPolicy::ExcludePriming { warmup });
    for frame in frames {
        stage.submit(frame)?;
    }
    let result = stage.finish()?;
    debug!(cell = %key, %result, "in-memory run finished");
    Ok(result)
}

/// Generates a synthetic clip at the cell's resolution and encodes it.
pub fn run_synthetic_cell(
    key: &CellKey,
    settings: &BenchSettings,
    frame_count: usize,
    warmup: usize,
    factory: &dyn EncoderFactory,
) -> Result<RunResult, BenchError> {
    let frames = make_test_clip(
        key.resolution,
        frame_count + warmup,
        settings.frame_rate.get(),
    )?;
    encode_in_memory(&frames, key, settings, warmup, factory)
}
