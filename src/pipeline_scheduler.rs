//! Source → resize → encode coordinator for one grid cell.
//!
//! ```text
//! [frame-source thread] --A--> [resize thread] --B--> [calling thread: encode]
//! ```
//!
//! Both channels are bounded by `BenchSettings::channel_capacity`; a full
//! channel blocks its producer. Every stage ends its output with exactly one
//! `EndOfStream`, also when it fails, so the encode loop always terminates.
//! Stage errors are collected by joining the workers after the loop.

use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::encode_stage::EncodeStage;
use crate::pipeline::{BoundedQueueRx, QueueStats, StageItem, stage_channel};
use crate::resize::{ResizeFilter, run_resize_stage};
use crate::source::FrameSource;
use crate::{
    BenchError, BenchSettings, CellKey, EncoderConfig, EncoderFactory, RunResult, TimingPolicy,
};

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub result: RunResult,
    pub source_frames: usize,
    pub resampled_frames: usize,
    pub decode_queue: QueueStats,
    pub resize_queue: QueueStats,
}

pub fn run_pipeline(
    source: FrameSource,
    key: &CellKey,
    settings: &BenchSettings,
    filter: ResizeFilter,
    factory: &dyn EncoderFactory,
) -> Result<PipelineRun, BenchError> {
    let config = EncoderConfig::new(key, settings);
    let encoder = factory.open(&config)?;
    debug!(%config, "encoder opened");
    let mut stage = EncodeStage::new(encoder, config, TimingPolicy::Uniform);

    let target = key.resolution;
    let (source_tx, source_rx) = stage_channel(settings.channel_capacity);
    let (resize_tx, resize_rx) = stage_channel(settings.channel_capacity);

    let decode_probe = source_rx.probe();
    let resize_probe = resize_rx.probe();

    let source_worker = thread::Builder::new()
        .name("frame-source".to_string())
        .spawn(move || source.run(source_tx))?;
    let resize_worker = thread::Builder::new()
        .name("resize".to_string())
        .spawn(move || run_resize_stage(target, filter, &source_rx, resize_tx))?;

    let drained = drive_encoder(&mut stage, &resize_rx);
    // Unblocks the resize worker if the encode loop bailed out early.
    drop(resize_rx);

    let source_outcome = join_stage("frame source", source_worker);
    let resize_outcome = join_stage("resize", resize_worker);
    let source_frames = source_outcome?;
    let resampled_frames = resize_outcome?;
    drained?;
    let decode_queue = decode_probe.stats();
    let resize_queue = resize_probe.stats();

    let result = stage.finish()?;
    if result.frame_count == 0 {
        return Err(BenchError::StageFailed(format!("cell {key} encoded no frames")));
    }
    if result.frame_count != source_frames {
        warn!(
            cell = %key,
            source_frames,
            encoded = result.frame_count,
            "frame count mismatch between source and encoder"
        );
    }
    info!(
        cell = %key,
        frames = result.frame_count,
        bytes = result.total_bytes,
        encode_time = ?result.total_encode_time,
        decode_peak = decode_queue.peak_depth,
        resize_peak = resize_queue.peak_depth,
        "pipeline run finished"
    );
    Ok(PipelineRun {
        result,
        source_frames,
        resampled_frames,
        decode_queue,
        resize_queue,
    })
}

fn drive_encoder(
    stage: &mut EncodeStage,
    input: &BoundedQueueRx<StageItem>,
) -> Result<(), BenchError> {
    loop {
        match input.recv() {
            Ok(StageItem::Frame(frame)) => stage.submit(&frame)?,
            Ok(StageItem::EndOfStream) => return Ok(()),
            Err(err) => {
                return Err(BenchError::StageFailed(format!(
                    "resize channel closed without end-of-stream: {err:?}"
                )));
            }
        }
    }
}

fn join_stage<T>(name: &str, worker: JoinHandle<Result<T, BenchError>>) -> Result<T, BenchError> {
    worker
        .join()
        .map_err(|_| BenchError::StageFailed(format!("{name} thread panicked")))?
}
