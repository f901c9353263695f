use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::{BenchError, EncoderConfig, Frame, Packet, RunResult, TimingPolicy, VideoEncoder};

/// Owns one opened encoder for the length of a run and accumulates its
/// timing and output size. The encoder is released exactly once: by
/// [`EncodeStage::finish`], or by `Drop` on any other exit path.
pub struct EncodeStage {
    encoder: Option<Box<dyn VideoEncoder>>,
    config: EncoderConfig,
    policy: TimingPolicy,
    submitted: usize,
    frame_count: usize,
    total_encode_time: Duration,
    flush_time: Duration,
    total_bytes: u64,
    packet_count: usize,
    keyframe_count: usize,
    min_call: Option<Duration>,
    max_call: Option<Duration>,
}

impl EncodeStage {
    pub fn new(
        encoder: Box<dyn VideoEncoder>,
        config: EncoderConfig,
        policy: TimingPolicy,
    ) -> Self {
        Self {
            encoder: Some(encoder),
            config,
            policy,
            submitted: 0,
            frame_count: 0,
            total_encode_time: Duration::ZERO,
            flush_time: Duration::ZERO,
            total_bytes: 0,
            packet_count: 0,
            keyframe_count: 0,
            min_call: None,
            max_call: None,
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn submit(&mut self, frame: &Frame) -> Result<(), BenchError> {
        if frame.resolution != self.config.resolution {
            return Err(BenchError::EncodeFailure(format!(
                "frame {} is {} but the encoder expects {}",
                frame.pts, frame.resolution, self.config.resolution
            )));
        }
        let encoder = self.encoder_mut()?;
        let start = Instant::now();
        let packets = encoder.encode(frame)?;
        let elapsed = start.elapsed();

        let timed = match self.policy {
            TimingPolicy::Uniform => true,
            TimingPolicy::ExcludePriming { warmup } => self.submitted >= warmup,
        };
        self.submitted += 1;
        if timed {
            self.frame_count += 1;
            self.record_call(elapsed);
        } else {
            trace!(pts = frame.pts, ?elapsed, "priming call excluded from timing");
        }
        self.account(&packets);
        Ok(())
    }

    /// Drain the encoder, release it and return the run's totals.
    pub fn finish(mut self) -> Result<RunResult, BenchError> {
        let encoder = self.encoder_mut()?;
        let start = Instant::now();
        let flushed = encoder.flush();
        let elapsed = start.elapsed();
        let packets = flushed?;
        self.total_encode_time += elapsed;
        self.flush_time = elapsed;
        debug!(
            codec = %self.config.codec,
            trailing_packets = packets.len(),
            ?elapsed,
            "encoder flushed"
        );
        self.account(&packets);
        self.release();
        Ok(RunResult {
            frame_count: self.frame_count,
            total_encode_time: self.total_encode_time,
            flush_time: self.flush_time,
            total_bytes: self.total_bytes,
            packet_count: self.packet_count,
            keyframe_count: self.keyframe_count,
            min_call: self.min_call,
            max_call: self.max_call,
            timing: self.policy,
        })
    }

    fn encoder_mut(&mut self) -> Result<&mut Box<dyn VideoEncoder>, BenchError> {
        self.encoder
            .as_mut()
            .ok_or_else(|| BenchError::EncodeFailure("encoder already released".to_string()))
    }

    fn record_call(&mut self, elapsed: Duration) {
        self.total_encode_time += elapsed;
        self.min_call = Some(self.min_call.map_or(elapsed, |m| m.min(elapsed)));
        self.max_call = Some(self.max_call.map_or(elapsed, |m| m.max(elapsed)));
    }

    fn account(&mut self, packets: &[Packet]) {
        self.packet_count += packets.len();
        self.keyframe_count += packets.iter().filter(|p| p.is_keyframe).count();
        self.total_bytes += packets.iter().map(|p| p.len() as u64).sum::<u64>();
    }

    fn release(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release();
            debug!(codec = %self.config.codec, "encoder released");
        }
    }
}

impl Drop for EncodeStage {
    fn drop(&mut self) {
        self.release();
    }
}
