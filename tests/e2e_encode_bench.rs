use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use encode_bench::{
    BenchError, BenchSettings, CellKey, EncoderConfig, EncoderFactory, Frame, FrameDecoder,
    FrameSource, GridSpec, HwAccel, ImageFileDecoder, Packet, PixelFormat, ResizeFilter,
    Resolution, VideoEncoder, aggregate, render_latency_table, render_markdown, run_grid,
    run_pipeline, run_synthetic_cell,
};
use rstest::rstest;

fn res(width: u32, height: u32) -> Resolution {
    Resolution::new(width, height).expect("valid resolution")
}

fn fake_paths(count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| PathBuf::from(format!("frame-{i:04}.png")))
        .collect()
}

/// Produces flat frames without touching the filesystem; fails on one index.
struct SyntheticDecoder {
    resolution: Resolution,
    fail_at: Option<i64>,
}

impl FrameDecoder for SyntheticDecoder {
    fn decode(&self, path: &Path, pts: i64) -> Result<Frame, BenchError> {
        if self.fail_at == Some(pts) {
            return Err(BenchError::DecodeFailure {
                path: path.to_path_buf(),
                reason: "injected".to_string(),
            });
        }
        let len = PixelFormat::Rgb24.buffer_len(self.resolution);
        Frame::new(
            self.resolution,
            PixelFormat::Rgb24,
            pts,
            vec![(pts % 251) as u8; len],
        )
    }
}

#[derive(Default)]
struct EncoderLog {
    pts: Mutex<Vec<i64>>,
    sizes: Mutex<Vec<usize>>,
    released: AtomicUsize,
}

/// Emits one packet per frame whose size depends on its pts, holding the
/// last one back until flush.
struct RecordingEncoder {
    log: Arc<EncoderLog>,
    held: Option<Packet>,
}

impl VideoEncoder for RecordingEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError> {
        self.log.pts.lock().unwrap().push(frame.pts);
        let packet = Packet {
            data: vec![0; 10 + (frame.pts as usize % 7)],
            pts: Some(frame.pts),
            is_keyframe: frame.pts == 0,
        };
        self.log.sizes.lock().unwrap().push(packet.len());
        Ok(self.held.replace(packet).into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<Packet>, BenchError> {
        Ok(self.held.take().into_iter().collect())
    }

    fn release(&mut self) {
        self.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn recording_factory(
    log: &Arc<EncoderLog>,
) -> impl Fn(&EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError> {
    let log = Arc::clone(log);
    move |_: &EncoderConfig| -> Result<Box<dyn VideoEncoder>, BenchError> {
        Ok(Box::new(RecordingEncoder {
            log: Arc::clone(&log),
            held: None,
        }))
    }
}

fn settings_with_capacity(capacity: usize) -> BenchSettings {
    BenchSettings {
        channel_capacity: capacity,
        ..BenchSettings::default()
    }
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(8)]
fn e2e_frames_reach_encoder_in_source_order(#[case] capacity: usize) {
    let log = Arc::new(EncoderLog::default());
    let decoder = Arc::new(SyntheticDecoder {
        resolution: res(32, 24),
        fail_at: None,
    });
    let source = FrameSource::from_paths(fake_paths(40), decoder);
    let key = CellKey::new("recording", res(16, 12), HwAccel::Off);

    let run = run_pipeline(
        source,
        &key,
        &settings_with_capacity(capacity),
        ResizeFilter::Nearest,
        &recording_factory(&log),
    )
    .expect("pipeline should succeed");

    let pts = log.pts.lock().unwrap().clone();
    assert_eq!(pts, (0..40).collect::<Vec<_>>());
    assert_eq!(run.result.frame_count, 40);
    assert_eq!(run.source_frames, 40);
    assert_eq!(run.resampled_frames, 40);
    assert_eq!(run.decode_queue.sent, 41);
    assert_eq!(log.released.load(Ordering::SeqCst), 1);
}

#[test]
fn e2e_total_bytes_is_sum_of_all_packets_including_flush() {
    let log = Arc::new(EncoderLog::default());
    let decoder = Arc::new(SyntheticDecoder {
        resolution: res(16, 16),
        fail_at: None,
    });
    let source = FrameSource::from_paths(fake_paths(23), decoder);
    let key = CellKey::new("recording", res(16, 16), HwAccel::Off);

    let run = run_pipeline(
        source,
        &key,
        &BenchSettings::default(),
        ResizeFilter::default(),
        &recording_factory(&log),
    )
    .expect("pipeline should succeed");

    let expected: usize = log.sizes.lock().unwrap().iter().sum();
    assert_eq!(run.result.total_bytes, expected as u64);
    assert_eq!(run.result.packet_count, 23);
    // Frames already at the target size pass through untouched.
    assert_eq!(run.resampled_frames, 0);
}

#[rstest]
#[case(0, 1)]
#[case(3, 1)]
#[case(11, 1)]
#[case(11, 8)]
fn e2e_decode_failure_surfaces_without_deadlock(#[case] fail_at: i64, #[case] capacity: usize) {
    let log = Arc::new(EncoderLog::default());
    let (done_tx, done_rx) = mpsc::channel();
    {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            let decoder = Arc::new(SyntheticDecoder {
                resolution: res(32, 24),
                fail_at: Some(fail_at),
            });
            let source = FrameSource::from_paths(fake_paths(30), decoder);
            let key = CellKey::new("recording", res(16, 12), HwAccel::Off);
            let outcome = run_pipeline(
                source,
                &key,
                &settings_with_capacity(capacity),
                ResizeFilter::Nearest,
                &recording_factory(&log),
            );
            let _ = done_tx.send(outcome.map(|run| run.result.frame_count));
        });
    }

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("pipeline must finish");
    match outcome {
        Err(BenchError::DecodeFailure { path, .. }) => {
            assert_eq!(path, PathBuf::from(format!("frame-{fail_at:04}.png")));
        }
        other => panic!("expected a decode failure, got {other:?}"),
    }
    assert_eq!(log.released.load(Ordering::SeqCst), 1);
    assert!(log.pts.lock().unwrap().len() <= fail_at as usize);
}

struct FailingEncoder {
    fail_at: i64,
    released: Arc<AtomicUsize>,
}

impl VideoEncoder for FailingEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError> {
        if frame.pts == self.fail_at {
            return Err(BenchError::EncodeFailure(format!("rejected pts {}", frame.pts)));
        }
        Ok(Vec::new())
    }

    fn flush(&mut self) -> Result<Vec<Packet>, BenchError> {
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn e2e_encode_failure_stops_upstream_stages() {
    let released = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    {
        let released = Arc::clone(&released);
        thread::spawn(move || {
            let factory = move |_: &EncoderConfig| -> Result<Box<dyn VideoEncoder>, BenchError> {
                Ok(Box::new(FailingEncoder {
                    fail_at: 2,
                    released: Arc::clone(&released),
                }))
            };
            let decoder = Arc::new(SyntheticDecoder {
                resolution: res(8, 8),
                fail_at: None,
            });
            let source = FrameSource::from_paths(fake_paths(500), decoder);
            let key = CellKey::new("failing", res(8, 8), HwAccel::Off);
            let outcome = run_pipeline(
                source,
                &key,
                &settings_with_capacity(1),
                ResizeFilter::Nearest,
                &factory,
            );
            let _ = done_tx.send(outcome.map(|run| run.result.frame_count));
        });
    }

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("pipeline must finish");
    assert!(matches!(outcome, Err(BenchError::EncodeFailure(_))));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

/// Emits RGB frames except for one planar YUV frame the resizer cannot resample.
struct PlanarAtDecoder {
    planar_at: i64,
}

impl FrameDecoder for PlanarAtDecoder {
    fn decode(&self, _path: &Path, pts: i64) -> Result<Frame, BenchError> {
        let (format, resolution) = if pts == self.planar_at {
            (PixelFormat::Yuv420p, res(10, 10))
        } else {
            (PixelFormat::Rgb24, res(32, 24))
        };
        Frame::new(resolution, format, pts, vec![0; format.buffer_len(resolution)])
    }
}

#[rstest]
#[case(0, 1)]
#[case(5, 1)]
#[case(5, 8)]
fn e2e_resize_failure_is_fatal_to_the_cell(#[case] planar_at: i64, #[case] capacity: usize) {
    let log = Arc::new(EncoderLog::default());
    let (done_tx, done_rx) = mpsc::channel();
    {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            let source = FrameSource::from_paths(
                fake_paths(200),
                Arc::new(PlanarAtDecoder { planar_at }),
            );
            let key = CellKey::new("recording", res(16, 12), HwAccel::Off);
            let outcome = run_pipeline(
                source,
                &key,
                &settings_with_capacity(capacity),
                ResizeFilter::Triangle,
                &recording_factory(&log),
            );
            let _ = done_tx.send(outcome.map(|run| run.result.frame_count));
        });
    }

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("pipeline must finish");
    assert!(
        matches!(outcome, Err(BenchError::ResizeFailure(_))),
        "expected a resize failure, got {outcome:?}"
    );
    assert_eq!(log.released.load(Ordering::SeqCst), 1);
    assert_eq!(*log.pts.lock().unwrap(), (0..planar_at).collect::<Vec<_>>());
}

#[test]
fn e2e_empty_sources_are_failed_cells_not_a_failed_report() {
    let codecs = vec!["a".to_string(), "b".to_string()];
    let spec = GridSpec::new(codecs.clone(), vec![res(8, 8)]);
    let settings = BenchSettings::default();
    let log = Arc::new(EncoderLog::default());
    let factory = recording_factory(&log);

    let outcome = run_grid(&spec, |key| {
        let source = FrameSource::from_paths(
            Vec::new(),
            Arc::new(SyntheticDecoder {
                resolution: res(8, 8),
                fail_at: None,
            }),
        );
        run_pipeline(source, key, &settings, ResizeFilter::Nearest, &factory)
            .map(|run| run.result)
    });

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.failed(), 2);
    assert_eq!(log.released.load(Ordering::SeqCst), 2);
    let rows = aggregate(&outcome.results, settings.frame_rate, &codecs)
        .expect("an empty result set still aggregates");
    assert!(rows.is_empty());
}

/// Quick encode calls followed by a slow drain.
struct SlowFlushEncoder {
    flush_delay: Duration,
}

impl VideoEncoder for SlowFlushEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError> {
        thread::sleep(Duration::from_millis(1));
        Ok(vec![Packet {
            data: vec![0; 8],
            pts: Some(frame.pts),
            is_keyframe: frame.pts == 0,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Packet>, BenchError> {
        thread::sleep(self.flush_delay);
        Ok(Vec::new())
    }

    fn release(&mut self) {}
}

#[test]
fn e2e_latency_average_stays_within_min_and_max_with_slow_flush() {
    let factory = |_: &EncoderConfig| -> Result<Box<dyn VideoEncoder>, BenchError> {
        Ok(Box::new(SlowFlushEncoder {
            flush_delay: Duration::from_millis(200),
        }))
    };
    let key = CellKey::new("slowflush", res(64, 48), HwAccel::Off);
    let settings = BenchSettings::default();
    let result = run_synthetic_cell(&key, &settings, 10, 1, &factory).expect("synthetic run");
    assert!(result.flush_time >= Duration::from_millis(200));

    let mut results = std::collections::BTreeMap::new();
    results.insert(key, result);
    let rows = aggregate(&results, settings.frame_rate, &[]).expect("aggregate");
    let row = &rows[0];
    let (avg, min, max) = (
        row.mean_call_ms.expect("avg"),
        row.min_call_ms.expect("min"),
        row.max_call_ms.expect("max"),
    );
    assert!(min <= avg && avg <= max, "avg {avg} outside [{min}, {max}]");
    assert!(row.time_per_frame_ms > avg);

    let mut out = Vec::new();
    render_latency_table(&mut out, &rows).expect("render latency");
    let text = String::from_utf8(out).expect("utf8 report");
    assert!(text.contains(&format!("{avg:.2}")));
}

struct NullEncoder;

impl VideoEncoder for NullEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, BenchError> {
        Ok(vec![Packet {
            data: vec![0; frame.resolution.width() as usize],
            pts: Some(frame.pts),
            is_keyframe: false,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Packet>, BenchError> {
        Ok(Vec::new())
    }

    fn release(&mut self) {}
}

fn codec_zoo_factory(config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, BenchError> {
    match config.codec.as_str() {
        "h264_nvenc" => Err(BenchError::EncoderUnsupported(
            "no NVENC device present".to_string(),
        )),
        _ => Ok(Box::new(NullEncoder)),
    }
}

#[test]
fn e2e_grid_skips_unsupported_codec_and_reports_the_rest() {
    let codecs = vec![
        "libx264".to_string(),
        "h264_nvenc".to_string(),
        "libsvtav1".to_string(),
    ];
    let spec = GridSpec::new(codecs.clone(), vec![res(64, 48), res(32, 24)]);
    let settings = BenchSettings::default();
    let decoder: Arc<dyn FrameDecoder> = Arc::new(SyntheticDecoder {
        resolution: res(64, 48),
        fail_at: None,
    });
    let paths = fake_paths(6);

    let outcome = run_grid(&spec, |key| {
        let source = FrameSource::from_paths(paths.clone(), Arc::clone(&decoder));
        run_pipeline(
            source,
            key,
            &settings,
            ResizeFilter::Triangle,
            &codec_zoo_factory,
        )
        .map(|run| run.result)
    });

    assert_eq!(outcome.results.len(), 4);
    assert_eq!(outcome.skipped(), 2);
    assert_eq!(outcome.failed(), 0);
    assert!(
        outcome
            .failures
            .iter()
            .all(|f| f.key.codec == "h264_nvenc")
    );

    let rows = aggregate(&outcome.results, settings.frame_rate, &codecs).expect("aggregate");
    let order: Vec<_> = rows
        .iter()
        .map(|r| format!("{} {}", r.resolution, r.codec))
        .collect();
    assert_eq!(
        order,
        vec![
            "32x24 libx264",
            "32x24 libsvtav1",
            "64x48 libx264",
            "64x48 libsvtav1",
        ]
    );

    let mut out = Vec::new();
    render_markdown(&mut out, &rows, &outcome.failures, settings.frame_rate)
        .expect("render report");
    let text = String::from_utf8(out).expect("utf8 report");
    assert!(text.contains("| 32x24 | x264 |"));
    assert!(text.contains("| 64x48 | svtav1 |"));
    assert!(text.contains("## Cells Without Results"));
    assert!(!text.contains("HW Accel"));
}

#[test]
fn e2e_image_directory_runs_through_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    for i in 0..5_u8 {
        let img = image::RgbImage::from_pixel(40, 30, image::Rgb([i * 40, 10, 200]));
        img.save(dir.path().join(format!("img_{i:03}.png")))
            .expect("write png");
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

    let source = FrameSource::open(
        dir.path(),
        Arc::new(ImageFileDecoder),
        encode_bench::source::DEFAULT_EXTENSIONS,
    )
    .expect("open source");
    assert_eq!(source.frame_count(), 5);

    let log = Arc::new(EncoderLog::default());
    let key = CellKey::new("recording", res(20, 16), HwAccel::Off);
    let run = run_pipeline(
        source,
        &key,
        &BenchSettings::default(),
        ResizeFilter::Triangle,
        &recording_factory(&log),
    )
    .expect("pipeline should succeed");
    assert_eq!(run.result.frame_count, 5);
    assert_eq!(run.resampled_frames, 5);
    assert_eq!(*log.pts.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn e2e_unsupported_factory_spawns_no_work() {
    let factory = encode_bench::UnsupportedEncoderFactory::new("test build");
    let decoder = Arc::new(SyntheticDecoder {
        resolution: res(8, 8),
        fail_at: Some(0),
    });
    let source = FrameSource::from_paths(fake_paths(3), decoder);
    let key = CellKey::new("libx264", res(8, 8), HwAccel::Off);
    let err = match run_pipeline(
        source,
        &key,
        &BenchSettings::default(),
        ResizeFilter::Nearest,
        &factory as &dyn EncoderFactory,
    ) {
        Ok(_) => panic!("unsupported encoder must not run"),
        Err(err) => err,
    };
    // The decoder would fail on its first frame if the source had started.
    assert!(err.is_unsupported());
}

#[test]
fn e2e_synthetic_cells_exclude_warmup_from_timing() {
    let log = Arc::new(EncoderLog::default());
    let key = CellKey::new("recording", res(64, 48), HwAccel::On);
    let factory = recording_factory(&log);
    let result = run_synthetic_cell(&key, &BenchSettings::default(), 12, 3, &factory)
        .expect("synthetic run");
    assert_eq!(result.frame_count, 12);
    assert_eq!(log.pts.lock().unwrap().len(), 15);
    let expected: usize = log.sizes.lock().unwrap().iter().sum();
    assert_eq!(result.total_bytes, expected as u64);
    assert!(result.min_call <= result.max_call);
}
