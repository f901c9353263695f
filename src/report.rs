use std::collections::BTreeMap;
use std::io::{self, Write};
use std::num::NonZeroU32;

use crate::grid::CellFailure;
use crate::{BenchError, CellKey, HwAccel, Resolution, RunResult, TimingPolicy};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Derived, read-only view of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub resolution: Resolution,
    pub codec: String,
    pub hwaccel: HwAccel,
    pub frame_count: usize,
    pub clip_duration_seconds: f64,
    pub time_per_frame_ms: f64,
    pub real_time_ratio: f64,
    pub compressed_size_mb: f64,
    pub extrapolated_1h_size_mb: f64,
    pub mean_call_ms: Option<f64>,
    pub min_call_ms: Option<f64>,
    pub max_call_ms: Option<f64>,
    pub timing: TimingPolicy,
}

impl AggregateRow {
    pub fn from_result(
        key: &CellKey,
        result: &RunResult,
        frame_rate: NonZeroU32,
    ) -> Result<Self, BenchError> {
        if result.frame_count == 0 {
            return Err(BenchError::InvalidConfig(format!(
                "cell {key} encoded no timed frames"
            )));
        }
        let frames = result.frame_count as f64;
        let encode_seconds = result.total_encode_time.as_secs_f64();
        let clip_duration_seconds = frames / f64::from(frame_rate.get());
        let compressed_size_mb = result.total_bytes as f64 / BYTES_PER_MB;
        Ok(Self {
            resolution: key.resolution,
            codec: key.codec.clone(),
            hwaccel: key.hwaccel,
            frame_count: result.frame_count,
            clip_duration_seconds,
            time_per_frame_ms: encode_seconds / frames * 1000.0,
            real_time_ratio: encode_seconds / clip_duration_seconds,
            compressed_size_mb,
            extrapolated_1h_size_mb: compressed_size_mb
                * (SECONDS_PER_HOUR / clip_duration_seconds),
            mean_call_ms: result.mean_call().map(duration_ms),
            min_call_ms: result.min_call.map(duration_ms),
            max_call_ms: result.max_call.map(duration_ms),
            timing: result.timing,
        })
    }
}

fn duration_ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Builds one row per run, sorted by resolution and then by the position of
/// the codec in `codec_order`. Codecs missing from `codec_order` follow the
/// listed ones in name order. All runs must share one timing policy.
pub fn aggregate(
    results: &BTreeMap<CellKey, RunResult>,
    frame_rate: NonZeroU32,
    codec_order: &[String],
) -> Result<Vec<AggregateRow>, BenchError> {
    let mut policies = results.values().map(|r| r.timing);
    if let Some(first) = policies.next() {
        if let Some(other) = policies.find(|p| *p != first) {
            return Err(BenchError::InvalidConfig(format!(
                "cannot report mixed timing conventions ({first}; {other})"
            )));
        }
    }

    let mut rows = results
        .iter()
        .map(|(key, result)| AggregateRow::from_result(key, result, frame_rate))
        .collect::<Result<Vec<_>, _>>()?;
    let rank = |codec: &str| {
        codec_order
            .iter()
            .position(|c| c == codec)
            .unwrap_or(codec_order.len())
    };
    rows.sort_by(|a, b| {
        a.resolution
            .cmp(&b.resolution)
            .then_with(|| rank(&a.codec).cmp(&rank(&b.codec)))
            .then_with(|| a.codec.cmp(&b.codec))
            .then_with(|| a.hwaccel.cmp(&b.hwaccel))
    });
    Ok(rows)
}

/// Display label for a codec: a leading `lib` is dropped.
#[must_use]
pub fn codec_label(codec: &str) -> &str {
    codec.strip_prefix("lib").unwrap_or(codec)
}

pub fn render_markdown<W: Write>(
    out: &mut W,
    rows: &[AggregateRow],
    failures: &[CellFailure],
    frame_rate: NonZeroU32,
) -> io::Result<()> {
    if let Some(first) = rows.first() {
        writeln!(out, "## Benchmark Constants")?;
        writeln!(out, "- **Number of frames encoded:** {}", first.frame_count)?;
        writeln!(out, "- **FPS:** {frame_rate}")?;
        writeln!(
            out,
            "- **Total duration of clip:** {:.2} seconds",
            first.clip_duration_seconds
        )?;
        writeln!(out, "- **Timing:** {}", first.timing)?;
        writeln!(out)?;
    }

    let show_hwaccel = rows.iter().any(|r| r.hwaccel.is_on())
        || failures.iter().any(|f| f.key.hwaccel.is_on());

    writeln!(out, "## Encoding Performance Results")?;
    writeln!(out)?;
    let hw_head = if show_hwaccel { " HW Accel |" } else { "" };
    let hw_rule = if show_hwaccel { "----------|" } else { "" };
    writeln!(
        out,
        "| Resolution | Codec |{hw_head} Encoding Time/Frame (ms) | Real Time Ratio | \
         Compressed Size (MB) | Extrapolated 1h Size (MB) |"
    )?;
    writeln!(
        out,
        "|------------|-------|{hw_rule}--------------------------|-----------------|\
         ----------------------|---------------------------|"
    )?;
    for row in rows {
        let hw_cell = if show_hwaccel {
            format!(" {} |", row.hwaccel)
        } else {
            String::new()
        };
        writeln!(
            out,
            "| {} | {} |{hw_cell} {:.2} | {:.2}x | {:.2} | {:.1} |",
            row.resolution,
            codec_label(&row.codec),
            row.time_per_frame_ms,
            row.real_time_ratio,
            row.compressed_size_mb,
            row.extrapolated_1h_size_mb
        )?;
    }
    writeln!(out)?;
    render_failures(out, failures)
}

/// Per-call latency table for runs that recorded min/max call times.
pub fn render_latency_table<W: Write>(out: &mut W, rows: &[AggregateRow]) -> io::Result<()> {
    writeln!(out, "## Encode Call Latency")?;
    writeln!(out)?;
    writeln!(
        out,
        "| Resolution | Configuration | HW Accel | Avg Time (ms) | Min Time (ms) | \
         Max Time (ms) | FPS |"
    )?;
    writeln!(
        out,
        "|------------|---------------|----------|---------------|---------------|\
         ---------------|-----|"
    )?;
    for row in rows {
        let fps = match row.mean_call_ms {
            Some(avg) if avg > 0.0 => format!("{:.1}", 1000.0 / avg),
            _ => "-".to_string(),
        };
        writeln!(
            out,
            "| {:>10} | {:>13} | {:>8} | {:>13} | {:>13} | {:>13} | {fps} |",
            row.resolution.to_string(),
            row.codec,
            row.hwaccel.to_string(),
            format_ms(row.mean_call_ms),
            format_ms(row.min_call_ms),
            format_ms(row.max_call_ms)
        )?;
    }
    writeln!(out)
}

fn format_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn render_failures<W: Write>(out: &mut W, failures: &[CellFailure]) -> io::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    writeln!(out, "## Cells Without Results")?;
    writeln!(out)?;
    for failure in failures {
        writeln!(
            out,
            "- {} {} (hwaccel {}): {}: {}",
            failure.key.resolution,
            codec_label(&failure.key.codec),
            failure.key.hwaccel,
            failure.kind,
            failure.reason
        )?;
    }
    writeln!(out)
}
