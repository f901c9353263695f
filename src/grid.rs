use std::collections::BTreeMap;
use std::{fmt, fmt::Display};

use tracing::{info, warn};

use crate::{BenchError, CellKey, HwAccel, Resolution, RunResult};

/// Cells are expanded codec-major, then resolution, then hwaccel mode.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub codecs: Vec<String>,
    pub resolutions: Vec<Resolution>,
    pub hwaccel_modes: Vec<HwAccel>,
}

impl GridSpec {
    #[must_use]
    pub fn new(codecs: Vec<String>, resolutions: Vec<Resolution>) -> Self {
        Self {
            codecs,
            resolutions,
            hwaccel_modes: vec![HwAccel::Off],
        }
    }

    #[must_use]
    pub fn with_hwaccel_modes(mut self, modes: Vec<HwAccel>) -> Self {
        self.hwaccel_modes = modes;
        self
    }

    #[must_use]
    pub fn cells(&self) -> Vec<CellKey> {
        let mut cells = Vec::with_capacity(
            self.codecs.len() * self.resolutions.len() * self.hwaccel_modes.len(),
        );
        for codec in &self.codecs {
            for resolution in &self.resolutions {
                for hwaccel in &self.hwaccel_modes {
                    cells.push(CellKey::new(codec.clone(), *resolution, *hwaccel));
                }
            }
        }
        cells
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Skipped,
    Failed,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellFailure {
    pub key: CellKey,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct GridOutcome {
    pub results: BTreeMap<CellKey, RunResult>,
    pub failures: Vec<CellFailure>,
}

impl GridOutcome {
    pub fn record(&mut self, key: CellKey, outcome: Result<RunResult, BenchError>) {
        match outcome {
            Ok(result) => {
                info!(cell = %key, %result, "cell finished");
                self.results.insert(key, result);
            }
            Err(err) => {
                let kind = if err.is_unsupported() {
                    FailureKind::Skipped
                } else {
                    FailureKind::Failed
                };
                warn!(cell = %key, %kind, error = %err, "cell did not produce a result");
                self.failures.push(CellFailure {
                    key,
                    kind,
                    reason: err.to_string(),
                });
            }
        }
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(FailureKind::Skipped)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(FailureKind::Failed)
    }

    fn count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}

/// Runs every cell of `spec` one after another. A failing cell is recorded
/// and the grid moves on; this never returns an error.
pub fn run_grid<F>(spec: &GridSpec, mut run_cell: F) -> GridOutcome
where
    F: FnMut(&CellKey) -> Result<RunResult, BenchError>,
{
    let cells = spec.cells();
    let total = cells.len();
    let mut outcome = GridOutcome::default();
    for (index, key) in cells.into_iter().enumerate() {
        info!(cell = %key, "running cell {}/{}", index + 1, total);
        let result = run_cell(&key);
        outcome.record(key, result);
    }
    outcome
}
