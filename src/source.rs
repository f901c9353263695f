use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::pipeline::StageSender;
use crate::{BenchError, Frame, FrameDecoder, PixelFormat, Resolution};

pub const DEFAULT_EXTENSIONS: &[&str] = &["png"];

/// Decodes still images into RGB24 frames with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileDecoder;

impl FrameDecoder for ImageFileDecoder {
    fn decode(&self, path: &Path, pts: i64) -> Result<Frame, BenchError> {
        let rgb = image::open(path)
            .map_err(|err| BenchError::DecodeFailure {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?
            .into_rgb8();
        let resolution = Resolution::new(rgb.width(), rgb.height()).map_err(|err| {
            BenchError::DecodeFailure {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Frame::new(resolution, PixelFormat::Rgb24, pts, rgb.into_raw())
    }
}

/// Lists the image files of `dir` in file-name order. Only regular files with
/// one of `extensions` (compared case-insensitively) are kept.
pub fn list_images(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, BenchError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if matches {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Lazy, finite, non-restartable sequence of decoded frames.
pub struct FrameSource {
    paths: std::vec::IntoIter<PathBuf>,
    decoder: Arc<dyn FrameDecoder>,
    frame_count: usize,
    next_pts: i64,
}

impl FrameSource {
    pub fn open(
        dir: &Path,
        decoder: Arc<dyn FrameDecoder>,
        extensions: &[&str],
    ) -> Result<Self, BenchError> {
        let paths = list_images(dir, extensions)?;
        debug!(dir = %dir.display(), files = paths.len(), "listed frame source");
        Ok(Self::from_paths(paths, decoder))
    }

    pub fn from_paths(paths: Vec<PathBuf>, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            frame_count: paths.len(),
            paths: paths.into_iter(),
            decoder,
            next_pts: 0,
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Source stage body: decode every frame into `out`, then end the stream.
    /// Returns the number of frames sent. A closed downstream stops the stage
    /// early without error.
    pub fn run(self, out: StageSender) -> Result<usize, BenchError> {
        let mut sent = 0;
        for frame in self {
            if out.send(frame?).is_err() {
                debug!(sent, "frame source stopped: downstream closed");
                return Ok(sent);
            }
            sent += 1;
        }
        out.finish();
        Ok(sent)
    }
}

impl Iterator for FrameSource {
    type Item = Result<Frame, BenchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let pts = self.next_pts;
        self.next_pts += 1;
        Some(self.decoder.decode(&path, pts))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}
