use std::f64::consts::TAU;

use crate::{BenchError, Frame, PixelFormat, Resolution};

const BALL_RADIUS: i64 = 30;
const BALL_AMPLITUDE: f64 = 80.0;
const BALL_COLOR: [u8; 3] = [255, 200, 0];

/// Test card for frame `index` of a clip at `fps`: a vertical gradient with a
/// ball bobbing once per second around the centre.
pub fn make_test_frame(resolution: Resolution, index: i64, fps: u32) -> Result<Frame, BenchError> {
    let width = resolution.width() as usize;
    let height = resolution.height() as usize;
    let mut data = vec![0_u8; PixelFormat::Rgb24.buffer_len(resolution)];

    let phase = TAU * index as f64 / f64::from(fps.max(1));
    let ball_x = (width / 2) as i64;
    let ball_y = (height / 2) as f64 + BALL_AMPLITUDE * phase.sin();
    let radius_sq = (BALL_RADIUS * BALL_RADIUS) as f64;

    for y in 0..height {
        let gradient = [0, (100 * y / height) as u8, (200 * y / height) as u8];
        let dy = y as f64 - ball_y;
        let row = &mut data[y * width * 3..(y + 1) * width * 3];
        for (x, px) in row.chunks_exact_mut(3).enumerate() {
            let dx = (x as i64 - ball_x) as f64;
            let color = if dx * dx + dy * dy < radius_sq {
                BALL_COLOR
            } else {
                gradient
            };
            px.copy_from_slice(&color);
        }
    }
    Frame::new(resolution, PixelFormat::Rgb24, index, data)
}

pub fn make_test_clip(
    resolution: Resolution,
    frame_count: usize,
    fps: u32,
) -> Result<Vec<Frame>, BenchError> {
    (0..frame_count as i64)
        .map(|i| make_test_frame(resolution, i, fps))
        .collect()
}
