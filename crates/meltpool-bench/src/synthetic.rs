//! Synthetic melt pool stacks.
//!
//! Frames show a bright background layer above darker material, with a
//! half-disc melt pool centred on the laser position at the surface row.
//! The laser moves at a constant speed, so the ground-truth trajectory is
//! `position = speed * t + start`.

use meltpool_pipeline::{LinearTrajectory, Orientation};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters of a generated stack.
#[derive(Debug, Clone, Copy)]
pub struct Scene {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
    /// Laser displacement per frame, in pixels.
    pub speed: f64,
    /// Laser position in frame 0.
    pub start: f64,
    /// First material row.
    pub surface_row: usize,
    pub pool_radius: f64,
    /// Half-width of the uniform noise added to every pixel.
    pub noise: u16,
    pub seed: u64,
}

const BACKGROUND: u16 = 3000;
const MATERIAL: u16 = 1200;
const POOL: u16 = 600;

impl Scene {
    /// Ground-truth trajectory of the laser.
    pub const fn trajectory(&self) -> LinearTrajectory {
        LinearTrajectory::new(self.speed, self.start, Orientation::PositionOverTime)
    }

    /// Render the stack.
    #[allow(clippy::cast_precision_loss)]
    pub fn render(&self) -> Array3<u16> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let surface = self.surface_row as f64;
        let noise = i32::from(self.noise);
        Array3::from_shape_fn((self.frames, self.height, self.width), |(t, y, x)| {
            let position = self.speed.mul_add(t as f64, self.start);
            let base = if y < self.surface_row {
                BACKGROUND
            } else if (x as f64 - position).hypot(y as f64 - surface) <= self.pool_radius {
                POOL
            } else {
                MATERIAL
            };
            let jitter = if noise == 0 {
                0
            } else {
                rng.random_range(-noise..=noise)
            };
            u16::try_from((i32::from(base) + jitter).max(0)).unwrap_or(u16::MAX)
        })
    }
}
