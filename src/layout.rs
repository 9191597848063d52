//! Deterministic, non-overlapping layout positions for projected graphs.
//!
//! ## Algorithm
//!
//! 1. Sample x uniformly from `[min_coord, max_x_coord)` and y from
//!    `[min_coord, max_y_coord)` with a seeded RNG
//! 2. Snap each down to the nearest multiple of `x_multiple` / `y_multiple`
//! 3. Resample on collision until the band holds distinct x values and
//!    distinct y values, then pair them up in draw order
//!
//! Grid steps are chosen wider than a rendered node, so two positions that
//! differ in a snapped coordinate never overlap.
//!
//! ## Pool exhaustion
//!
//! A band can hold at most `min(x slots, y slots)` positions (and never more
//! than `positions`). Further positions come from additional bands, each
//! shifted down by one full band height, so the whole sequence stays
//! non-overlapping. The sequence is prefix-stable: the first `n` positions
//! are the same no matter how many are requested.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::canonical_hash_hex;
use crate::types::Position;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A coordinate range is empty.
    #[error("Empty coordinate range for {axis}: [{min}, {max})")]
    EmptyRange {
        /// Axis name.
        axis: &'static str,
        /// Inclusive lower bound.
        min: i32,
        /// Exclusive upper bound.
        max: i32,
    },
    /// A grid step is not positive.
    #[error("Grid step for {axis} must be positive, got {step}")]
    NonPositiveStep {
        /// Axis name.
        axis: &'static str,
        /// Configured step.
        step: i32,
    },
    /// A coordinate bound lies outside the supported layout range.
    #[error("Coordinate {value} for {axis} is outside [-{limit}, {limit}]", limit = MAX_LAYOUT_COORD)]
    CoordOutOfRange {
        /// Axis name.
        axis: &'static str,
        /// Configured bound.
        value: i32,
    },
    /// An environment variable could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Largest coordinate magnitude `validate` accepts.
pub const MAX_LAYOUT_COORD: i32 = 1 << 20;

/// Layout parameters for projections.
///
/// ## Parameters
///
/// - `positions`: Pool size per band (default 10)
/// - `min_coord`: Lower bound for both axes (default 10)
/// - `max_x_coord` / `max_y_coord`: Exclusive upper bounds (700 / 600)
/// - `x_multiple` / `y_multiple`: Grid steps (50 / 30)
/// - `center`: Position of the focal node (250, 25)
/// - `seed`: RNG seed; same seed, same layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Number of positions per band.
    pub positions: usize,
    /// Inclusive lower bound for x and y.
    pub min_coord: i32,
    /// Exclusive upper bound for x.
    pub max_x_coord: i32,
    /// Exclusive upper bound for y.
    pub max_y_coord: i32,
    /// Grid step for x.
    pub x_multiple: i32,
    /// Grid step for y.
    pub y_multiple: i32,
    /// Fixed position of the focal node.
    pub center: Position,
    /// RNG seed.
    pub seed: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            positions: 10,
            min_coord: 10,
            max_x_coord: 700,
            max_y_coord: 600,
            x_multiple: 50,
            y_multiple: 30,
            center: Position::new(250, 25),
            seed: 0,
        }
    }
}

impl LayoutConfig {
    /// Default layout with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, ..Self::default() }
    }

    /// Load overrides from `LAYOUT_SEED` and `LAYOUT_POSITIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("LAYOUT_SEED") {
            config.seed = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "LAYOUT_SEED", value })?;
        }
        if let Ok(value) = std::env::var("LAYOUT_POSITIONS") {
            config.positions = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "LAYOUT_POSITIONS", value })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check ranges are bounded and non-empty and grid steps positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, value) in [
            ("min", self.min_coord),
            ("x", self.max_x_coord),
            ("y", self.max_y_coord),
        ] {
            if !(-MAX_LAYOUT_COORD..=MAX_LAYOUT_COORD).contains(&value) {
                return Err(ConfigError::CoordOutOfRange { axis, value });
            }
        }
        for (axis, max) in [("x", self.max_x_coord), ("y", self.max_y_coord)] {
            if max <= self.min_coord {
                return Err(ConfigError::EmptyRange { axis, min: self.min_coord, max });
            }
        }
        for (axis, step) in [("x", self.x_multiple), ("y", self.y_multiple)] {
            if step <= 0 {
                return Err(ConfigError::NonPositiveStep { axis, step });
            }
        }
        Ok(())
    }

    /// Number of positions a single band can hold.
    pub fn band_capacity(&self) -> usize {
        let x = AxisGrid::new(self.min_coord, self.max_x_coord, self.x_multiple);
        let y = AxisGrid::new(self.min_coord, self.max_y_coord, self.y_multiple);
        x.slots().min(y.slots()).min(self.positions.max(1))
    }

    /// Canonical hash of the parameters.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self)
    }
}

/// Snapped sampling along one axis.
///
/// Arithmetic runs in `i64` so extreme ranges cannot overflow.
#[derive(Debug, Clone, Copy)]
struct AxisGrid {
    min: i64,
    max: i64,
    step: i64,
}

impl AxisGrid {
    /// Degenerate ranges and steps are widened to one slot.
    fn new(min: i32, max: i32, step: i32) -> Self {
        let min = i64::from(min);
        Self {
            min,
            max: i64::from(max).max(min + 1),
            step: i64::from(step).max(1),
        }
    }

    fn snap(&self, value: i64) -> i64 {
        value.div_euclid(self.step) * self.step
    }

    /// Number of distinct snapped values.
    fn slots(&self) -> usize {
        let lo = self.min.div_euclid(self.step);
        let hi = (self.max - 1).div_euclid(self.step);
        usize::try_from(hi - lo + 1).unwrap_or(usize::MAX)
    }

    /// Distance covered by all slots.
    fn span(&self) -> i64 {
        let slots = i64::try_from(self.slots()).unwrap_or(i64::MAX);
        slots.saturating_mul(self.step)
    }

    /// Draw `count` distinct snapped values; `count` must not exceed `slots()`.
    fn sample_distinct(&self, rng: &mut StdRng, count: usize) -> Vec<i32> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::with_capacity(count);
        while values.len() < count {
            let value = clamp_coord(self.snap(rng.gen_range(self.min..self.max)));
            if seen.insert(value) {
                values.push(value);
            }
        }
        values
    }
}

fn clamp_coord(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Generate the first `n` layout positions for `config`.
///
/// Pure and deterministic: the same `n` and config always produce the same
/// sequence, and any two positions differ in snapped x or snapped y.
pub fn generate_positions(n: usize, config: &LayoutConfig) -> Vec<Position> {
    let x_axis = AxisGrid::new(config.min_coord, config.max_x_coord, config.x_multiple);
    let y_axis = AxisGrid::new(config.min_coord, config.max_y_coord, config.y_multiple);
    let band_size = config.band_capacity();
    let band_height = y_axis.span();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut positions = Vec::with_capacity(n);
    let mut band: i64 = 0;

    while positions.len() < n {
        let xs = x_axis.sample_distinct(&mut rng, band_size);
        let ys = y_axis.sample_distinct(&mut rng, band_size);
        let offset = band.saturating_mul(band_height);
        positions.extend(
            xs.into_iter()
                .zip(ys)
                .map(|(x, y)| Position::new(x, clamp_coord(i64::from(y).saturating_add(offset)))),
        );
        band += 1;
    }

    positions.truncate(n);
    positions
}

/// Ordered position sequence consumed through a cursor.
///
/// Starts with one band and grows on demand; never wraps around.
#[derive(Debug, Clone)]
pub struct PositionPool {
    config: LayoutConfig,
    positions: Vec<Position>,
    cursor: usize,
}

impl PositionPool {
    /// Create a pool holding the configured number of positions.
    pub fn new(config: LayoutConfig) -> Self {
        let positions = generate_positions(config.positions, &config);
        Self {
            config,
            positions,
            cursor: 0,
        }
    }

    /// Take the next unused position, growing the pool when exhausted.
    pub fn next_position(&mut self) -> Position {
        if self.cursor >= self.positions.len() {
            let grown = self.positions.len() + self.config.band_capacity();
            tracing::debug!(
                from = self.positions.len(),
                to = grown,
                "Position pool exhausted, growing"
            );
            self.positions = generate_positions(grown, &self.config);
        }
        let position = self.positions[self.cursor];
        self.cursor += 1;
        position
    }

    /// Number of positions handed out.
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Number of positions generated so far.
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }
}
