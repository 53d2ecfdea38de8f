//! 2D placement of experts and tokens.
//!
//! Positions are cosmetic: the presentation layer draws them, the engine
//! only guarantees they are assigned once and never recomputed.

use crate::config::LayoutSection;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Horizontal spacing of the grid layout.
const GRID_SPACING_X: f64 = 40.0;
/// Vertical spacing of the grid layout.
const GRID_SPACING_Y: f64 = 45.0;
/// Cap on the token scatter radius.
const MAX_SCATTER_RADIUS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl LayoutSection {
    pub fn center(&self) -> Position {
        Position::new(self.center_x, self.center_y)
    }
}

/// Position of expert `index` out of `count`, evenly spaced on the expert
/// circle and starting from the top.
pub fn circle_position(index: usize, count: usize, layout: &LayoutSection) -> Position {
    let angle = (index as f64 / count.max(1) as f64) * 2.0 * PI - PI / 2.0;
    Position::new(
        layout.center_x + layout.expert_radius * angle.cos(),
        layout.center_y + layout.expert_radius * angle.sin(),
    )
}

/// Pick a spot for a new token that keeps clear of every live token.
///
/// The scatter radius grows with the number of live tokens. Candidates are
/// drawn uniformly in angle and radius; after `max_placement_attempts`
/// misses the token lands on the center point, overlapping or not.
pub fn place_token(
    existing: &[Position],
    layout: &LayoutSection,
    rng: &mut dyn RngCore,
) -> Position {
    let max_radius = MAX_SCATTER_RADIUS.min(100.0 + existing.len() as f64 * 5.0);
    for _ in 0..layout.max_placement_attempts {
        let angle = rng.gen::<f64>() * 2.0 * PI;
        let radius = rng.gen::<f64>() * max_radius * 0.7;
        let candidate = Position::new(
            layout.center_x + angle.cos() * radius,
            layout.center_y + angle.sin() * radius,
        );
        let too_close = existing
            .iter()
            .any(|p| p.distance(&candidate) < layout.token_min_distance);
        if !too_close {
            return candidate;
        }
    }
    layout.center()
}

/// Compact grid of `count` positions centered on `center`.
///
/// Rows hold about `sqrt(1.5 * count)` tokens so the grid is slightly
/// wider than tall; the last row is centered on its own width.
pub fn grid_positions(count: usize, center: Position) -> Vec<Position> {
    if count == 0 {
        return Vec::new();
    }
    let columns = ((count as f64 * 1.5).sqrt().ceil() as usize).max(1);
    let rows = count.div_ceil(columns);
    let total_height = (rows - 1) as f64 * GRID_SPACING_Y;

    let mut positions = Vec::with_capacity(count);
    for row in 0..rows {
        let in_row = columns.min(count - positions.len());
        let row_width = (in_row - 1) as f64 * GRID_SPACING_X;
        let start_x = center.x - row_width / 2.0;
        let y = center.y - total_height / 2.0 + row as f64 * GRID_SPACING_Y;
        for col in 0..in_row {
            positions.push(Position::new(start_x + col as f64 * GRID_SPACING_X, y));
        }
    }
    positions
}

/// Linear interpolation between two points, `progress` in `[0, 1]`.
pub fn interpolate(start: Position, end: Position, progress: f64) -> Position {
    Position::new(
        start.x + (end.x - start.x) * progress,
        start.y + (end.y - start.y) * progress,
    )
}
