//! Tile coordinates on the web mercator XYZ grid.
//!
//! Tiles are addressed top-left first (y grows southwards), matching the `"{z}/{x}/{y}"`
//! keys data sources publish in their `availableTiles` lists.

use std::fmt;
use std::str::FromStr;

use foundation::Extent;
use foundation::math::{MERCATOR_HALF_EXTENT, Vec2};
use serde::{Deserialize, Serialize};

/// Highest zoom a tile key may carry; keeps `1 << zoom` inside `u32`.
pub const MAX_TILE_ZOOM: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileKeyError {
    pub key: String,
}

impl fmt::Display for TileKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tile key {:?}, expected \"z/x/y\"", self.key)
    }
}

impl std::error::Error for TileKeyError {}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Number of tiles along one axis at `zoom`.
    pub fn tiles_per_axis(zoom: u8) -> u32 {
        1u32 << zoom.min(MAX_TILE_ZOOM)
    }

    fn tile_span(zoom: u8) -> f64 {
        2.0 * MERCATOR_HALF_EXTENT / Self::tiles_per_axis(zoom) as f64
    }

    /// The tile at `zoom` containing a web mercator point. Points off the grid are clamped to
    /// the nearest edge tile.
    pub fn for_point(point: Vec2, zoom: u8) -> Self {
        let span = Self::tile_span(zoom);
        let max_index = Self::tiles_per_axis(zoom) as f64 - 1.0;
        let x = ((point.x + MERCATOR_HALF_EXTENT) / span).floor();
        let y = ((MERCATOR_HALF_EXTENT - point.y) / span).floor();
        Self::new(
            zoom,
            x.clamp(0.0, max_index) as u32,
            y.clamp(0.0, max_index) as u32,
        )
    }

    /// Every tile at `zoom` intersecting `extent`, row by row.
    pub fn covering(extent: &Extent, zoom: u8) -> Vec<Self> {
        let top_left = Self::for_point(Vec2::new(extent.min[0], extent.max[1]), zoom);
        let bottom_right = Self::for_point(Vec2::new(extent.max[0], extent.min[1]), zoom);
        let mut out = Vec::new();
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                out.push(Self::new(zoom, x, y));
            }
        }
        out
    }

    /// Web mercator extent of this tile.
    pub fn extent(&self) -> Extent {
        let span = Self::tile_span(self.zoom);
        let min_x = -MERCATOR_HALF_EXTENT + self.x as f64 * span;
        let max_y = MERCATOR_HALF_EXTENT - self.y as f64 * span;
        Extent::new([min_x, max_y - span], [min_x + span, max_y])
    }

    pub fn center(&self) -> Vec2 {
        self.extent().center()
    }

    /// Squared distance in tile units. Tiles on different zooms are compared at the finer one.
    pub fn grid_distance_squared(&self, other: &Self) -> u64 {
        let zoom = self.zoom.max(other.zoom);
        let (ax, ay) = self.at_zoom(zoom);
        let (bx, by) = other.at_zoom(zoom);
        let dx = ax.abs_diff(bx);
        let dy = ay.abs_diff(by);
        dx * dx + dy * dy
    }

    fn at_zoom(&self, zoom: u8) -> (u64, u64) {
        let shift = zoom.saturating_sub(self.zoom);
        ((self.x as u64) << shift, (self.y as u64) << shift)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl FromStr for TileCoordinate {
    type Err = TileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TileKeyError { key: s.to_string() };
        let mut parts = s.trim().split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        let zoom: u8 = z.parse().map_err(|_| err())?;
        if zoom > MAX_TILE_ZOOM {
            return Err(err());
        }
        let x: u32 = x.parse().map_err(|_| err())?;
        let y: u32 = y.parse().map_err(|_| err())?;
        let n = Self::tiles_per_axis(zoom);
        if x >= n || y >= n {
            return Err(err());
        }
        Ok(Self::new(zoom, x, y))
    }
}

impl TryFrom<String> for TileCoordinate {
    type Error = TileKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TileCoordinate> for String {
    fn from(value: TileCoordinate) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::TileCoordinate;
    use foundation::Extent;
    use foundation::math::{MERCATOR_HALF_EXTENT, Vec2};
    use pretty_assertions::assert_eq;

    #[test]
    fn key_round_trip() {
        let t: TileCoordinate = "5/1/1".parse().expect("parse");
        assert_eq!(t, TileCoordinate::new(5, 1, 1));
        assert_eq!(t.to_string(), "5/1/1");
        assert!("5/1".parse::<TileCoordinate>().is_err());
        assert!("5/1/1/2".parse::<TileCoordinate>().is_err());
        assert!("1/2/0".parse::<TileCoordinate>().is_err());
        assert!("a/0/0".parse::<TileCoordinate>().is_err());
    }

    #[test]
    fn serde_uses_string_key() {
        let t = TileCoordinate::new(3, 2, 1);
        let json = serde_json::to_string(&t).expect("serialize");
        assert_eq!(json, "\"3/2/1\"");
        let back: TileCoordinate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn zoom_zero_covers_the_world() {
        let e = TileCoordinate::new(0, 0, 0).extent();
        assert!((e.min[0] + MERCATOR_HALF_EXTENT).abs() < 1e-6);
        assert!((e.max[1] - MERCATOR_HALF_EXTENT).abs() < 1e-6);
    }

    #[test]
    fn point_lookup_matches_tile_extent() {
        let tile = TileCoordinate::new(5, 1, 1);
        let center = tile.center();
        assert_eq!(TileCoordinate::for_point(center, 5), tile);
        assert!(tile.extent().contains(center));
        // North-west is the top-left tile.
        let nw = Vec2::new(-MERCATOR_HALF_EXTENT + 1.0, MERCATOR_HALF_EXTENT - 1.0);
        assert_eq!(TileCoordinate::for_point(nw, 5), TileCoordinate::new(5, 0, 0));
        // Off-grid points clamp.
        let far = Vec2::new(10.0 * MERCATOR_HALF_EXTENT, -10.0 * MERCATOR_HALF_EXTENT);
        assert_eq!(TileCoordinate::for_point(far, 2), TileCoordinate::new(2, 3, 3));
    }

    #[test]
    fn covering_lists_intersecting_tiles() {
        let a = TileCoordinate::new(4, 3, 5).extent();
        let b = TileCoordinate::new(4, 4, 6).extent();
        let extent = Extent::new(
            [a.center().x, b.center().y],
            [b.center().x, a.center().y],
        );
        let tiles = TileCoordinate::covering(&extent, 4);
        assert_eq!(
            tiles,
            vec![
                TileCoordinate::new(4, 3, 5),
                TileCoordinate::new(4, 4, 5),
                TileCoordinate::new(4, 3, 6),
                TileCoordinate::new(4, 4, 6),
            ]
        );
    }

    #[test]
    fn grid_distance_across_zooms() {
        let a = TileCoordinate::new(3, 1, 1);
        let b = TileCoordinate::new(3, 4, 5);
        assert_eq!(a.grid_distance_squared(&b), 9 + 16);
        let fine = TileCoordinate::new(4, 2, 2);
        assert_eq!(a.grid_distance_squared(&fine), 0);
    }
}
