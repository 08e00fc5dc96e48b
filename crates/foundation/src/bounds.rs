use crate::math::Vec2;

/// Axis-aligned planar extent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extent {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Extent {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Extent { min, max }
    }

    /// Smallest extent containing every point; `None` for an empty input.
    pub fn from_points(points: impl IntoIterator<Item = Vec2>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut e = Extent::new([first.x, first.y], [first.x, first.y]);
        for p in iter {
            e.extend(p);
        }
        Some(e)
    }

    /// A square extent of half-width `radius` around `center`.
    pub fn around(center: Vec2, radius: f64) -> Self {
        Extent::new(
            [center.x - radius, center.y - radius],
            [center.x + radius, center.y + radius],
        )
    }

    pub fn extend(&mut self, p: Vec2) {
        self.min[0] = self.min[0].min(p.x);
        self.min[1] = self.min[1].min(p.y);
        self.max[0] = self.max[0].max(p.x);
        self.max[1] = self.max[1].max(p.y);
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
        )
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min[0] && p.x <= self.max[0] && p.y >= self.min[1] && p.y <= self.max[1]
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }
}

#[cfg(test)]
mod tests {
    use super::Extent;
    use crate::math::Vec2;

    #[test]
    fn from_points_and_queries() {
        let e = Extent::from_points([Vec2::new(1.0, 5.0), Vec2::new(-2.0, 3.0)]).expect("extent");
        assert_eq!(e, Extent::new([-2.0, 3.0], [1.0, 5.0]));
        assert!(e.contains(Vec2::new(0.0, 4.0)));
        assert!(!e.contains(Vec2::new(2.0, 4.0)));
        assert_eq!(e.center(), Vec2::new(-0.5, 4.0));
        assert!(Extent::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn intersects_touching_edges() {
        let a = Extent::new([0.0, 0.0], [1.0, 1.0]);
        let b = Extent::new([1.0, 0.5], [2.0, 2.0]);
        let c = Extent::around(Vec2::new(5.0, 5.0), 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
