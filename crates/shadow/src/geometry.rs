//! Vector geometries shared by the ground and shadow stores.
//!
//! Polygon rings are stored closed (first coordinate repeated last).

use foundation::Extent;
use foundation::math::{
    Vec2, Vec3, ring_centroid, ring_contains, segments_intersect, signed_area,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Vec3),
    LineString(Vec<Vec3>),
    /// Outer ring first, holes after.
    Polygon(Vec<Vec<Vec3>>),
    Circle { center: Vec3, radius: f64 },
}

/// Relative tolerance below which consecutive vertices are merged.
const MERGE_EPSILON: f64 = 1e-9;

impl Geometry {
    pub fn is_circle(&self) -> bool {
        matches!(self, Geometry::Circle { .. })
    }

    /// Every coordinate in storage order; a circle contributes its center.
    pub fn coordinates(&self) -> Vec<Vec3> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::LineString(line) => line.clone(),
            Geometry::Polygon(rings) => rings.iter().flatten().copied().collect(),
            Geometry::Circle { center, .. } => vec![*center],
        }
    }

    /// Applies `f` to every coordinate, keeping the structure. Circles map their center and
    /// keep their radius.
    pub fn try_map<E>(&self, mut f: impl FnMut(Vec3) -> Result<Vec3, E>) -> Result<Geometry, E> {
        Ok(match self {
            Geometry::Point(p) => Geometry::Point(f(*p)?),
            Geometry::LineString(line) => {
                Geometry::LineString(line.iter().map(|c| f(*c)).collect::<Result<_, _>>()?)
            }
            Geometry::Polygon(rings) => Geometry::Polygon(
                rings
                    .iter()
                    .map(|ring| ring.iter().map(|c| f(*c)).collect::<Result<Vec<_>, _>>())
                    .collect::<Result<_, _>>()?,
            ),
            Geometry::Circle { center, radius } => Geometry::Circle {
                center: f(*center)?,
                radius: *radius,
            },
        })
    }

    pub fn extent(&self) -> Option<Extent> {
        match self {
            Geometry::Circle { center, radius } => Some(Extent::around(center.xy(), *radius)),
            other => Extent::from_points(other.coordinates().into_iter().map(Vec3::xy)),
        }
    }

    /// Whether any part of the geometry lies inside the quadrilateral `footprint`: a vertex
    /// inside it, an edge crossing its boundary, or a polygon enclosing one of its corners.
    pub fn touches(&self, footprint: &[Vec2]) -> bool {
        let shape = match self {
            Geometry::Circle { .. } => match self.polygonize(16) {
                Some(p) => p,
                None => return false,
            },
            other => other.clone(),
        };
        if shape
            .coordinates()
            .iter()
            .any(|c| ring_contains(footprint, c.xy()))
        {
            return true;
        }

        let paths: Vec<Vec<Vec2>> = match &shape {
            Geometry::Point(_) | Geometry::Circle { .. } => Vec::new(),
            Geometry::LineString(line) => vec![xy(line)],
            Geometry::Polygon(rings) => rings.iter().map(|r| closed(xy(r))).collect(),
        };
        let boundary = closed(footprint.to_vec());
        let crosses = paths.iter().any(|path| {
            path.windows(2).any(|edge| {
                boundary
                    .windows(2)
                    .any(|side| segments_intersect(edge[0], edge[1], side[0], side[1]))
            })
        });
        if crosses {
            return true;
        }

        match &shape {
            Geometry::Polygon(rings) => rings.first().is_some_and(|outer| {
                let outer = xy(outer);
                footprint.iter().any(|corner| ring_contains(&outer, *corner))
            }),
            _ => false,
        }
    }

    /// A clean vertex representation: circles become regular `segments`-gons, repeated and
    /// collinear vertices are dropped, outer rings turn counter-clockwise and holes clockwise.
    /// `None` when nothing usable is left.
    pub fn polygonize(&self, segments: usize) -> Option<Geometry> {
        match self {
            Geometry::Point(p) => p.is_finite().then_some(Geometry::Point(*p)),
            Geometry::LineString(line) => {
                let line = dedupe(line);
                (line.len() >= 2).then_some(Geometry::LineString(line))
            }
            Geometry::Polygon(rings) => {
                let mut out = Vec::with_capacity(rings.len());
                for (i, ring) in rings.iter().enumerate() {
                    match clean_ring(ring, i == 0) {
                        Some(ring) => out.push(ring),
                        None if i == 0 => return None,
                        None => {}
                    }
                }
                Some(Geometry::Polygon(out))
            }
            Geometry::Circle { center, radius } => {
                if !(radius.is_finite() && *radius > 0.0) || !center.is_finite() {
                    return None;
                }
                let n = segments.max(3);
                let mut ring: Vec<Vec3> = (0..n)
                    .map(|i| {
                        let a = std::f64::consts::TAU * i as f64 / n as f64;
                        Vec3::new(
                            center.x + radius * a.cos(),
                            center.y + radius * a.sin(),
                            center.z,
                        )
                    })
                    .collect();
                ring.push(ring[0]);
                Some(Geometry::Polygon(vec![ring]))
            }
        }
    }

    /// Recovers a circle from the outer ring of a polygonized circle: area centroid and mean
    /// vertex distance.
    pub fn circle_from_polygon(&self) -> Option<Geometry> {
        let Geometry::Polygon(rings) = self else {
            return None;
        };
        let outer = rings.first()?;
        let open = open_ring(outer);
        if open.len() < 3 {
            return None;
        }
        let center = ring_centroid(&xy(open))?;
        let z = open.iter().map(|c| c.z).sum::<f64>() / open.len() as f64;
        let radius =
            open.iter().map(|c| c.xy().distance(center)).sum::<f64>() / open.len() as f64;
        (radius > 0.0 && radius.is_finite()).then_some(Geometry::Circle {
            center: Vec3::new(center.x, center.y, z),
            radius,
        })
    }
}

fn xy(ring: &[Vec3]) -> Vec<Vec2> {
    ring.iter().map(|c| c.xy()).collect()
}

/// `ring` with its first point repeated at the end, if it is not already.
fn closed(mut ring: Vec<Vec2>) -> Vec<Vec2> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last()) {
        if first != *last {
            ring.push(first);
        }
    }
    ring
}

fn open_ring(ring: &[Vec3]) -> &[Vec3] {
    match (ring.first(), ring.last()) {
        (Some(a), Some(b)) if ring.len() > 1 && a == b => &ring[..ring.len() - 1],
        _ => ring,
    }
}

fn scale_of(points: &[Vec3]) -> f64 {
    points
        .iter()
        .map(|c| c.x.abs().max(c.y.abs()))
        .fold(1.0, f64::max)
}

fn dedupe(points: &[Vec3]) -> Vec<Vec3> {
    let eps = MERGE_EPSILON * scale_of(points);
    let mut out: Vec<Vec3> = Vec::with_capacity(points.len());
    for p in points.iter().filter(|p| p.is_finite()) {
        if out.last().is_none_or(|last| last.xy().distance(p.xy()) > eps) {
            out.push(*p);
        }
    }
    out
}

fn clean_ring(ring: &[Vec3], outer: bool) -> Option<Vec<Vec3>> {
    let mut open = dedupe(open_ring(ring));
    let eps = MERGE_EPSILON * scale_of(&open);
    while open.len() > 1 && open[0].xy().distance(open[open.len() - 1].xy()) <= eps {
        open.pop();
    }

    // Drop collinear vertices, which also removes zero-width spikes.
    let mut changed = true;
    while changed && open.len() >= 3 {
        changed = false;
        let n = open.len();
        for i in 0..n {
            let prev = open[(i + n - 1) % n].xy();
            let cur = open[i].xy();
            let next = open[(i + 1) % n].xy();
            let cross = (cur - prev).perp_dot(next - cur);
            if cross.abs() <= eps * eps.max((next - prev).length()) {
                open.remove(i);
                changed = true;
                break;
            }
        }
    }
    if open.len() < 3 {
        return None;
    }

    let area = signed_area(&xy(&open));
    if area.abs() <= eps * eps {
        return None;
    }
    if (area > 0.0) != outer {
        open.reverse();
    }
    open.push(open[0]);
    Some(open)
}

#[cfg(test)]
mod tests {
    use foundation::math::{Vec2, Vec3, signed_area};

    use super::Geometry;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    fn v(x: f64, y: f64) -> Vec3 {
        Vec3::new(x, y, 0.0)
    }

    fn area(ring: &[Vec3]) -> f64 {
        signed_area(&ring.iter().map(|c| c.xy()).collect::<Vec<_>>())
    }

    #[test]
    fn circle_round_trips_through_polygon() {
        let circle = Geometry::Circle {
            center: Vec3::new(10.0, -4.0, 2.0),
            radius: 3.0,
        };
        let polygon = circle.polygonize(64).expect("polygon");
        let Geometry::Polygon(rings) = &polygon else {
            panic!("expected a polygon");
        };
        assert_eq!(rings[0].len(), 65);
        assert_eq!(rings[0][0], rings[0][64]);
        assert!(area(&rings[0]) > 0.0);

        let Some(Geometry::Circle { center, radius }) = polygon.circle_from_polygon() else {
            panic!("expected a circle");
        };
        assert_close(center.x, 10.0, 1e-9);
        assert_close(center.y, -4.0, 1e-9);
        assert_close(center.z, 2.0, 1e-12);
        assert_close(radius, 3.0, 1e-9);
    }

    #[test]
    fn polygonize_cleans_rings() {
        // Clockwise, with a repeated vertex, a collinear vertex and no closing coordinate.
        let messy = Geometry::Polygon(vec![
            vec![
                v(0.0, 0.0),
                v(0.0, 10.0),
                v(0.0, 10.0),
                v(10.0, 10.0),
                v(10.0, 5.0),
                v(10.0, 0.0),
            ],
            // Degenerate hole.
            vec![v(1.0, 1.0), v(2.0, 2.0), v(3.0, 3.0)],
        ]);
        let Some(Geometry::Polygon(rings)) = messy.polygonize(8) else {
            panic!("expected a polygon");
        };
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 5);
        assert!(area(&rings[0]) > 0.0);
        assert_close(area(&rings[0]), 100.0, 1e-9);

        let flat = Geometry::Polygon(vec![vec![v(0.0, 0.0), v(1.0, 1.0), v(2.0, 2.0)]]);
        assert_eq!(flat.polygonize(8), None);
        let spike = Geometry::LineString(vec![v(0.0, 0.0), v(0.0, 0.0)]);
        assert_eq!(spike.polygonize(8), None);
    }

    #[test]
    fn holes_turn_clockwise() {
        let square = |o: f64, s: f64| vec![v(o, o), v(o + s, o), v(o + s, o + s), v(o, o + s)];
        let polygon = Geometry::Polygon(vec![square(0.0, 10.0), square(2.0, 2.0)]);
        let Some(Geometry::Polygon(rings)) = polygon.polygonize(8) else {
            panic!("expected a polygon");
        };
        assert!(area(&rings[0]) > 0.0);
        assert!(area(&rings[1]) < 0.0);
    }

    #[test]
    fn footprint_touch_test() {
        let footprint = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        assert!(Geometry::Point(v(5.0, 5.0)).touches(&footprint));
        assert!(!Geometry::Point(v(15.0, 5.0)).touches(&footprint));
        let around = Geometry::Polygon(vec![vec![
            v(-5.0, -5.0),
            v(20.0, -5.0),
            v(20.0, 20.0),
            v(-5.0, 20.0),
            v(-5.0, -5.0),
        ]]);
        assert!(around.touches(&footprint));
        let circle = Geometry::Circle {
            center: v(12.0, 5.0),
            radius: 3.0,
        };
        assert!(circle.touches(&footprint));

        // Every vertex outside, but the shape still crosses the footprint.
        let crossing = Geometry::LineString(vec![v(-5.0, 5.0), v(15.0, 5.0)]);
        assert!(crossing.touches(&footprint));
        let sliver = Geometry::Polygon(vec![vec![
            v(4.0, -5.0),
            v(6.0, -5.0),
            v(6.0, 15.0),
            v(4.0, 15.0),
            v(4.0, -5.0),
        ]]);
        assert!(sliver.touches(&footprint));
        let passing_by = Geometry::LineString(vec![v(-5.0, 12.0), v(15.0, 12.0)]);
        assert!(!passing_by.touches(&footprint));
        assert_eq!(
            Geometry::Point(v(1.0, 2.0)).extent().map(|e| e.center()),
            Some(Vec2::new(1.0, 2.0))
        );
    }
}
