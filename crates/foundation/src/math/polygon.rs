use super::Vec2;

/// Even-odd containment test. Works for open or closed rings; points on an edge may land on
/// either side.
pub fn ring_contains(ring: &[Vec2], point: Vec2) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Shoelace area; positive for counter-clockwise rings.
pub fn signed_area(ring: &[Vec2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.perp_dot(b);
    }
    sum / 2.0
}

/// Whether segments `a0-a1` and `b0-b1` share a point, touching endpoints included.
pub fn segments_intersect(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> bool {
    let side = |p: Vec2, q: Vec2, r: Vec2| (q - p).perp_dot(r - p);
    let within = |p: Vec2, q: Vec2, r: Vec2| {
        r.x >= p.x.min(q.x) && r.x <= p.x.max(q.x) && r.y >= p.y.min(q.y) && r.y <= p.y.max(q.y)
    };

    let d1 = side(b0, b1, a0);
    let d2 = side(b0, b1, a1);
    let d3 = side(a0, a1, b0);
    let d4 = side(a0, a1, b1);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && within(b0, b1, a0))
        || (d2 == 0.0 && within(b0, b1, a1))
        || (d3 == 0.0 && within(a0, a1, b0))
        || (d4 == 0.0 && within(a0, a1, b1))
}

/// Area centroid, falling back to the vertex average for zero-area rings.
pub fn ring_centroid(ring: &[Vec2]) -> Option<Vec2> {
    if ring.is_empty() {
        return None;
    }
    let area = signed_area(ring);
    if area.abs() <= f64::EPSILON {
        let sum = ring.iter().fold(Vec2::default(), |acc, p| acc + *p);
        return Some(sum.scale(1.0 / ring.len() as f64));
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        let cross = a.perp_dot(b);
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    let k = 1.0 / (6.0 * area);
    Some(Vec2::new(cx * k, cy * k))
}

#[cfg(test)]
mod tests {
    use super::{ring_centroid, ring_contains, segments_intersect, signed_area};
    use crate::math::Vec2;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn contains_inside_not_outside() {
        let ring = square();
        assert!(ring_contains(&ring, Vec2::new(5.0, 5.0)));
        assert!(!ring_contains(&ring, Vec2::new(15.0, 5.0)));
        assert!(!ring_contains(&ring[..2], Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn area_sign_follows_orientation() {
        let mut ring = square();
        assert_eq!(signed_area(&ring), 100.0);
        ring.reverse();
        assert_eq!(signed_area(&ring), -100.0);
    }

    #[test]
    fn centroid_of_square() {
        let c = ring_centroid(&square()).expect("centroid");
        assert!((c.x - 5.0).abs() < 1e-12);
        assert!((c.y - 5.0).abs() < 1e-12);
    }

    #[test]
    fn segment_crossings() {
        let v = Vec2::new;
        assert!(segments_intersect(v(0.0, 0.0), v(10.0, 10.0), v(0.0, 10.0), v(10.0, 0.0)));
        assert!(!segments_intersect(v(0.0, 0.0), v(1.0, 1.0), v(2.0, 0.0), v(3.0, 1.0)));
        // Shared endpoint and collinear overlap both count.
        assert!(segments_intersect(v(0.0, 0.0), v(1.0, 0.0), v(1.0, 0.0), v(1.0, 5.0)));
        assert!(segments_intersect(v(0.0, 0.0), v(4.0, 0.0), v(2.0, 0.0), v(6.0, 0.0)));
        assert!(!segments_intersect(v(0.0, 0.0), v(1.0, 0.0), v(2.0, 0.0), v(3.0, 0.0)));
    }
}
