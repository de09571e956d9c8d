//! Planar geometry for zone occupancy tests.

/// Ray-casting point-in-polygon test (even-odd rule).
///
/// Vertices are taken in order; the polygon closes itself. Fewer than three
/// vertices can never contain a point. Points exactly on an edge may land on
/// either side; zone drawing tolerances make this irrelevant in practice.
pub fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let (px, py) = point;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [(f64, f64); 4] = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];

    #[test]
    fn center_is_inside() {
        assert!(point_in_polygon((5.0, 5.0), &SQUARE));
    }

    #[test]
    fn outside_points_are_outside() {
        assert!(!point_in_polygon((-1.0, 5.0), &SQUARE));
        assert!(!point_in_polygon((5.0, 11.0), &SQUARE));
        assert!(!point_in_polygon((100.0, 100.0), &SQUARE));
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {
        assert!(!point_in_polygon((0.0, 0.0), &[]));
        assert!(!point_in_polygon((0.0, 0.0), &[(0.0, 0.0)]));
        assert!(!point_in_polygon((0.5, 0.5), &[(0.0, 0.0), (1.0, 1.0)]));
    }

    #[test]
    fn concave_polygon() {
        // U-shape: the notch at the top center is outside.
        let u = [
            (0.0, 0.0),
            (6.0, 0.0),
            (6.0, 6.0),
            (4.0, 6.0),
            (4.0, 2.0),
            (2.0, 2.0),
            (2.0, 6.0),
            (0.0, 6.0),
        ];
        assert!(point_in_polygon((1.0, 5.0), &u));
        assert!(point_in_polygon((5.0, 5.0), &u));
        assert!(!point_in_polygon((3.0, 5.0), &u));
        assert!(point_in_polygon((3.0, 1.0), &u));
    }

    #[test]
    fn vertex_order_does_not_matter() {
        let cw: Vec<(f64, f64)> = SQUARE.iter().rev().copied().collect();
        assert!(point_in_polygon((5.0, 5.0), &cw));
        assert!(!point_in_polygon((-1.0, 5.0), &cw));
    }

    #[test]
    fn starting_vertex_does_not_matter() {
        let inside = (5.0, 5.0);
        let outside = (10.5, 5.0);
        for start in 0..SQUARE.len() {
            let rotated: Vec<(f64, f64)> = SQUARE
                .iter()
                .cycle()
                .skip(start)
                .take(SQUARE.len())
                .copied()
                .collect();
            assert!(point_in_polygon(inside, &rotated));
            assert!(!point_in_polygon(outside, &rotated));
        }
    }

    #[test]
    fn triangle() {
        let tri = [(0.0, 0.0), (4.0, 0.0), (2.0, 4.0)];
        assert!(point_in_polygon((2.0, 1.0), &tri));
        assert!(!point_in_polygon((0.1, 3.9), &tri));
    }
}
