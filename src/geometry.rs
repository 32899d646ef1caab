//! Planar geometry helpers
//!
//! Convex hulls, minimum-area bounding rectangles, polygon tests and the
//! body-centric rotation used for hind-paw extension.

use crate::types::Point;

/// Hull area below this (px²) counts as a degenerate, collinear point set
pub const DEGENERATE_AREA_EPS: f64 = 1e-6;

fn cross(o: &Point, a: &Point, b: &Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by Andrew's monotone chain, counter-clockwise, no repeated end point
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts: Vec<Point> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Absolute polygon area (shoelace)
pub fn polygon_area(polygon: &[Point]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let twice: f64 = polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

/// Area of the minimum-area enclosing rectangle.
///
/// Returns `None` for fewer than three distinct points or a (near-)collinear
/// set, whose enclosing rectangle would be degenerate.
pub fn min_area_rect(points: &[Point]) -> Option<f64> {
    let hull = convex_hull(points);
    if hull.len() < 3 || polygon_area(&hull) < DEGENERATE_AREA_EPS {
        return None;
    }

    let mut best = f64::INFINITY;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let len = a.distance(&b);
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = ((b.x - a.x) / len, (b.y - a.y) / len);

        let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &hull {
            let dx = p.x - a.x;
            let dy = p.y - a.y;
            let u = dx * ux + dy * uy;
            let v = -dx * uy + dy * ux;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        best = best.min((max_u - min_u) * (max_v - min_v));
    }

    best.is_finite().then_some(best)
}

/// Even-odd point-in-polygon test
pub fn point_in_polygon(p: &Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Vertex mean of a polygon
pub fn vertex_centroid(polygon: &[Point]) -> Option<Point> {
    if polygon.is_empty() {
        return None;
    }
    let n = polygon.len() as f64;
    let (sx, sy) = polygon
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

/// Push every vertex `distance` pixels further from `origin` along the origin→vertex ray
pub fn extend_vertices(polygon: &[Point], origin: &Point, distance: f64) -> Vec<Point> {
    polygon
        .iter()
        .map(|v| {
            let len = v.distance(origin);
            if len == 0.0 {
                return *v;
            }
            let k = (len + distance) / len;
            Point::new(origin.x + (v.x - origin.x) * k, origin.y + (v.y - origin.y) * k)
        })
        .collect()
}

/// Express `p` in a frame centred on `origin` whose +Y axis points along `origin→toward`.
///
/// Returns `(x, y)` in the same units as the input; `None` when the axis is undefined.
pub fn to_body_frame(p: &Point, origin: &Point, toward: &Point) -> Option<(f64, f64)> {
    let len = origin.distance(toward);
    if len == 0.0 {
        return None;
    }
    let (ax, ay) = ((toward.x - origin.x) / len, (toward.y - origin.y) / len);
    let (dx, dy) = (p.x - origin.x, p.y - origin.y);
    // rotate by the angle taking (ax, ay) onto (0, 1)
    let x = dx * ay - dy * ax;
    let y = dx * ax + dy * ay;
    Some((x, y))
}

/// Smallest absolute difference between two angles, in radians [0, π]
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(std::f64::consts::TAU);
    d.min(std::f64::consts::TAU - d)
}
