//! Spatial zone construction
//!
//! Builds graded ring masks around the arena boundary and, for mazes with
//! internal walls, around the closed arms and the middle wall. Rings are
//! read off a signed chamfer distance field of the base region: positive
//! outside, zero or negative inside. Zones are purely geometric and are built
//! once per session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::calibration::{ArenaShape, CalibrationContext};
use crate::config::ZoneConfig;
use crate::geometry::{convex_hull, extend_vertices, point_in_polygon};
use crate::paradigm::Paradigm;
use crate::types::Point;

/// Named family of rings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ZoneGroup {
    Arena,
    ClosedArms,
    OpenArms,
    MiddleWall,
}

/// Ring within a zone group.
///
/// Rings are nested outward from the boundary: `First` holds everything past
/// the first radius up to the third, `Second` everything past the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ring {
    /// Band of half-width r1 straddling the boundary
    Zero,
    First,
    Second,
    /// Everything from r1 inside the boundary to r3 outside
    Max,
}

/// Boolean pixel mask over the video frame
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMask {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl ZoneMask {
    fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize) -> bool) -> Self {
        Self {
            width,
            height,
            cells: (0..width * height).map(&mut f).collect(),
        }
    }

    /// Whether the pixel nearest to `p` is set; points off the frame are never inside
    pub fn contains(&self, p: &Point) -> bool {
        let (x, y) = (p.x.round(), p.y.round());
        if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
            return false;
        }
        self.cells[y as usize * self.width + x as usize]
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }
}

/// Ring masks and boundary contour of one zone group
#[derive(Debug, Clone)]
pub struct ZoneSet {
    pub zero: ZoneMask,
    pub first: ZoneMask,
    pub second: ZoneMask,
    pub max: ZoneMask,
    /// Boundary pixels of the base region, for display
    pub contour: Vec<Point>,
}

impl ZoneSet {
    pub fn ring(&self, ring: Ring) -> &ZoneMask {
        match ring {
            Ring::Zero => &self.zero,
            Ring::First => &self.first,
            Ring::Second => &self.second,
            Ring::Max => &self.max,
        }
    }
}

/// All zone groups of a session
#[derive(Debug, Clone)]
pub struct SpatialZones {
    /// Ring radii r1 < r2 < r3 in pixels, after size correction
    pub radii_px: [f64; 3],
    groups: BTreeMap<ZoneGroup, ZoneSet>,
}

impl SpatialZones {
    pub fn group(&self, group: ZoneGroup) -> Option<&ZoneSet> {
        self.groups.get(&group)
    }

    pub fn groups(&self) -> impl Iterator<Item = ZoneGroup> + '_ {
        self.groups.keys().copied()
    }

    /// Whether `p` lies in `ring` of `group`; false when the group was not built
    pub fn contains(&self, group: ZoneGroup, ring: Ring, p: &Point) -> bool {
        self.groups
            .get(&group)
            .map(|set| set.ring(ring).contains(p))
            .unwrap_or(false)
    }
}

/// Builder for the per-session zone sets
pub struct SpatialZoneBuilder;

impl SpatialZoneBuilder {
    pub fn build(
        calibration: &CalibrationContext,
        paradigm: Paradigm,
        config: &ZoneConfig,
        size_correction: f64,
    ) -> SpatialZones {
        let width = calibration.frame_width as usize;
        let height = calibration.frame_height as usize;
        let scale = calibration.pixels_per_cm * size_correction;
        let radii = [
            config.first_ring_cm * scale,
            config.second_ring_cm * scale,
            config.third_ring_cm * scale,
        ];

        let mut groups = BTreeMap::new();
        let arena = rasterize_arena(&calibration.arena, width, height);
        let arena_field = DistanceField::signed(&arena, width, height);
        groups.insert(
            ZoneGroup::Arena,
            ring_set(&arena, &arena_field, radii, None),
        );

        if paradigm.supports_head_dips() {
            if calibration.closed_arms.is_empty() {
                warn!("elevated plus maze without closed-arm geometry, arm zones not built");
            } else {
                let (closed_arms, open_arms) =
                    maze_arm_sets(calibration, &arena, &arena_field, radii);
                groups.insert(ZoneGroup::ClosedArms, closed_arms);
                groups.insert(ZoneGroup::OpenArms, open_arms);
            }
        }

        if paradigm.supports_wall_rearing() {
            match &calibration.middle_wall {
                Some(wall) if wall.len() >= 3 => {
                    let region = rasterize(width, height, |p| point_in_polygon(p, wall));
                    let field = DistanceField::signed(&region, width, height);
                    groups.insert(
                        ZoneGroup::MiddleWall,
                        ring_set(&region, &field, radii, None),
                    );
                }
                _ => warn!("light/dark box without middle-wall geometry, wall zones not built"),
            }
        }

        debug!(
            groups = groups.len(),
            r1 = radii[0],
            r2 = radii[1],
            r3 = radii[2],
            "spatial zones built"
        );

        SpatialZones {
            radii_px: radii,
            groups,
        }
    }
}

/// Closed-arm rings (centre excluded) and open-arm rings (closed arms and centre excluded)
fn maze_arm_sets(
    calibration: &CalibrationContext,
    arena: &[bool],
    arena_field: &DistanceField,
    radii: [f64; 3],
) -> (ZoneSet, ZoneSet) {
    let width = calibration.frame_width as usize;
    let height = calibration.frame_height as usize;
    let origin = calibration.arena.centre();

    // the two vertices of each arm nearest the arena centre bound the centre zone;
    // the remaining vertices are pushed outward so the arm ends reach past the arena edge
    let mut inner = Vec::new();
    let arms: Vec<Vec<Point>> = calibration
        .closed_arms
        .iter()
        .map(|arm| {
            let mut order: Vec<usize> = (0..arm.len()).collect();
            order.sort_by(|a, b| arm[*a].distance(&origin).total_cmp(&arm[*b].distance(&origin)));
            let near: Vec<usize> = order.into_iter().take(2).collect();
            inner.extend(near.iter().map(|i| arm[*i]));
            arm.iter()
                .enumerate()
                .map(|(i, v)| {
                    if near.contains(&i) {
                        *v
                    } else {
                        extend_vertices(&[*v], &origin, radii[2])[0]
                    }
                })
                .collect()
        })
        .collect();

    let centre_hull = convex_hull(&inner);
    let centre = rasterize(width, height, |p| point_in_polygon(p, &centre_hull));
    let closed = rasterize(width, height, |p| {
        arms.iter().any(|arm| point_in_polygon(p, arm))
    });
    let closed_field = DistanceField::signed(&closed, width, height);

    let closed_set = ring_set(&closed, &closed_field, radii, Some(&centre));

    let near_closed: Vec<bool> = closed_field
        .values
        .iter()
        .zip(&centre)
        .map(|(d, in_centre)| *d <= radii[2] || *in_centre)
        .collect();
    let open_set = ring_set(arena, arena_field, radii, Some(&near_closed));

    (closed_set, open_set)
}

fn ring_set(
    region: &[bool],
    field: &DistanceField,
    [r1, r2, r3]: [f64; 3],
    excluded: Option<&[bool]>,
) -> ZoneSet {
    let (w, h) = (field.width, field.height);
    let allowed = |i: usize| excluded.map(|mask| !mask[i]).unwrap_or(true);
    let d = &field.values;

    ZoneSet {
        zero: ZoneMask::from_fn(w, h, |i| allowed(i) && d[i].abs() <= r1),
        first: ZoneMask::from_fn(w, h, |i| allowed(i) && d[i] > r1 && d[i] <= r3),
        second: ZoneMask::from_fn(w, h, |i| allowed(i) && d[i] > r2 && d[i] <= r3),
        max: ZoneMask::from_fn(w, h, |i| allowed(i) && d[i] >= -r1 && d[i] <= r3),
        contour: boundary_pixels(region, w, h),
    }
}

fn rasterize(width: usize, height: usize, inside: impl Fn(&Point) -> bool) -> Vec<bool> {
    (0..width * height)
        .map(|i| inside(&Point::new((i % width) as f64, (i / width) as f64)))
        .collect()
}

fn rasterize_arena(arena: &ArenaShape, width: usize, height: usize) -> Vec<bool> {
    match arena {
        ArenaShape::Polygon { vertices } => {
            let polygon: Vec<Point> = vertices.iter().map(|[x, y]| Point::new(*x, *y)).collect();
            rasterize(width, height, |p| point_in_polygon(p, &polygon))
        }
        shape => rasterize(width, height, |p| shape.contains(p)),
    }
}

/// Region pixels with at least one 4-neighbour outside the region
fn boundary_pixels(region: &[bool], width: usize, height: usize) -> Vec<Point> {
    let at = |x: isize, y: isize| {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && region[y as usize * width + x as usize]
    };
    let mut contour = Vec::new();
    for y in 0..height as isize {
        for x in 0..width as isize {
            if at(x, y) && !(at(x - 1, y) && at(x + 1, y) && at(x, y - 1) && at(x, y + 1)) {
                contour.push(Point::new(x as f64, y as f64));
            }
        }
    }
    contour
}

/// Signed distance (pixels) to the boundary of a region: positive outside, non-positive inside
struct DistanceField {
    width: usize,
    height: usize,
    values: Vec<f64>,
}

impl DistanceField {
    fn signed(region: &[bool], width: usize, height: usize) -> Self {
        let outside = chamfer(region, width, height);
        let complement: Vec<bool> = region.iter().map(|v| !v).collect();
        let inside = chamfer(&complement, width, height);
        let values = region
            .iter()
            .enumerate()
            .map(|(i, in_region)| if *in_region { -inside[i] } else { outside[i] })
            .collect();
        Self {
            width,
            height,
            values,
        }
    }
}

/// Two-pass (1, √2) chamfer distance to the nearest source cell
fn chamfer(sources: &[bool], width: usize, height: usize) -> Vec<f64> {
    const DIAGONAL: f64 = std::f64::consts::SQRT_2;
    let mut d: Vec<f64> = sources
        .iter()
        .map(|s| if *s { 0.0 } else { f64::INFINITY })
        .collect();
    let idx = |x: usize, y: usize| y * width + x;

    for y in 0..height {
        for x in 0..width {
            let mut best = d[idx(x, y)];
            if x > 0 {
                best = best.min(d[idx(x - 1, y)] + 1.0);
            }
            if y > 0 {
                best = best.min(d[idx(x, y - 1)] + 1.0);
                if x > 0 {
                    best = best.min(d[idx(x - 1, y - 1)] + DIAGONAL);
                }
                if x + 1 < width {
                    best = best.min(d[idx(x + 1, y - 1)] + DIAGONAL);
                }
            }
            d[idx(x, y)] = best;
        }
    }

    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let mut best = d[idx(x, y)];
            if x + 1 < width {
                best = best.min(d[idx(x + 1, y)] + 1.0);
            }
            if y + 1 < height {
                best = best.min(d[idx(x, y + 1)] + 1.0);
                if x + 1 < width {
                    best = best.min(d[idx(x + 1, y + 1)] + DIAGONAL);
                }
                if x > 0 {
                    best = best.min(d[idx(x - 1, y + 1)] + DIAGONAL);
                }
            }
            d[idx(x, y)] = best;
        }
    }
    d
}
