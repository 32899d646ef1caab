//! Kinematic and morphological feature extraction
//!
//! Derives per-frame feature series from the validated tracks: speeds over a
//! trailing window, smoothed body-length measures, the grooming product,
//! hind-paw extension, mid-body width and the area explored around each frame.
//! All series are aligned 1:1 with the time base and carry gaps through.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::adapter::SessionData;
use crate::calibration::CalibrationContext;
use crate::config::{KinematicsConfig, ScoringConfig, TrackingConfig};
use crate::geometry::{angle_difference, min_area_rect, to_body_frame};
use crate::signal::{gaussian_smooth, median_filter_points, zip_with};
use crate::types::{BodyPart, Point, Series, TimeBase, TrackSet};

/// Feature series of one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSeries {
    /// Contour-tracker motion measure as supplied
    pub motion: Series,
    pub smoothed_motion: Series,
    /// Whole-body (centroid) path-length speed, cm/s
    pub speed: Series,
    /// Whole-body (centroid) net-displacement speed, cm/s
    pub step_speed: Series,
    pub smoothed_step_speed: Series,
    pub part_speed: BTreeMap<BodyPart, Series>,
    pub part_step_speed: BTreeMap<BodyPart, Series>,
    /// Smoothed distances in cm
    pub ears_to_centroid: Series,
    pub ears_to_snout: Series,
    pub ears_to_tail_base: Series,
    pub tail_base_to_centroid: Series,
    pub total_length: Series,
    /// Smoothed sqrt(ears↔snout) × ears↔tail-base; fully defined (sentinel on gaps)
    pub grooming_product: Series,
    /// Extension of each hind paw behind the tail base along the body axis, cm
    pub hind_paw_left: Series,
    pub hind_paw_right: Series,
    /// Bend between tail-base→centroid and centroid→mid-ears, degrees
    pub bend_angle: Series,
    pub mid_body_length: Series,
    pub stretch_ratio: Series,
    /// Minimum bounding-rectangle area of recent centroid positions, cm²
    pub area_explored: Series,
    /// Frames whose AreaExplored was undefined because the points were degenerate
    pub degenerate_area_frames: usize,
}

impl FeatureSeries {
    pub fn len(&self) -> usize {
        self.motion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motion.is_empty()
    }

    pub fn part_step_speed(&self, part: BodyPart) -> Option<&Series> {
        self.part_step_speed.get(&part)
    }
}

/// Feature extractor for validated session data
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Derive all feature series for a session
    pub fn extract(data: &SessionData, config: &ScoringConfig) -> FeatureSeries {
        let k = &config.kinematics;
        let tb = &data.time_base;
        let cal = &data.calibration;
        let tracks = &data.tracks;
        let n = tb.len();
        let sigma = |seconds: f64| seconds / tb.frame_period();

        // Speeds
        let window = tb.frames_for(k.speed_window_s);
        let centroid = median_filter_points(&tracks.centroid, k.median_window_frames);
        let speed = path_speed(&centroid, tb, window, cal.pixels_per_cm);
        let body_step_speed = step_speed(&centroid, tb, window, cal.pixels_per_cm);
        let smoothed_step_speed = gaussian_smooth(&body_step_speed, sigma(k.step_speed_sigma_s));

        let mut part_speed = BTreeMap::new();
        let mut part_step_speed = BTreeMap::new();
        for (part, track) in &tracks.parts {
            let filtered = median_filter_points(&track.positions, k.median_window_frames);
            part_speed.insert(*part, path_speed(&filtered, tb, window, cal.pixels_per_cm));
            part_step_speed.insert(*part, step_speed(&filtered, tb, window, cal.pixels_per_cm));
        }

        // Body-length measures
        let mid_ears: Vec<Option<Point>> = (0..n)
            .map(|t| {
                let left = tracks.position(BodyPart::EarLeft, t)?;
                let right = tracks.position(BodyPart::EarRight, t)?;
                Some(left.midpoint(&right))
            })
            .collect();
        let snout = part_positions(tracks, BodyPart::Snout, n);
        let tail_base = part_positions(tracks, BodyPart::TailBase, n);

        let length_sigma = sigma(k.length_sigma_s);
        let smoothed_distance = |a: &[Option<Point>], b: &[Option<Point>]| {
            gaussian_smooth(&distance_cm(a, b, cal.pixels_per_cm), length_sigma)
        };
        let ears_to_centroid = smoothed_distance(&mid_ears, &tracks.centroid);
        let ears_to_snout = smoothed_distance(&mid_ears, &snout);
        let ears_to_tail_base = smoothed_distance(&mid_ears, &tail_base);
        let tail_base_to_centroid = smoothed_distance(&tail_base, &tracks.centroid);
        let total_length = zip_with(&tail_base_to_centroid, &ears_to_centroid, |a, b| a + b);

        let grooming_product = grooming_product(
            &ears_to_snout,
            &ears_to_tail_base,
            sigma(k.product_sigma_s),
            k.product_sentinel,
        );

        let (hind_paw_left, hind_paw_right) =
            hind_paw_extension(tracks, &config.tracking, cal, n);

        let bend_angle = (0..n)
            .map(|t| bend_angle(tail_base[t]?, tracks.centroid[t]?, mid_ears[t]?))
            .collect();

        let mid_body_length = match &data.contours {
            Some(contours) => mid_body_lengths(contours, tracks, &mid_ears, cal),
            None => vec![None; n],
        };
        let stretch_ratio = zip_with(&total_length, &mid_body_length, |len, width| {
            if width > 0.0 {
                len / width
            } else {
                f64::NAN
            }
        })
        .into_iter()
        .map(|v| v.filter(|v| v.is_finite()))
        .collect();

        let (area_explored, degenerate_area_frames) =
            area_explored(&centroid, tb, k, cal.pixels_per_cm);

        let motion = data.motion.clone();
        let smoothed_motion = gaussian_smooth(&motion, sigma(k.motion_sigma_s));

        FeatureSeries {
            motion,
            smoothed_motion,
            speed,
            step_speed: body_step_speed,
            smoothed_step_speed,
            part_speed,
            part_step_speed,
            ears_to_centroid,
            ears_to_snout,
            ears_to_tail_base,
            tail_base_to_centroid,
            total_length,
            grooming_product,
            hind_paw_left,
            hind_paw_right,
            bend_angle,
            mid_body_length,
            stretch_ratio,
            area_explored,
            degenerate_area_frames,
        }
    }
}

fn part_positions(tracks: &TrackSet, part: BodyPart, n: usize) -> Vec<Option<Point>> {
    (0..n).map(|t| tracks.position(part, t)).collect()
}

fn distance_cm(a: &[Option<Point>], b: &[Option<Point>], pixels_per_cm: f64) -> Series {
    a.iter()
        .zip(b)
        .map(|(p, q)| Some(p.as_ref()?.distance(q.as_ref()?) / pixels_per_cm))
        .collect()
}

/// Summed path length over the trailing window divided by its duration.
///
/// Undefined for the first `window` frames and whenever the window contains a gap.
fn path_speed(
    points: &[Option<Point>],
    tb: &TimeBase,
    window: usize,
    pixels_per_cm: f64,
) -> Series {
    (0..points.len())
        .map(|t| {
            if t < window {
                return None;
            }
            let mut path = 0.0;
            for k in (t - window + 1)..=t {
                path += points[k]?.distance(&points[k - 1]?);
            }
            Some(path / pixels_per_cm / (tb.time(t) - tb.time(t - window)))
        })
        .collect()
}

/// Straight-line displacement between `t - window` and `t` divided by the duration
fn step_speed(
    points: &[Option<Point>],
    tb: &TimeBase,
    window: usize,
    pixels_per_cm: f64,
) -> Series {
    (0..points.len())
        .map(|t| {
            if t < window {
                return None;
            }
            let displacement = points[t]?.distance(&points[t - window]?);
            Some(displacement / pixels_per_cm / (tb.time(t) - tb.time(t - window)))
        })
        .collect()
}

/// Grooming product, smoothed; gaps and zero-valued points become `sentinel`
fn grooming_product(
    ears_to_snout: &[Option<f64>],
    ears_to_tail_base: &[Option<f64>],
    sigma: f64,
    sentinel: f64,
) -> Series {
    let raw = zip_with(ears_to_snout, ears_to_tail_base, |snout, tail| {
        snout.max(0.0).sqrt() * tail
    });
    gaussian_smooth(&raw, sigma)
        .into_iter()
        .map(|v| match v {
            Some(v) if v != 0.0 => Some(v),
            _ => Some(sentinel),
        })
        .collect()
}

fn hind_paw_extension(
    tracks: &TrackSet,
    tracking: &TrackingConfig,
    cal: &CalibrationContext,
    n: usize,
) -> (Series, Series) {
    let tail_track = tracks.get(BodyPart::TailBase);
    let extension = |paw: BodyPart| -> Series {
        (0..n)
            .map(|t| {
                let confident = tail_track
                    .map(|track| track.confidence_at(t) >= tracking.high_confidence)
                    .unwrap_or(false);
                if !confident {
                    return None;
                }
                let origin = tracks.position(BodyPart::TailBase, t)?;
                let toward = tracks.centroid[t]?;
                let paw = tracks.position(paw, t)?;
                let (_, y) = to_body_frame(&paw, &origin, &toward)?;
                // +y points toward the head; extension behind the tail base is -y
                Some(-y / cal.pixels_per_cm)
            })
            .collect()
    };
    (
        extension(BodyPart::HindPawLeft),
        extension(BodyPart::HindPawRight),
    )
}

fn bend_angle(tail_base: Point, centroid: Point, mid_ears: Point) -> Option<f64> {
    let back = tail_base.distance(&centroid);
    let front = centroid.distance(&mid_ears);
    if back == 0.0 || front == 0.0 {
        return None;
    }
    let a = centroid.angle_from(&tail_base);
    let b = mid_ears.angle_from(&centroid);
    Some(angle_difference(a, b).to_degrees())
}

/// Body width across the angle bisecting mid-ears and tail base, per frame.
///
/// Frames are independent, so the search runs on the rayon pool; `collect`
/// keeps frame order.
fn mid_body_lengths(
    contours: &[Vec<Point>],
    tracks: &TrackSet,
    mid_ears: &[Option<Point>],
    cal: &CalibrationContext,
) -> Series {
    contours
        .par_iter()
        .enumerate()
        .map(|(t, contour)| {
            let centroid = tracks.centroid[t]?;
            let ears = mid_ears[t]?;
            let tail = tracks.position(BodyPart::TailBase, t)?;
            mid_body_width(contour, &centroid, &ears, &tail).map(|px| px / cal.pixels_per_cm)
        })
        .collect()
}

/// Distance between the contour points nearest to both bisector directions, pixels
pub fn mid_body_width(
    contour: &[Point],
    centroid: &Point,
    mid_ears: &Point,
    tail_base: &Point,
) -> Option<f64> {
    if contour.len() < 3 {
        return None;
    }
    let head = mid_ears.angle_from(centroid);
    let tail = tail_base.angle_from(centroid);
    let (sin_sum, cos_sum) = (head.sin() + tail.sin(), head.cos() + tail.cos());
    // a straight body leaves the bisector undefined; take the perpendicular
    let bisector = if sin_sum.hypot(cos_sum) < 1e-9 {
        head + std::f64::consts::FRAC_PI_2
    } else {
        sin_sum.atan2(cos_sum)
    };

    let nearest = |target: f64| {
        contour.iter().min_by(|a, b| {
            let da = angle_difference(a.angle_from(centroid), target);
            let db = angle_difference(b.angle_from(centroid), target);
            da.total_cmp(&db)
        })
    };
    let first = nearest(bisector)?;
    let second = nearest(bisector + std::f64::consts::PI)?;
    Some(first.distance(second))
}

/// Bounding-rectangle area of centroid positions in an asymmetric window, cm²
fn area_explored(
    centroid: &[Option<Point>],
    tb: &TimeBase,
    k: &KinematicsConfig,
    pixels_per_cm: f64,
) -> (Series, usize) {
    let n = centroid.len();
    let leading = (k.area_window_s * k.area_leading_fraction / tb.frame_period()).round() as usize;
    let trailing =
        (k.area_window_s * (1.0 - k.area_leading_fraction) / tb.frame_period()).round() as usize;
    let px2_per_cm2 = pixels_per_cm * pixels_per_cm;

    let mut degenerate = 0;
    let mut buf = Vec::new();
    let area: Series = (0..n)
        .map(|t| {
            let lo = t.saturating_sub(trailing);
            let hi = (t + leading).min(n - 1);
            buf.clear();
            buf.extend(centroid[lo..=hi].iter().flatten().copied());
            if buf.is_empty() {
                return None;
            }
            match min_area_rect(&buf) {
                Some(area) => Some(area / px2_per_cm2),
                None => {
                    degenerate += 1;
                    None
                }
            }
        })
        .collect();

    (area, degenerate)
}
