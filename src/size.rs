//! Mouse-size calibration
//!
//! Estimates a per-session correction factor relative to a reference mouse
//! from frames where the animal is in a standard, well-postured stance. Every
//! size-dependent threshold (grooming product, stretch length, ring radii)
//! scales by this factor. Once computed the value travels with the saved
//! session and is reused on reprocessing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{SizeConfig, TrackingConfig};
use crate::features::FeatureSeries;
use crate::signal::percentile;
use crate::types::{BodyPart, TrackSet};

/// Outcome of the size calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeCalibration {
    /// Blended correction factor (1.0 = reference mouse)
    pub correction: f64,
    /// Body-length based estimate
    pub primary: Option<f64>,
    /// Snout-distance based estimate
    pub secondary: Option<f64>,
    /// Frames that passed the posture selection
    pub frames_used: usize,
    /// No frame qualified and the neutral factor was used
    pub fallback: bool,
}

impl SizeCalibration {
    /// Neutral calibration used when nothing can be measured
    pub fn neutral() -> Self {
        Self {
            correction: 1.0,
            primary: None,
            secondary: None,
            frames_used: 0,
            fallback: true,
        }
    }

    /// Calibration restored from a previous save
    pub fn fixed(correction: f64) -> Self {
        Self {
            correction,
            primary: None,
            secondary: None,
            frames_used: 0,
            fallback: false,
        }
    }
}

/// Size calibrator over extracted feature series
pub struct SizeCalibrator;

impl SizeCalibrator {
    /// Estimate the size correction of a session
    pub fn calibrate(
        features: &FeatureSeries,
        tracks: &TrackSet,
        size: &SizeConfig,
        tracking: &TrackingConfig,
    ) -> SizeCalibration {
        let selected = Self::select_frames(features, tracks, size, tracking);
        if selected.is_empty() {
            warn!("no frames passed size-calibration selection, using neutral correction");
            return SizeCalibration::neutral();
        }

        let lengths: Vec<f64> = selected
            .iter()
            .filter_map(|&t| features.total_length[t])
            .collect();
        let snouts: Vec<f64> = selected
            .iter()
            .filter_map(|&t| features.ears_to_snout[t])
            .collect();

        let primary = percentile(&lengths, size.length_percentile)
            .map(|v| v / size.reference_length_cm);
        let secondary = percentile(&snouts, size.snout_percentile)
            .map(|v| v / size.reference_snout_cm);

        let correction = match (primary, secondary) {
            (Some(p), Some(s)) => size.blend_weight * p + (1.0 - size.blend_weight) * s,
            (Some(p), None) => p,
            _ => {
                warn!("size calibration produced no body length, using neutral correction");
                return SizeCalibration::neutral();
            }
        };

        if !(correction.is_finite() && correction > 0.0) {
            warn!(correction, "size correction out of range, using neutral correction");
            return SizeCalibration::neutral();
        }

        debug!(
            correction,
            frames = selected.len(),
            "size calibration complete"
        );

        SizeCalibration {
            correction,
            primary,
            secondary,
            frames_used: selected.len(),
            fallback: false,
        }
    }

    /// Frames in a standard stance: straight body, plausible stretch ratio and
    /// hind paws either visibly extended or both untracked.
    pub fn select_frames(
        features: &FeatureSeries,
        tracks: &TrackSet,
        size: &SizeConfig,
        tracking: &TrackingConfig,
    ) -> Vec<usize> {
        let has_contours = features.mid_body_length.iter().any(Option::is_some);
        if !has_contours {
            warn!("no mid-body measurements, skipping stretch-ratio criterion");
        }

        let paw_confidence = |part: BodyPart, t: usize| {
            tracks.get(part).map(|track| track.confidence_at(t)).unwrap_or(0.0)
        };

        (0..features.len())
            .filter(|&t| {
                let straight = features.bend_angle[t]
                    .map(|bend| bend <= size.max_bend_deg)
                    .unwrap_or(false);
                if !straight || features.total_length[t].is_none() {
                    return false;
                }

                if has_contours {
                    let in_band = features.stretch_ratio[t]
                        .map(|r| r >= size.stretch_ratio_min && r <= size.stretch_ratio_max)
                        .unwrap_or(false);
                    if !in_band {
                        return false;
                    }
                }

                let extended = |ext: Option<f64>| ext.map(|e| e >= size.paw_visible_cm).unwrap_or(false);
                let both_extended =
                    extended(features.hind_paw_left[t]) && extended(features.hind_paw_right[t]);
                let both_hidden = paw_confidence(BodyPart::HindPawLeft, t) < tracking.low_confidence
                    && paw_confidence(BodyPart::HindPawRight, t) < tracking.low_confidence;
                both_extended || both_hidden
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point, Track};
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn features(n: usize, length: f64, snout: f64) -> FeatureSeries {
        FeatureSeries {
            motion: vec![Some(1.0); n],
            total_length: vec![Some(length); n],
            ears_to_snout: vec![Some(snout); n],
            bend_angle: vec![Some(5.0); n],
            hind_paw_left: vec![Some(0.5); n],
            hind_paw_right: vec![Some(0.5); n],
            mid_body_length: vec![None; n],
            stretch_ratio: vec![None; n],
            ..Default::default()
        }
    }

    fn paws(n: usize, confidence: f64) -> TrackSet {
        let mut parts = BTreeMap::new();
        for part in [BodyPart::HindPawLeft, BodyPart::HindPawRight] {
            parts.insert(
                part,
                Track {
                    part,
                    positions: vec![Some(Point::new(0.0, 0.0)); n],
                    confidence: vec![Some(confidence); n],
                },
            );
        }
        TrackSet {
            parts,
            centroid: vec![None; n],
        }
    }

    #[test]
    fn test_reference_mouse_is_neutral() {
        let f = features(40, 7.0, 1.6);
        let cal = SizeCalibrator::calibrate(
            &f,
            &paws(40, 0.99),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert!(!cal.fallback);
        assert_eq!(cal.frames_used, 40);
        assert_relative_eq!(cal.correction, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_blend_of_length_and_snout() {
        let f = features(40, 7.7, 1.6);
        let cal = SizeCalibrator::calibrate(
            &f,
            &paws(40, 0.99),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert_relative_eq!(cal.primary.unwrap(), 1.1, epsilon = 1e-12);
        assert_relative_eq!(cal.secondary.unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cal.correction, 0.75 * 1.1 + 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_bent_frames_are_rejected() {
        let mut f = features(40, 7.0, 1.6);
        f.bend_angle = vec![Some(45.0); 40];
        let cal = SizeCalibrator::calibrate(
            &f,
            &paws(40, 0.99),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert!(cal.fallback);
        assert_eq!(cal.correction, 1.0);
    }

    #[test]
    fn test_hidden_paws_qualify() {
        let mut f = features(10, 7.0, 1.6);
        f.hind_paw_left = vec![None; 10];
        f.hind_paw_right = vec![Some(0.1); 10];

        let visible = SizeCalibrator::select_frames(
            &f,
            &paws(10, 0.99),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert!(visible.is_empty());

        let hidden = SizeCalibrator::select_frames(
            &f,
            &paws(10, 0.1),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert_eq!(hidden.len(), 10);
    }

    #[test]
    fn test_stretch_ratio_band_applies_with_contours() {
        let mut f = features(10, 7.0, 1.6);
        f.mid_body_length = vec![Some(3.5); 10];
        f.stretch_ratio = vec![Some(2.0); 10];
        f.stretch_ratio[3] = Some(2.4);
        f.stretch_ratio[4] = None;
        let selected = SizeCalibrator::select_frames(
            &f,
            &paws(10, 0.99),
            &SizeConfig::default(),
            &TrackingConfig::default(),
        );
        assert_eq!(selected.len(), 8);
        assert!(!selected.contains(&3));
        assert!(!selected.contains(&4));
    }

    #[test]
    fn test_correction_scales_with_mouse() {
        let small = features(30, 6.3, 1.44);
        let large = features(30, 6.3 * 1.1, 1.44 * 1.1);
        let size = SizeConfig::default();
        let tracking = TrackingConfig::default();
        let a = SizeCalibrator::calibrate(&small, &paws(30, 0.99), &size, &tracking);
        let b = SizeCalibrator::calibrate(&large, &paws(30, 0.99), &size, &tracking);
        assert_relative_eq!(b.correction, a.correction * 1.1, epsilon = 1e-9);
    }
}
