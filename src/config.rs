//! Scoring configuration
//!
//! The full threshold parameter set used to score a session. Every section
//! carries `#[serde(default)]` so configuration files only need to name the
//! values they change. The effective configuration is persisted with each
//! saved session and reused verbatim when the session is reprocessed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ScoringError;
use crate::paradigm::Paradigm;
use crate::types::Behaviour;

/// Complete parameter set for one scoring run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub tracking: TrackingConfig,
    pub kinematics: KinematicsConfig,
    pub size: SizeConfig,
    pub zones: ZoneConfig,
    pub tail_rattling: TailRattlingConfig,
    pub grooming: GroomingConfig,
    pub stretch_attend: StretchAttendConfig,
    pub freezing: FreezingConfig,
    pub area_bound: AreaBoundConfig,
    pub flight: FlightConfig,
    pub episodes: EpisodeConfig,
    pub reallocation: ReallocationConfig,
}

/// Tracker confidence thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Positions below this confidence are treated as missing
    pub min_confidence: f64,
    /// Confidence required for body-centric alignment on the tail base
    pub high_confidence: f64,
    /// Below this a tracker is considered unreliable (hind-paw criteria)
    pub low_confidence: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            high_confidence: 0.95,
            low_confidence: 0.3,
        }
    }
}

/// Windows and smoothing widths for feature extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Speed / StepSpeed window (seconds)
    pub speed_window_s: f64,
    /// Median filter width applied to positions before speed computation (frames, odd)
    pub median_window_frames: usize,
    /// Gaussian σ for body-length distances (seconds)
    pub length_sigma_s: f64,
    /// Gaussian σ for the grooming product (seconds)
    pub product_sigma_s: f64,
    /// Gaussian σ for Motion (seconds)
    pub motion_sigma_s: f64,
    /// Gaussian σ for the smoothed whole-body StepSpeed (seconds)
    pub step_speed_sigma_s: f64,
    /// Value substituted for zero-valued smoothed grooming product
    pub product_sentinel: f64,
    /// Total AreaExplored window (seconds)
    pub area_window_s: f64,
    /// Share of the area window placed after the current frame
    pub area_leading_fraction: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            speed_window_s: 0.3,
            median_window_frames: 5,
            length_sigma_s: 0.1,
            product_sigma_s: 0.1,
            motion_sigma_s: 0.1,
            step_speed_sigma_s: 0.2,
            product_sentinel: 1000.0,
            area_window_s: 3.0,
            area_leading_fraction: 0.25,
        }
    }
}

/// Mouse-size calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeConfig {
    /// Percentile of TotalLength over the selected frames
    pub length_percentile: f64,
    /// Plausible StretchRatio band for well-postured frames
    pub stretch_ratio_min: f64,
    pub stretch_ratio_max: f64,
    /// Largest bend (degrees) between tail-base→centroid and centroid→mid-ears
    pub max_bend_deg: f64,
    /// Hind-paw extension (cm) counted as visibly extended
    pub paw_visible_cm: f64,
    /// TotalLength of a reference mouse (cm)
    pub reference_length_cm: f64,
    /// Percentile of the mid-ears↔snout distance
    pub snout_percentile: f64,
    /// Mid-ears↔snout distance of a reference mouse (cm)
    pub reference_snout_cm: f64,
    /// Weight of the body-length correction in the blend (rest goes to snout distance)
    pub blend_weight: f64,
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            length_percentile: 85.0,
            stretch_ratio_min: 1.8,
            stretch_ratio_max: 2.0,
            max_bend_deg: 20.0,
            paw_visible_cm: 0.3,
            reference_length_cm: 7.0,
            snout_percentile: 85.0,
            reference_snout_cm: 1.6,
            blend_weight: 0.75,
        }
    }
}

/// Ring radii around zone boundaries (cm, scaled by the size correction)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub first_ring_cm: f64,
    pub second_ring_cm: f64,
    pub third_ring_cm: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            first_ring_cm: 0.5,
            second_ring_cm: 1.5,
            third_ring_cm: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailRattlingConfig {
    /// Minimum tail-tip minus tail-base StepSpeed (cm/s)
    pub tail_speed_difference: f64,
    /// Whole-body StepSpeed cap (cm/s)
    pub body_speed_cap: f64,
    /// Tail-base StepSpeed cap (cm/s)
    pub reference_speed_cap: f64,
}

impl Default for TailRattlingConfig {
    fn default() -> Self {
        Self {
            tail_speed_difference: 10.0,
            body_speed_cap: 3.0,
            reference_speed_cap: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroomingConfig {
    /// Product threshold for a reference-size mouse
    pub product_threshold: f64,
    /// Whole-body StepSpeed cap (cm/s)
    pub step_speed_cap: f64,
    /// Motion must exceed this (total stillness is freezing)
    pub motion_floor: f64,
}

impl Default for GroomingConfig {
    fn default() -> Self {
        Self {
            product_threshold: 4.5,
            step_speed_cap: 2.0,
            motion_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchAttendConfig {
    /// TotalLength threshold for a reference-size mouse (cm)
    pub length_threshold_cm: f64,
    /// Smoothed whole-body StepSpeed cap (cm/s)
    pub step_speed_cap: f64,
    /// Hind-paw extension both paws must stay under (cm)
    pub paw_low_cm: f64,
    /// Looser bound for the second paw when only one paw is under `paw_low_cm`
    pub paw_high_cm: f64,
    /// Frames with a defined StretchRatio below this are rotation-corrupted
    pub min_stretch_ratio: f64,
    /// Rearing claims frames before stretch-attend
    pub rearing_over_stretch_attend: bool,
}

impl Default for StretchAttendConfig {
    fn default() -> Self {
        Self {
            length_threshold_cm: 8.0,
            step_speed_cap: 1.5,
            paw_low_cm: 0.5,
            paw_high_cm: 1.0,
            min_stretch_ratio: 1.8,
            rearing_over_stretch_attend: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezingConfig {
    /// Smoothed Motion below this is freezing
    pub motion_threshold: f64,
}

impl Default for FreezingConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 1.5,
        }
    }
}

/// Per-paradigm AreaExplored thresholds (cm²)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaBoundConfig {
    pub default_cm2: f64,
    pub open_field_cm2: f64,
    pub elevated_plus_maze_cm2: f64,
    pub light_dark_box_cm2: f64,
    pub rgb_cm2: f64,
}

impl Default for AreaBoundConfig {
    fn default() -> Self {
        Self {
            default_cm2: 25.0,
            open_field_cm2: 25.0,
            elevated_plus_maze_cm2: 15.0,
            light_dark_box_cm2: 20.0,
            rgb_cm2: 25.0,
        }
    }
}

impl AreaBoundConfig {
    pub fn threshold_for(&self, paradigm: Paradigm) -> f64 {
        match paradigm {
            Paradigm::OpenField => self.open_field_cm2,
            Paradigm::ElevatedPlusMaze => self.elevated_plus_maze_cm2,
            Paradigm::LightDarkBox => self.light_dark_box_cm2,
            Paradigm::Rgb => self.rgb_cm2,
            Paradigm::Default => self.default_cm2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// StepSpeed at or above this is flight (cm/s)
    pub step_speed_threshold: f64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            step_speed_threshold: 20.0,
        }
    }
}

/// Merge gap and minimum duration applied when resolving one behaviour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRule {
    pub merge_gap_s: f64,
    pub min_duration_s: f64,
}

impl EpisodeRule {
    pub const fn new(merge_gap_s: f64, min_duration_s: f64) -> Self {
        Self {
            merge_gap_s,
            min_duration_s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Rule for behaviours without an explicit entry
    pub fallback: EpisodeRule,
    pub rules: BTreeMap<Behaviour, EpisodeRule>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        let rules = [
            (Behaviour::TailRattling, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::Grooming, EpisodeRule::new(0.1, 0.5)),
            (Behaviour::OpenRearing, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::Rearing, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::WallRearing, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::HeadDips, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::StretchAttend, EpisodeRule::new(0.1, 0.3)),
            (Behaviour::Freezing, EpisodeRule::new(0.1, 0.5)),
            (Behaviour::AreaBound, EpisodeRule::new(0.0, 0.0)),
            (Behaviour::Flight, EpisodeRule::new(0.1, 0.2)),
            (Behaviour::Remaining, EpisodeRule::new(0.0, 0.0)),
        ]
        .into_iter()
        .collect();

        Self {
            fallback: EpisodeRule::new(0.1, 0.2),
            rules,
        }
    }
}

impl EpisodeConfig {
    pub fn rule(&self, behaviour: Behaviour) -> EpisodeRule {
        self.rules.get(&behaviour).copied().unwrap_or(self.fallback)
    }
}

/// Which neighbours must qualify before a small episode is absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighbourSides {
    Both,
    Either,
}

/// One pass of the AreaBound / Remaining small-episode reallocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReallocationPass {
    /// Episodes shorter than this are candidates for absorption (seconds)
    pub small_s: f64,
    /// Minimum neighbour duration (seconds); absent means any neighbour qualifies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbour_min_s: Option<f64>,
    pub sides: NeighbourSides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReallocationConfig {
    pub passes: Vec<ReallocationPass>,
}

impl Default for ReallocationConfig {
    fn default() -> Self {
        Self {
            passes: vec![
                ReallocationPass {
                    small_s: 0.25,
                    neighbour_min_s: Some(0.5),
                    sides: NeighbourSides::Both,
                },
                ReallocationPass {
                    small_s: 0.1,
                    neighbour_min_s: None,
                    sides: NeighbourSides::Either,
                },
            ],
        }
    }
}

impl ScoringConfig {
    /// Parse a TOML configuration, filling unspecified values with defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ScoringError> {
        let config: ScoringConfig = toml::from_str(content)
            .map_err(|e| ScoringError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration, filling unspecified values with defaults
    pub fn from_json(content: &str) -> Result<Self, ScoringError> {
        let config: ScoringConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `.json` files are read as JSON, anything else as TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScoringError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScoringError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ScoringError> {
        toml::to_string_pretty(self)
            .map_err(|e| ScoringError::ConfigError(format!("Failed to encode config: {}", e)))
    }

    /// Reject parameter sets that cannot produce meaningful results
    pub fn validate(&self) -> Result<(), ScoringError> {
        let fail = |msg: &str| Err(ScoringError::ConfigError(msg.to_string()));

        let t = &self.tracking;
        if !(0.0..=1.0).contains(&t.min_confidence)
            || !(0.0..=1.0).contains(&t.high_confidence)
            || !(0.0..=1.0).contains(&t.low_confidence)
        {
            return fail("confidence thresholds must lie in [0, 1]");
        }

        let k = &self.kinematics;
        if k.speed_window_s <= 0.0 || k.area_window_s <= 0.0 {
            return fail("speed and area windows must be positive");
        }
        if k.median_window_frames == 0 {
            return fail("median_window_frames must be at least 1");
        }
        if k.length_sigma_s < 0.0
            || k.product_sigma_s < 0.0
            || k.motion_sigma_s < 0.0
            || k.step_speed_sigma_s < 0.0
        {
            return fail("smoothing widths must not be negative");
        }
        if !(0.0..=1.0).contains(&k.area_leading_fraction) {
            return fail("area_leading_fraction must lie in [0, 1]");
        }

        let s = &self.size;
        if s.stretch_ratio_min >= s.stretch_ratio_max {
            return fail("stretch_ratio_min must be below stretch_ratio_max");
        }
        if s.reference_length_cm <= 0.0 || s.reference_snout_cm <= 0.0 {
            return fail("reference lengths must be positive");
        }
        if !(0.0..=1.0).contains(&s.blend_weight) {
            return fail("blend_weight must lie in [0, 1]");
        }
        if !(0.0..=100.0).contains(&s.length_percentile)
            || !(0.0..=100.0).contains(&s.snout_percentile)
        {
            return fail("percentiles must lie in [0, 100]");
        }

        let z = &self.zones;
        if !(0.0 < z.first_ring_cm && z.first_ring_cm < z.second_ring_cm && z.second_ring_cm < z.third_ring_cm) {
            return fail("ring radii must be positive and strictly increasing");
        }

        if self.stretch_attend.paw_low_cm > self.stretch_attend.paw_high_cm {
            return fail("stretch_attend.paw_low_cm must not exceed paw_high_cm");
        }

        let mut rules: Vec<EpisodeRule> = self.episodes.rules.values().copied().collect();
        rules.push(self.episodes.fallback);
        if rules
            .iter()
            .any(|r| r.merge_gap_s < 0.0 || r.min_duration_s < 0.0)
        {
            return fail("episode merge gaps and minimum durations must not be negative");
        }

        if self.reallocation.passes.iter().any(|p| p.small_s <= 0.0) {
            return fail("reallocation small_s must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ScoringConfig::from_toml_str(
            r#"
            [freezing]
            motion_threshold = 2.0

            [stretch_attend]
            rearing_over_stretch_attend = false
            "#,
        )
        .unwrap();

        assert_eq!(config.freezing.motion_threshold, 2.0);
        assert!(!config.stretch_attend.rearing_over_stretch_attend);
        assert_eq!(config.grooming, GroomingConfig::default());
        assert_eq!(config.reallocation, ReallocationConfig::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ScoringConfig::default();
        let text = config.to_toml_string().unwrap();
        let back = ScoringConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_json_partial() {
        let config = ScoringConfig::from_json(r#"{"flight": {"step_speed_threshold": 30.0}}"#)
            .unwrap();
        assert_eq!(config.flight.step_speed_threshold, 30.0);
        assert_eq!(config.episodes.rule(Behaviour::Grooming), EpisodeRule::new(0.1, 0.5));
    }

    #[test]
    fn test_rejects_inverted_rings() {
        let mut config = ScoringConfig::default();
        config.zones.second_ring_cm = 0.2;
        assert!(matches!(
            config.validate(),
            Err(ScoringError::ConfigError(_))
        ));
    }

    #[test]
    fn test_area_threshold_per_paradigm() {
        let area = AreaBoundConfig::default();
        assert_eq!(area.threshold_for(Paradigm::ElevatedPlusMaze), 15.0);
        assert_eq!(area.threshold_for(Paradigm::Default), 25.0);
    }
}
