//! Behaviour classification
//!
//! A fixed-priority cascade of per-behaviour predicates. Each stage computes
//! its raw per-frame predicate and then drops every frame already claimed by
//! an earlier stage, so the resulting masks are mutually exclusive and
//! `Remaining` absorbs whatever is left.

use tracing::{debug, error};

use crate::config::ScoringConfig;
use crate::episodes::update_logical;
use crate::error::ScoringError;
use crate::features::FeatureSeries;
use crate::paradigm::Paradigm;
use crate::types::{Behaviour, BehaviourMap, BehaviourMask, BodyPart, Episode, TimeBase, TrackSet};
use crate::zones::{Ring, SpatialZones, ZoneGroup};

/// Read-only view of everything the predicates consult
#[derive(Debug, Clone, Copy)]
pub struct ClassificationContext<'a> {
    pub paradigm: Paradigm,
    pub time_base: &'a TimeBase,
    pub tracks: &'a TrackSet,
    pub features: &'a FeatureSeries,
    pub zones: &'a SpatialZones,
    /// Externally scored open-arm rearing
    pub open_rearing: &'a [Episode],
    pub size_correction: f64,
}

impl ClassificationContext<'_> {
    fn len(&self) -> usize {
        self.time_base.len()
    }
}

/// Priority-cascade classifier
pub struct BehaviourClassifier<'a> {
    config: &'a ScoringConfig,
}

impl<'a> BehaviourClassifier<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Evaluation order of the cascade.
    ///
    /// With `rearing_over_stretch_attend` disabled, stretch-attend moves ahead of
    /// the rearing family and claims contested frames first.
    pub fn order(&self) -> Vec<Behaviour> {
        if self.config.stretch_attend.rearing_over_stretch_attend {
            return Behaviour::PRIORITY.to_vec();
        }
        let mut order: Vec<Behaviour> = Behaviour::PRIORITY
            .iter()
            .copied()
            .filter(|b| *b != Behaviour::StretchAttend)
            .collect();
        let first_rearing = order
            .iter()
            .position(|b| b.is_rearing())
            .unwrap_or(order.len());
        order.insert(first_rearing, Behaviour::StretchAttend);
        order
    }

    /// Run the full cascade and check the result
    pub fn classify(
        &self,
        ctx: &ClassificationContext<'_>,
    ) -> Result<BehaviourMap<BehaviourMask>, ScoringError> {
        self.classify_with(ctx, &BehaviourMap::default())
    }

    /// Run the cascade with some stages pinned to known masks.
    ///
    /// Pinned masks (typically projected from edited or saved episodes) take
    /// the place of the predicate but are still excluded by earlier stages.
    /// `Remaining` is always recomputed so every frame stays covered.
    pub fn classify_with(
        &self,
        ctx: &ClassificationContext<'_>,
        pinned: &BehaviourMap<Option<BehaviourMask>>,
    ) -> Result<BehaviourMap<BehaviourMask>, ScoringError> {
        let mut masks: BehaviourMap<BehaviourMask> = BehaviourMap::default();
        let mut claimed = BehaviourMask::empty(ctx.len());

        for behaviour in self.order() {
            let raw = match &pinned[behaviour] {
                Some(mask) if behaviour != Behaviour::Remaining => mask.clone(),
                _ => self.predicate(behaviour, ctx),
            };
            let mask = raw.excluding(&claimed);
            claimed = claimed.union(&mask);
            debug!(behaviour = behaviour.as_str(), frames = mask.count(), "stage classified");
            masks[behaviour] = mask;
        }

        verify_masks(&masks, ctx.len())?;
        Ok(masks)
    }

    /// Raw predicate of one behaviour, before exclusion by earlier stages
    pub fn predicate(&self, behaviour: Behaviour, ctx: &ClassificationContext<'_>) -> BehaviourMask {
        let n = ctx.len();
        match behaviour {
            Behaviour::TailRattling if ctx.paradigm.supports_tail_rattling() => {
                self.tail_rattling(ctx)
            }
            Behaviour::Grooming => self.grooming(ctx),
            Behaviour::OpenRearing if ctx.paradigm.supports_open_rearing() => {
                update_logical(ctx.open_rearing, ctx.time_base)
            }
            Behaviour::Rearing => {
                let group = if ctx.paradigm.supports_head_dips()
                    && ctx.zones.group(ZoneGroup::ClosedArms).is_some()
                {
                    ZoneGroup::ClosedArms
                } else {
                    ZoneGroup::Arena
                };
                rearing_in(group, ctx)
            }
            Behaviour::WallRearing if ctx.paradigm.supports_wall_rearing() => {
                rearing_in(ZoneGroup::MiddleWall, ctx)
            }
            Behaviour::HeadDips if ctx.paradigm.supports_head_dips() => head_dips(ctx),
            Behaviour::StretchAttend => self.stretch_attend(ctx),
            Behaviour::Freezing => {
                let threshold = self.config.freezing.motion_threshold;
                below(&ctx.features.smoothed_motion, threshold, n)
            }
            Behaviour::AreaBound => {
                let threshold = self.config.area_bound.threshold_for(ctx.paradigm);
                below(&ctx.features.area_explored, threshold, n)
            }
            Behaviour::Flight => {
                let threshold = self.config.flight.step_speed_threshold;
                BehaviourMask::from_fn(n, |t| {
                    ctx.features.step_speed[t].map(|v| v >= threshold).unwrap_or(false)
                })
            }
            Behaviour::Remaining => BehaviourMask::from_fn(n, |_| true),
            _ => BehaviourMask::empty(n),
        }
    }

    /// Grooming product threshold after size correction
    pub fn grooming_threshold(&self, size_correction: f64) -> f64 {
        self.config.grooming.product_threshold * size_correction
    }

    fn tail_rattling(&self, ctx: &ClassificationContext<'_>) -> BehaviourMask {
        let n = ctx.len();
        let cfg = &self.config.tail_rattling;
        let (Some(tip), Some(base)) = (
            ctx.features.part_step_speed(BodyPart::TailEnd),
            ctx.features.part_step_speed(BodyPart::TailBase),
        ) else {
            return BehaviourMask::empty(n);
        };
        BehaviourMask::from_fn(n, |t| {
            match (tip[t], base[t], ctx.features.step_speed[t]) {
                (Some(tip), Some(base), Some(body)) => {
                    tip - base > cfg.tail_speed_difference
                        && body < cfg.body_speed_cap
                        && base < cfg.reference_speed_cap
                }
                _ => false,
            }
        })
    }

    fn grooming(&self, ctx: &ClassificationContext<'_>) -> BehaviourMask {
        let cfg = &self.config.grooming;
        let f = ctx.features;
        let threshold = self.grooming_threshold(ctx.size_correction);
        // sqrt(snout distance) carries half a power of size; normalise it so the
        // comparison stays linear in the size correction
        let normaliser = ctx.size_correction.sqrt();
        BehaviourMask::from_fn(ctx.len(), |t| {
            match (f.grooming_product[t], f.step_speed[t], f.smoothed_motion[t]) {
                (Some(product), Some(speed), Some(motion)) => {
                    product / normaliser < threshold
                        && speed < cfg.step_speed_cap
                        && motion > cfg.motion_floor
                }
                _ => false,
            }
        })
    }

    fn stretch_attend(&self, ctx: &ClassificationContext<'_>) -> BehaviourMask {
        let cfg = &self.config.stretch_attend;
        let low_confidence = self.config.tracking.low_confidence;
        let f = ctx.features;
        let length_threshold = cfg.length_threshold_cm * ctx.size_correction;

        let paw_reliable = |part: BodyPart, t: usize| {
            ctx.tracks
                .get(part)
                .map(|track| track.confidence_at(t) >= low_confidence)
                .unwrap_or(false)
        };

        BehaviourMask::from_fn(ctx.len(), |t| {
            let long = f.total_length[t].map(|v| v > length_threshold).unwrap_or(false);
            let slow = f.smoothed_step_speed[t]
                .map(|v| v < cfg.step_speed_cap)
                .unwrap_or(false);
            if !(long && slow) {
                return false;
            }
            // rotation corrupts the projected length; such frames show a low ratio
            if f.stretch_ratio[t].is_some_and(|r| r < cfg.min_stretch_ratio) {
                return false;
            }

            let left = f.hind_paw_left[t].filter(|_| paw_reliable(BodyPart::HindPawLeft, t));
            let right = f.hind_paw_right[t].filter(|_| paw_reliable(BodyPart::HindPawRight, t));
            let low = |ext: Option<f64>| ext.is_some_and(|e| e < cfg.paw_low_cm);
            let loose = |ext: Option<f64>| ext.map(|e| e < cfg.paw_high_cm).unwrap_or(true);

            (low(left) && low(right)) || (low(left) && loose(right)) || (low(right) && loose(left))
        })
    }
}

fn rearing_in(group: ZoneGroup, ctx: &ClassificationContext<'_>) -> BehaviourMask {
    let zones = ctx.zones;
    if zones.group(group).is_none() {
        return BehaviourMask::empty(ctx.len());
    }
    let inside = |part: BodyPart, ring: Ring, t: usize| {
        ctx.tracks
            .position(part, t)
            .map(|p| zones.contains(group, ring, &p))
            .unwrap_or(false)
    };
    BehaviourMask::from_fn(ctx.len(), |t| {
        inside(BodyPart::Snout, Ring::Second, t)
            || (inside(BodyPart::EarLeft, Ring::First, t) && inside(BodyPart::EarRight, Ring::First, t))
            || inside(BodyPart::ForePawLeft, Ring::First, t)
            || inside(BodyPart::ForePawRight, Ring::First, t)
    })
}

fn head_dips(ctx: &ClassificationContext<'_>) -> BehaviourMask {
    let zones = ctx.zones;
    if zones.group(ZoneGroup::OpenArms).is_none() {
        return BehaviourMask::empty(ctx.len());
    }
    let near_edge = |part: BodyPart, t: usize| {
        ctx.tracks
            .position(part, t)
            .map(|p| {
                zones.contains(ZoneGroup::OpenArms, Ring::Zero, &p)
                    || zones.contains(ZoneGroup::OpenArms, Ring::First, &p)
            })
            .unwrap_or(false)
    };
    BehaviourMask::from_fn(ctx.len(), |t| {
        let snout_over = ctx
            .tracks
            .position(BodyPart::Snout, t)
            .map(|p| zones.contains(ZoneGroup::OpenArms, Ring::First, &p))
            .unwrap_or(false);
        snout_over || (near_edge(BodyPart::EarLeft, t) && near_edge(BodyPart::EarRight, t))
    })
}

fn below(series: &[Option<f64>], threshold: f64, n: usize) -> BehaviourMask {
    BehaviourMask::from_fn(n, |t| {
        series.get(t).copied().flatten().map(|v| v < threshold).unwrap_or(false)
    })
}

/// Check that the masks are pairwise exclusive and together cover every frame
pub fn verify_masks(masks: &BehaviourMap<BehaviourMask>, frames: usize) -> Result<(), ScoringError> {
    let mut claimed = BehaviourMask::empty(frames);
    let mut owner: Vec<Option<Behaviour>> = vec![None; frames];

    for (behaviour, mask) in masks.iter() {
        if mask.len() != frames {
            let msg = format!(
                "{} mask covers {} frames, expected {}",
                behaviour.as_str(),
                mask.len(),
                frames
            );
            error!("{}", msg);
            return Err(ScoringError::InvariantViolation(msg));
        }
        if let Some(t) = mask.first_overlap(&claimed) {
            let other = owner[t].map(|b| b.as_str()).unwrap_or("?");
            let msg = format!(
                "{} overlaps {} at frame {}",
                behaviour.as_str(),
                other,
                t
            );
            error!("{}", msg);
            return Err(ScoringError::InvariantViolation(msg));
        }
        for (t, set) in mask.frames().iter().enumerate() {
            if *set {
                owner[t] = Some(behaviour);
            }
        }
        claimed = claimed.union(mask);
    }

    if claimed.count() != frames {
        let msg = format!("{} of {} frames unclassified", frames - claimed.count(), frames);
        error!("{}", msg);
        return Err(ScoringError::InvariantViolation(msg));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{ArenaShape, CalibrationContext};
    use crate::config::ZoneConfig;
    use crate::episodes::EpisodeResolver;
    use crate::types::{Point, Track};
    use crate::zones::SpatialZoneBuilder;
    use std::collections::BTreeMap;

    struct Fixture {
        time_base: TimeBase,
        tracks: TrackSet,
        features: FeatureSeries,
        zones: SpatialZones,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let cal = CalibrationContext {
                pixels_per_cm: 10.0,
                frame_width: 200,
                frame_height: 200,
                arena: ArenaShape::Rectangle {
                    x: 50.0,
                    y: 50.0,
                    width: 100.0,
                    height: 100.0,
                },
                closed_arms: vec![],
                middle_wall: None,
            };
            let zones =
                SpatialZoneBuilder::build(&cal, Paradigm::OpenField, &ZoneConfig::default(), 1.0);

            let mut parts = BTreeMap::new();
            for part in BodyPart::REQUIRED {
                parts.insert(
                    part,
                    Track {
                        part,
                        positions: vec![Some(Point::new(100.0, 100.0)); n],
                        confidence: vec![Some(0.99); n],
                    },
                );
            }

            let features = FeatureSeries {
                motion: vec![Some(3.0); n],
                smoothed_motion: vec![Some(3.0); n],
                speed: vec![Some(5.0); n],
                step_speed: vec![Some(5.0); n],
                smoothed_step_speed: vec![Some(5.0); n],
                total_length: vec![Some(6.0); n],
                grooming_product: vec![Some(1000.0); n],
                hind_paw_left: vec![Some(1.5); n],
                hind_paw_right: vec![Some(1.5); n],
                stretch_ratio: vec![None; n],
                area_explored: vec![Some(100.0); n],
                ..Default::default()
            };

            Self {
                time_base: TimeBase::uniform(n, 1.0).unwrap(),
                tracks: TrackSet {
                    parts,
                    centroid: vec![Some(Point::new(100.0, 100.0)); n],
                },
                features,
                zones,
            }
        }

        fn ctx(&self) -> ClassificationContext<'_> {
            ClassificationContext {
                paradigm: Paradigm::OpenField,
                time_base: &self.time_base,
                tracks: &self.tracks,
                features: &self.features,
                zones: &self.zones,
                open_rearing: &[],
                size_correction: 1.0,
            }
        }
    }

    fn frames(mask: &BehaviourMask) -> Vec<usize> {
        (0..mask.len()).filter(|t| mask.get(*t)).collect()
    }

    #[test]
    fn test_freezing_scenario() {
        let mut fx = Fixture::new(9);
        let motion = [5.0, 5.0, 0.2, 0.2, 0.2, 0.2, 0.2, 5.0, 5.0];
        fx.features.smoothed_motion = motion.iter().map(|m| Some(*m)).collect();
        let config = ScoringConfig::default();
        let masks = BehaviourClassifier::new(&config).classify(&fx.ctx()).unwrap();
        assert_eq!(frames(&masks[Behaviour::Freezing]), vec![2, 3, 4, 5, 6]);
        assert_eq!(frames(&masks[Behaviour::Remaining]), vec![0, 1, 7, 8]);
    }

    #[test]
    fn test_freezing_scenario_resolves_to_one_episode() {
        let mut fx = Fixture::new(9);
        let motion = [5.0, 5.0, 0.2, 0.2, 0.2, 0.2, 0.2, 5.0, 5.0];
        fx.features.smoothed_motion = motion.iter().map(|m| Some(*m)).collect();
        let config = ScoringConfig::default();
        let masks = BehaviourClassifier::new(&config).classify(&fx.ctx()).unwrap();

        let episodes = EpisodeResolver::new(&config).resolve_all(&masks, &fx.time_base);
        assert_eq!(
            episodes[Behaviour::Freezing],
            vec![Episode::new(2.0, 6.0).unwrap()]
        );
        assert_eq!(
            episodes[Behaviour::Remaining],
            vec![Episode::new(0.0, 1.0).unwrap(), Episode::new(7.0, 8.0).unwrap()]
        );
    }

    #[test]
    fn test_grooming_claims_before_freezing() {
        let mut fx = Fixture::new(6);
        fx.features.grooming_product[2] = Some(2.0);
        fx.features.step_speed[2] = Some(0.5);
        fx.features.smoothed_motion[2] = Some(1.0); // also below the freezing threshold
        let config = ScoringConfig::default();
        let masks = BehaviourClassifier::new(&config).classify(&fx.ctx()).unwrap();
        assert!(masks[Behaviour::Grooming].get(2));
        assert!(!masks[Behaviour::Freezing].get(2));
    }

    #[test]
    fn test_rearing_from_snout_past_wall() {
        let mut fx = Fixture::new(4);
        let snout = fx.tracks.parts.get_mut(&BodyPart::Snout).unwrap();
        snout.positions[1] = Some(Point::new(170.0, 100.0)); // 21 px outside
        snout.positions[2] = Some(Point::new(160.0, 100.0)); // 11 px: first ring only
        let config = ScoringConfig::default();
        let masks = BehaviourClassifier::new(&config).classify(&fx.ctx()).unwrap();
        assert_eq!(frames(&masks[Behaviour::Rearing]), vec![1]);
    }

    #[test]
    fn test_stretch_attend_paw_rules() {
        let mut fx = Fixture::new(5);
        fx.features.total_length = vec![Some(9.0); 5];
        fx.features.smoothed_step_speed = vec![Some(0.5); 5];
        fx.features.hind_paw_left = vec![Some(0.2), Some(0.2), Some(0.2), Some(0.2), Some(0.8)];
        fx.features.hind_paw_right = vec![Some(0.3), Some(0.8), Some(1.2), None, Some(0.8)];
        fx.features.stretch_ratio = vec![None; 5];
        let config = ScoringConfig::default();
        let classifier = BehaviourClassifier::new(&config);
        let raw = classifier.predicate(Behaviour::StretchAttend, &fx.ctx());
        // both low; one low + other under the loose bound; one low + other too far;
        // one low + other untracked; neither low
        assert_eq!(frames(&raw), vec![0, 1, 3]);
    }

    #[test]
    fn test_stretch_attend_rejects_low_stretch_ratio() {
        let mut fx = Fixture::new(2);
        fx.features.total_length = vec![Some(9.0); 2];
        fx.features.smoothed_step_speed = vec![Some(0.5); 2];
        fx.features.hind_paw_left = vec![Some(0.2); 2];
        fx.features.hind_paw_right = vec![Some(0.2); 2];
        fx.features.stretch_ratio = vec![Some(1.5), Some(2.2)];
        let config = ScoringConfig::default();
        let raw = BehaviourClassifier::new(&config).predicate(Behaviour::StretchAttend, &fx.ctx());
        assert_eq!(frames(&raw), vec![1]);
    }

    #[test]
    fn test_paradigm_gates_optional_behaviours() {
        let fx = Fixture::new(3);
        let config = ScoringConfig::default();
        let classifier = BehaviourClassifier::new(&config);
        let ctx = fx.ctx();
        for behaviour in [
            Behaviour::TailRattling,
            Behaviour::WallRearing,
            Behaviour::HeadDips,
            Behaviour::OpenRearing,
        ] {
            assert_eq!(classifier.predicate(behaviour, &ctx).count(), 0);
        }
    }

    #[test]
    fn test_stretch_attend_can_take_precedence_over_rearing() {
        let mut config = ScoringConfig::default();
        config.stretch_attend.rearing_over_stretch_attend = false;
        let order = BehaviourClassifier::new(&config).order();
        let sap = order.iter().position(|b| *b == Behaviour::StretchAttend).unwrap();
        let rearing = order.iter().position(|b| *b == Behaviour::Rearing).unwrap();
        assert!(sap < rearing);
        assert_eq!(order.len(), Behaviour::COUNT);
    }

    #[test]
    fn test_pinned_stages_keep_their_frames() {
        let mut fx = Fixture::new(4);
        fx.features.smoothed_motion = vec![Some(1.0); 4];
        let config = ScoringConfig::default();
        let classifier = BehaviourClassifier::new(&config);

        let mut pinned: BehaviourMap<Option<BehaviourMask>> = BehaviourMap::default();
        pinned[Behaviour::Grooming] = Some(BehaviourMask::from_frames(vec![true, true, false, false]));
        // a pinned Remaining mask is ignored so coverage holds
        pinned[Behaviour::Remaining] = Some(BehaviourMask::empty(4));

        let masks = classifier.classify_with(&fx.ctx(), &pinned).unwrap();
        assert_eq!(frames(&masks[Behaviour::Grooming]), vec![0, 1]);
        assert_eq!(frames(&masks[Behaviour::Freezing]), vec![2, 3]);
    }

    #[test]
    fn test_verify_masks_reports_overlap() {
        let mut masks: BehaviourMap<BehaviourMask> = BehaviourMap::default();
        for (_, mask) in masks.iter_mut() {
            *mask = BehaviourMask::empty(2);
        }
        masks[Behaviour::Grooming] = BehaviourMask::from_frames(vec![true, false]);
        masks[Behaviour::Remaining] = BehaviourMask::from_frames(vec![true, true]);
        assert!(matches!(
            verify_masks(&masks, 2),
            Err(ScoringError::InvariantViolation(_))
        ));
    }
}
