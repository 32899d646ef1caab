//! Scoring pipeline orchestration
//!
//! Wires the stages together: input adaptation → feature extraction → size
//! calibration → zone construction → classification → episode resolution.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::adapter::{parse_session, session_to_data, SessionInput};
use crate::classifier::BehaviourClassifier;
use crate::config::ScoringConfig;
use crate::episodes::{update_logical, verify_episodes, EpisodeResolver};
use crate::error::ScoringError;
use crate::exclusion::ExclusionSet;
use crate::features::FeatureExtractor;
use crate::session::{SavedSession, SessionContext};
use crate::size::{SizeCalibration, SizeCalibrator};
use crate::types::{Behaviour, BehaviourMap, BehaviourMask, ScoringFlag};
use crate::zones::SpatialZoneBuilder;

/// Score a session input JSON with the default configuration.
///
/// Returns the scoring result as JSON.
pub fn score_session(json: &str) -> Result<String, ScoringError> {
    BehaviourProcessor::new().score_json(json)
}

/// Score a session input JSON with a JSON configuration
pub fn score_session_with_config(json: &str, config_json: &str) -> Result<String, ScoringError> {
    let config = ScoringConfig::from_json(config_json)?;
    BehaviourProcessor::with_config(config).score_json(json)
}

/// Session processor holding the scoring configuration and the acting user.
///
/// Sessions share no mutable state, so one processor can score many sessions
/// in parallel.
#[derive(Debug, Clone)]
pub struct BehaviourProcessor {
    config: ScoringConfig,
    user: String,
}

impl Default for BehaviourProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviourProcessor {
    pub fn new() -> Self {
        Self::with_config(ScoringConfig::default())
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        Self {
            config,
            user: "unknown".to_string(),
        }
    }

    /// Name recorded in the processing history
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Parse, score and serialize one session
    pub fn score_json(&self, json: &str) -> Result<String, ScoringError> {
        let input = parse_session(json)?;
        let ctx = self.process(&input, None)?;
        Ok(serde_json::to_string(&ctx.result())?)
    }

    /// Score one session.
    ///
    /// With a `prior` save, its configuration and size correction replace the
    /// processor's, its exclusion ranges and history carry over, and its stored
    /// episode lists are kept; only behaviours missing from it are computed.
    pub fn process(
        &self,
        input: &SessionInput,
        prior: Option<&SavedSession>,
    ) -> Result<SessionContext, ScoringError> {
        let config = match prior {
            Some(saved) => {
                if saved.session_name != input.session_name {
                    warn!(
                        saved = %saved.session_name,
                        input = %input.session_name,
                        "saved session name differs from input"
                    );
                }
                saved.config.clone()
            }
            None => self.config.clone(),
        };
        config.validate()?;

        // Stage 1: validate and invalidate tracks
        let data = session_to_data(input, &config.tracking)?;
        let mut flags = data.flags.clone();

        // Stage 2: features
        let features = FeatureExtractor::extract(&data, &config);
        if features.degenerate_area_frames > 0 {
            warn!(
                session = %data.name,
                frames = features.degenerate_area_frames,
                "AreaExplored undefined on degenerate frames"
            );
            flags.push(ScoringFlag::DegenerateGeometry {
                frames: features.degenerate_area_frames,
            });
        }

        // Stage 3: size calibration, frozen once saved
        let size = match prior {
            Some(saved) => {
                flags.push(ScoringFlag::Reprocessed);
                SizeCalibration::fixed(saved.size_correction)
            }
            None => {
                let size = SizeCalibrator::calibrate(&features, &data.tracks, &config.size, &config.tracking);
                if size.fallback {
                    flags.push(ScoringFlag::SizeCalibrationFallback);
                }
                size
            }
        };

        // Stage 4: zones
        let zones = SpatialZoneBuilder::build(&data.calibration, data.paradigm, &config.zones, size.correction);

        let (stored, exclusions, history) = match prior {
            Some(saved) => (
                saved.episode_lists()?,
                saved.exclusion_set()?,
                saved.history.clone(),
            ),
            None => (BehaviourMap::default(), ExclusionSet::new(), Vec::new()),
        };

        let mut ctx = SessionContext {
            name: data.name,
            paradigm: data.paradigm,
            time_base: data.time_base,
            calibration: data.calibration,
            tracks: data.tracks,
            features,
            size,
            zones,
            open_rearing: data.open_rearing,
            masks: BehaviourMap::default(),
            episodes: BehaviourMap::default(),
            exclusions,
            config,
            flags,
            history,
        };

        // Stage 5: classification, with stored behaviours pinned
        let pinned: BehaviourMap<Option<BehaviourMask>> = stored.map(|_, list| {
            list.as_ref()
                .map(|episodes| update_logical(episodes, &ctx.time_base))
        });
        let masks = BehaviourClassifier::new(&ctx.config)
            .classify_with(&ctx.classification_context(), &pinned)?;

        // Stage 6: episodes
        let resolver = EpisodeResolver::new(&ctx.config);
        let episodes = if prior.is_none() {
            resolver.resolve_all(&masks, &ctx.time_base)
        } else {
            let mut episodes = BehaviourMap::from_fn(|behaviour| match &stored[behaviour] {
                Some(list) => list.clone(),
                None => resolver.resolve(behaviour, &masks[behaviour], &ctx.time_base),
            });
            // stored lists keep their frames over freshly computed ones
            let (kept, fresh): (Vec<Behaviour>, Vec<Behaviour>) = Behaviour::PRIORITY
                .into_iter()
                .partition(|behaviour| stored[*behaviour].is_some());
            let order: Vec<Behaviour> = kept.into_iter().chain(fresh).collect();
            let reallocate =
                stored[Behaviour::AreaBound].is_none() && stored[Behaviour::Remaining].is_none();
            resolver.settle_and_reallocate(&mut episodes, &order, reallocate, &ctx.time_base);
            episodes
        };
        verify_episodes(&episodes, &ctx.time_base)?;

        ctx.masks = masks;
        ctx.episodes = episodes;
        ctx.record_processing(&self.user);

        info!(
            session = %ctx.name,
            paradigm = ctx.paradigm.as_str(),
            frames = ctx.time_base.len(),
            size_correction = ctx.size.correction,
            "session scored"
        );
        Ok(ctx)
    }

    /// Parse and score one session JSON, optionally against a prior save
    pub fn process_json(
        &self,
        json: &str,
        prior: Option<&SavedSession>,
    ) -> Result<SessionContext, ScoringError> {
        let input = parse_session(json)?;
        self.process(&input, prior)
    }

    /// Re-run the threshold-only tail of the cascade (Freezing, AreaBound,
    /// Flight, Remaining) with new thresholds.
    ///
    /// Earlier behaviours keep their current episodes; their masks are
    /// re-derived from those episodes first so manual edits are respected.
    /// The size correction stays frozen.
    pub fn rerun_tail(
        &self,
        ctx: &mut SessionContext,
        config: &ScoringConfig,
    ) -> Result<(), ScoringError> {
        config.validate()?;
        ctx.config = config.clone();

        let projected = ctx.projected_masks();
        let pinned = projected.map(|behaviour, mask| {
            (!Behaviour::CASCADE_TAIL.contains(&behaviour)).then(|| mask.clone())
        });
        let masks = BehaviourClassifier::new(&ctx.config)
            .classify_with(&ctx.classification_context(), &pinned)?;

        let resolver = EpisodeResolver::new(&ctx.config);
        for behaviour in Behaviour::CASCADE_TAIL {
            ctx.episodes[behaviour] = resolver.resolve(behaviour, &masks[behaviour], &ctx.time_base);
        }
        resolver.settle_and_reallocate(&mut ctx.episodes, &Behaviour::PRIORITY, true, &ctx.time_base);
        verify_episodes(&ctx.episodes, &ctx.time_base)?;

        ctx.masks = masks;
        ctx.record_processing(&self.user);
        info!(session = %ctx.name, "cascade tail re-run");
        Ok(())
    }

    /// Score independent sessions in parallel; results keep input order
    pub fn process_batch(&self, inputs: &[SessionInput]) -> Vec<Result<SessionContext, ScoringError>> {
        inputs
            .par_iter()
            .map(|input| self.process(input, None))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{RawCentroid, RawTrack};
    use crate::calibration::ArenaShape;
    use crate::session::ScoringResult;
    use crate::types::BodyPart;
    use std::collections::BTreeMap;

    /// Stationary mouse in the middle of a large open field, 25 fps
    fn still_session(frames: usize, motion: f64) -> SessionInput {
        let offsets = [
            (BodyPart::Snout, (0.0, -40.0)),
            (BodyPart::EarLeft, (-5.0, -25.0)),
            (BodyPart::EarRight, (5.0, -25.0)),
            (BodyPart::TailBase, (0.0, 35.0)),
            (BodyPart::ForePawLeft, (-6.0, -15.0)),
            (BodyPart::ForePawRight, (6.0, -15.0)),
            (BodyPart::HindPawLeft, (-8.0, 40.0)),
            (BodyPart::HindPawRight, (8.0, 40.0)),
        ];
        let mut tracks = BTreeMap::new();
        for (part, (dx, dy)) in offsets {
            tracks.insert(
                part,
                RawTrack {
                    x: vec![Some(300.0 + dx); frames],
                    y: vec![Some(300.0 + dy); frames],
                    likelihood: vec![Some(0.99); frames],
                },
            );
        }
        SessionInput {
            session_name: "m1_OF".to_string(),
            paradigm: None,
            timestamps: (0..frames).map(|i| i as f64 / 25.0).collect(),
            frame_width: 600,
            frame_height: 600,
            pixels_per_cm: 10.0,
            arena: ArenaShape::Rectangle {
                x: 50.0,
                y: 50.0,
                width: 500.0,
                height: 500.0,
            },
            closed_arms: vec![],
            middle_wall: None,
            tracks,
            centroid: RawCentroid {
                x: vec![Some(300.0); frames],
                y: vec![Some(300.0); frames],
            },
            motion: vec![Some(motion); frames],
            contours: None,
            open_rearing: vec![],
        }
    }

    #[test]
    fn test_still_mouse_freezes() {
        let ctx = BehaviourProcessor::new()
            .process(&still_session(100, 0.2), None)
            .unwrap();
        assert_eq!(ctx.episodes[Behaviour::Freezing].len(), 1);
        assert!(ctx.flags.contains(&ScoringFlag::MissingContours));
        assert_eq!(ctx.history.len(), 1);
    }

    #[test]
    fn test_rerun_tail_applies_new_threshold() {
        let processor = BehaviourProcessor::new();
        let mut ctx = processor.process(&still_session(100, 1.0), None).unwrap();
        assert_eq!(ctx.episodes[Behaviour::Freezing].len(), 1);

        let mut strict = ScoringConfig::default();
        strict.freezing.motion_threshold = 0.5;
        processor.rerun_tail(&mut ctx, &strict).unwrap();
        assert!(ctx.episodes[Behaviour::Freezing].is_empty());
        assert_eq!(ctx.config.freezing.motion_threshold, 0.5);
        assert_eq!(ctx.history.len(), 2);
    }

    #[test]
    fn test_prior_save_is_reused() {
        let processor = BehaviourProcessor::new().with_user("alice");
        let input = still_session(100, 0.2);
        let first = processor.process(&input, None).unwrap();

        let mut saved = first.to_saved();
        saved.size_correction = 1.2;
        saved.episodes.insert(Behaviour::Freezing, vec![[0.5, 1.5]]);
        saved.episodes.remove(&Behaviour::Remaining);

        let second = processor.process(&input, Some(&saved)).unwrap();
        assert_eq!(second.size.correction, 1.2);
        assert!(second.flags.contains(&ScoringFlag::Reprocessed));
        assert_eq!(second.episodes[Behaviour::Freezing].len(), 1);
        assert_eq!(second.episodes[Behaviour::Freezing][0].start, 0.5);
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[1].user, "alice");
    }

    #[test]
    fn test_projected_masks_stay_exclusive_at_30_fps() {
        // freezing bouts broken by two-frame bursts of movement
        let mut input = still_session(150, 0.2);
        input.timestamps = (0..150).map(|i| i as f64 / 30.0).collect();
        input.motion = (0..150)
            .map(|t| Some(if t % 30 == 28 || t % 30 == 29 { 5.0 } else { 0.2 }))
            .collect();
        let mut config = ScoringConfig::default();
        config.kinematics.motion_sigma_s = 0.0;

        let ctx = BehaviourProcessor::with_config(config).process(&input, None).unwrap();
        let result = ctx.result();
        for t in 0..result.frames {
            let claimed = result.masks.iter().filter(|(_, mask)| mask.get(t)).count();
            assert!(claimed <= 1, "frame {} claimed {} times", t, claimed);
        }
        assert!(verify_episodes(&ctx.episodes, &ctx.time_base).is_ok());
        assert!(!ctx.episodes[Behaviour::Freezing].is_empty());
    }

    #[test]
    fn test_batch_keeps_order_and_errors() {
        let mut broken = still_session(10, 0.2);
        broken.pixels_per_cm = -1.0;
        let results = BehaviourProcessor::new().process_batch(&[
            still_session(50, 0.2),
            broken,
            still_session(60, 3.0),
        ]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ScoringError::MissingInputData(_))));
        assert_eq!(results[2].as_ref().unwrap().time_base.len(), 60);
    }

    #[test]
    fn test_score_session_json() {
        let json = serde_json::to_string(&still_session(50, 0.2)).unwrap();
        let out = score_session(&json).unwrap();
        let result: ScoringResult = serde_json::from_str(&out).unwrap();
        assert_eq!(result.frames, 50);
        assert_eq!(result.session.session_name, "m1_OF");
    }
}
