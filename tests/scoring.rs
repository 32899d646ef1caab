//! End-to-end scoring of synthetic sessions

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use ethoflux::adapter::{RawCentroid, RawTrack, SessionInput};
use ethoflux::calibration::ArenaShape;
use ethoflux::classifier::BehaviourClassifier;
use ethoflux::episodes::{merge_episodes, update_logical, EpisodeResolver};
use ethoflux::types::{BodyPart, TimeBase};
use ethoflux::{
    score_session, Behaviour, BehaviourMap, BehaviourMask, BehaviourProcessor, Episode,
    SavedSession, ScoringConfig, ScoringFlag, ScoringResult, SessionContext,
};

const FPS: f64 = 25.0;

/// Body-part offsets (px) of a mouse facing up the image, centroid at the origin
fn posture(snout_y: f64) -> Vec<(BodyPart, (f64, f64))> {
    vec![
        (BodyPart::Snout, (0.0, snout_y)),
        (BodyPart::EarLeft, (-5.0, -25.0)),
        (BodyPart::EarRight, (5.0, -25.0)),
        (BodyPart::TailBase, (0.0, 35.0)),
        (BodyPart::ForePawLeft, (-6.0, -15.0)),
        (BodyPart::ForePawRight, (6.0, -15.0)),
        (BodyPart::HindPawLeft, (-8.0, 40.0)),
        (BodyPart::HindPawRight, (8.0, 40.0)),
    ]
}

/// Open-field session built frame by frame.
///
/// `frame(t)` returns the centroid, the snout offset and the Motion value;
/// every coordinate is multiplied by `scale`.
fn open_field(
    name: &str,
    frames: usize,
    scale: f64,
    frame: impl Fn(usize) -> ((f64, f64), f64, f64),
) -> SessionInput {
    let mut tracks: BTreeMap<BodyPart, RawTrack> = BTreeMap::new();
    let mut centroid = RawCentroid::default();
    let mut motion = Vec::with_capacity(frames);

    for t in 0..frames {
        let ((cx, cy), snout_y, m) = frame(t);
        for (part, (dx, dy)) in posture(snout_y) {
            let track = tracks.entry(part).or_default();
            track.x.push(Some((cx + dx) * scale));
            track.y.push(Some((cy + dy) * scale));
            track.likelihood.push(Some(0.99));
        }
        centroid.x.push(Some(cx * scale));
        centroid.y.push(Some(cy * scale));
        motion.push(Some(m));
    }

    SessionInput {
        session_name: name.to_string(),
        paradigm: None,
        timestamps: (0..frames).map(|t| t as f64 / FPS).collect(),
        frame_width: 800,
        frame_height: 800,
        pixels_per_cm: 10.0,
        arena: ArenaShape::Rectangle {
            x: 50.0,
            y: 50.0,
            width: 700.0,
            height: 700.0,
        },
        closed_arms: vec![],
        middle_wall: None,
        tracks,
        centroid,
        motion,
        contours: None,
        open_rearing: vec![],
    }
}

/// Mostly upright mouse that tucks its head during two stretches
fn grooming_session(scale: f64) -> SessionInput {
    open_field("m2_OF_day1", 250, scale, |t| {
        let tucked = (50..100).contains(&t) || (150..175).contains(&t);
        ((300.0, 300.0), if tucked { -27.0 } else { -40.0 }, 1.0)
    })
}

fn claimed_by(masks: &BehaviourMap<BehaviourMask>, t: usize) -> Vec<Behaviour> {
    masks
        .iter()
        .filter(|(_, mask)| mask.get(t))
        .map(|(behaviour, _)| behaviour)
        .collect()
}

fn assert_exclusive_and_covering(masks: &BehaviourMap<BehaviourMask>, frames: usize) {
    for t in 0..frames {
        let claimed = claimed_by(masks, t);
        assert_eq!(claimed.len(), 1, "frame {} claimed by {:?}", t, claimed);
    }
}

#[test]
fn full_pipeline_from_json() {
    let input = grooming_session(1.0);
    let json = serde_json::to_string(&input).unwrap();

    let out = score_session(&json).unwrap();
    let result: ScoringResult = serde_json::from_str(&out).unwrap();

    assert_eq!(result.frames, 250);
    assert_eq!(result.session.paradigm, ethoflux::Paradigm::OpenField);
    assert!(result.flags.contains(&ScoringFlag::MissingContours));
    assert!(!result.size_calibration.fallback);
    // episode projections never double-claim a frame
    for t in 0..result.frames {
        assert!(claimed_by(&result.masks, t).len() <= 1);
    }

    let grooming = &result.session.episodes[&Behaviour::Grooming];
    assert_eq!(grooming.len(), 2);
    assert!(grooming[0][0] > 1.8 && grooming[0][1] < 4.2);
    assert_eq!(result.summary[Behaviour::Grooming].episodes, 2);

    // saved form is stable under reload and re-save
    let saved_json = result.session.to_json().unwrap();
    let reloaded = SavedSession::from_json(&saved_json).unwrap();
    assert_eq!(reloaded.to_json().unwrap(), saved_json);
}

#[test]
fn size_correction_scales_grooming_threshold() {
    let processor = BehaviourProcessor::new();
    let base = processor.process(&grooming_session(1.0), None).unwrap();
    let scaled = processor.process(&grooming_session(1.1), None).unwrap();

    assert_relative_eq!(
        scaled.size.correction / base.size.correction,
        1.1,
        epsilon = 1e-9
    );

    let classifier = BehaviourClassifier::new(processor.config());
    assert_relative_eq!(
        classifier.grooming_threshold(scaled.size.correction)
            / classifier.grooming_threshold(base.size.correction),
        1.1,
        epsilon = 1e-9
    );

    let base_grooming = &base.masks[Behaviour::Grooming];
    assert!(base_grooming.count() > 0);
    assert!(base_grooming.count() < base.time_base.len());
    assert_eq!(&scaled.masks[Behaviour::Grooming], base_grooming);
}

#[test]
fn edited_episodes_survive_reprocessing() {
    let processor = BehaviourProcessor::new().with_user("reviewer");
    let input = grooming_session(1.0);
    let mut ctx: SessionContext = processor.process(&input, None).unwrap();

    let first = ctx.episodes[Behaviour::Grooming][0];
    let grown = Episode::new(first.start - 0.4, first.end).unwrap();
    ctx.edit_episode(Behaviour::Grooming, 0, grown).unwrap();
    ctx.exclusions.insert(Episode::new(8.0, 9.0).unwrap());

    let saved = SavedSession::from_json(&ctx.to_saved().to_json().unwrap()).unwrap();
    let again = processor.process(&input, Some(&saved)).unwrap();

    assert_eq!(
        again.to_saved().episodes[&Behaviour::Grooming],
        saved.episodes[&Behaviour::Grooming]
    );
    assert_eq!(again.exclusions.len(), 1);
    assert_eq!(again.size.correction, ctx.size.correction);
    assert_eq!(again.history.len(), 2);
}

#[test]
fn head_dips_over_open_arm_edge() {
    let frames = 50;
    let offsets = [
        (BodyPart::Snout, (240.0, 130.0)),
        (BodyPart::EarLeft, (238.0, 140.0)),
        (BodyPart::EarRight, (242.0, 140.0)),
        (BodyPart::TailBase, (240.0, 165.0)),
        (BodyPart::ForePawLeft, (236.0, 145.0)),
        (BodyPart::ForePawRight, (244.0, 145.0)),
        (BodyPart::HindPawLeft, (236.0, 165.0)),
        (BodyPart::HindPawRight, (244.0, 165.0)),
    ];
    let tracks = offsets
        .iter()
        .map(|(part, (x, y))| {
            (
                *part,
                RawTrack {
                    x: vec![Some(*x); frames],
                    y: vec![Some(*y); frames],
                    likelihood: vec![Some(0.99); frames],
                },
            )
        })
        .collect();
    let arm = |x0: f64, y0: f64, x1: f64, y1: f64| vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]];
    let input = SessionInput {
        session_name: "m4_EPM".to_string(),
        paradigm: None,
        timestamps: (0..frames).map(|t| t as f64 / FPS).collect(),
        frame_width: 300,
        frame_height: 300,
        pixels_per_cm: 4.0,
        arena: ArenaShape::Polygon {
            vertices: vec![
                [140.0, 20.0],
                [160.0, 20.0],
                [160.0, 140.0],
                [280.0, 140.0],
                [280.0, 160.0],
                [160.0, 160.0],
                [160.0, 280.0],
                [140.0, 280.0],
                [140.0, 160.0],
                [20.0, 160.0],
                [20.0, 140.0],
                [140.0, 140.0],
            ],
        },
        closed_arms: vec![
            arm(140.0, 20.0, 160.0, 140.0),
            arm(140.0, 160.0, 160.0, 280.0),
        ],
        middle_wall: None,
        tracks,
        centroid: RawCentroid {
            x: vec![Some(240.0); frames],
            y: vec![Some(150.0); frames],
        },
        motion: vec![Some(3.0); frames],
        contours: None,
        open_rearing: vec![],
    };

    let ctx = BehaviourProcessor::new().process(&input, None).unwrap();
    assert_eq!(ctx.paradigm, ethoflux::Paradigm::ElevatedPlusMaze);
    assert_eq!(ctx.masks[Behaviour::HeadDips].count(), frames);
    assert_eq!(ctx.episodes[Behaviour::HeadDips].len(), 1);
    assert!(ctx.episodes[Behaviour::Rearing].is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn masks_are_exclusive_and_cover_every_frame(
        motion in prop::collection::vec(0.0f64..5.0, 30..80),
        jitter in prop::collection::vec((-15.0f64..15.0, -15.0f64..15.0, -42.0f64..-26.0), 80),
    ) {
        let frames = motion.len();
        let input = open_field("m9_OF", frames, 1.0, |t| {
            let (dx, dy, snout_y) = jitter[t];
            ((400.0 + dx, 400.0 + dy), snout_y, motion[t])
        });
        let ctx = BehaviourProcessor::new().process(&input, None).unwrap();
        assert_exclusive_and_covering(&ctx.masks, frames);
    }

    #[test]
    fn merging_is_idempotent(
        raw in prop::collection::vec((0.0f64..100.0, 0.01f64..5.0), 0..30),
        gap in 0.0f64..1.0,
    ) {
        let episodes: Vec<Episode> = raw
            .iter()
            .map(|(start, len)| Episode::new(*start, start + len).unwrap())
            .collect();
        let once = merge_episodes(&episodes, gap);
        prop_assert_eq!(merge_episodes(&once, gap), once.clone());
        for pair in once.windows(2) {
            prop_assert!(pair[1].start - pair[0].end > gap);
        }
    }

    #[test]
    fn resolving_a_resolved_set_is_stable(
        frames in prop::collection::vec(any::<bool>(), 10..200),
    ) {
        let config = ScoringConfig::default();
        let resolver = EpisodeResolver::new(&config);
        let tb = TimeBase::uniform(frames.len(), FPS).unwrap();
        let mask = BehaviourMask::from_frames(frames);

        for behaviour in [Behaviour::Grooming, Behaviour::Freezing, Behaviour::Flight] {
            let resolved = resolver.resolve(behaviour, &mask, &tb);
            let projected = update_logical(&resolved, &tb);
            prop_assert_eq!(resolver.resolve(behaviour, &projected, &tb), resolved);
        }
    }
}
