//! Session input adapter
//!
//! Parses session input JSON (tracking table, contour-tracker outputs and
//! calibration) and converts it into validated pipeline inputs. This is the
//! only place where low-confidence or out-of-frame positions are invalidated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::calibration::{to_points, ArenaShape, CalibrationContext};
use crate::config::TrackingConfig;
use crate::error::ScoringError;
use crate::paradigm::Paradigm;
use crate::types::{BodyPart, Episode, Point, ScoringFlag, Series, TimeBase, Track, TrackSet};

/// One body part's column group: per-frame x, y and tracker confidence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTrack {
    pub x: Series,
    pub y: Series,
    pub likelihood: Series,
}

/// Per-frame centroid from the upstream contour tracker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCentroid {
    pub x: Series,
    pub y: Series,
}

/// Session input as delivered by the loading front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInput {
    pub session_name: String,
    /// Explicit paradigm label; inferred from the session name when absent
    #[serde(default)]
    pub paradigm: Option<String>,
    pub timestamps: Vec<f64>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub pixels_per_cm: f64,
    pub arena: ArenaShape,
    #[serde(default)]
    pub closed_arms: Vec<Vec<[f64; 2]>>,
    #[serde(default)]
    pub middle_wall: Option<Vec<[f64; 2]>>,
    pub tracks: BTreeMap<BodyPart, RawTrack>,
    pub centroid: RawCentroid,
    /// Contour-tracker motion measure
    pub motion: Series,
    /// Per-frame animal contour points
    #[serde(default)]
    pub contours: Option<Vec<Vec<[f64; 2]>>>,
    /// Externally scored open-arm rearing intervals `[start, end]` (seconds)
    #[serde(default)]
    pub open_rearing: Vec<[f64; 2]>,
}

/// Validated inputs for one session
#[derive(Debug, Clone)]
pub struct SessionData {
    pub name: String,
    pub paradigm: Paradigm,
    pub time_base: TimeBase,
    pub calibration: CalibrationContext,
    pub tracks: TrackSet,
    pub motion: Series,
    pub contours: Option<Vec<Vec<Point>>>,
    pub open_rearing: Vec<Episode>,
    pub flags: Vec<ScoringFlag>,
}

/// Parse a session input JSON string
pub fn parse_session(json: &str) -> Result<SessionInput, ScoringError> {
    serde_json::from_str(json)
        .map_err(|e| ScoringError::ParseError(e.to_string()))
}

/// Validate a session input and convert it into pipeline inputs
pub fn session_to_data(
    input: &SessionInput,
    tracking: &TrackingConfig,
) -> Result<SessionData, ScoringError> {
    let time_base = TimeBase::new(input.timestamps.clone())?;
    let n = time_base.len();

    if !(input.pixels_per_cm.is_finite() && input.pixels_per_cm > 0.0) {
        return Err(ScoringError::MissingInputData(
            "pixel-per-cm calibration must be positive".to_string(),
        ));
    }
    if input.frame_width == 0 || input.frame_height == 0 {
        return Err(ScoringError::MissingInputData(
            "frame dimensions must be non-zero".to_string(),
        ));
    }

    let calibration = CalibrationContext {
        pixels_per_cm: input.pixels_per_cm,
        frame_width: input.frame_width,
        frame_height: input.frame_height,
        arena: input.arena.clone(),
        closed_arms: input.closed_arms.iter().map(|p| to_points(p)).collect(),
        middle_wall: input.middle_wall.as_ref().map(|p| to_points(p)),
    };

    let mut flags = Vec::new();
    let paradigm = resolve_paradigm(input, &mut flags);

    for part in BodyPart::REQUIRED {
        if !input.tracks.contains_key(&part) {
            return Err(ScoringError::MissingInputData(format!(
                "tracking data for {}",
                part.as_str()
            )));
        }
    }

    let mut parts = BTreeMap::new();
    for (part, raw) in &input.tracks {
        check_len(&raw.x, n, part.as_str())?;
        check_len(&raw.y, n, part.as_str())?;
        check_len(&raw.likelihood, n, part.as_str())?;
        parts.insert(*part, invalidate_track(*part, raw, &calibration, tracking));
    }

    check_len(&input.centroid.x, n, "centroid")?;
    check_len(&input.centroid.y, n, "centroid")?;
    let centroid = input
        .centroid
        .x
        .iter()
        .zip(&input.centroid.y)
        .map(|(x, y)| finite_point(*x, *y).filter(|p| calibration.in_frame(p)))
        .collect();

    check_len(&input.motion, n, "motion")?;

    let contours = match &input.contours {
        Some(raw) => {
            if raw.len() != n {
                return Err(ScoringError::InvalidTimeBase(format!(
                    "contours cover {} frames, time base has {}",
                    raw.len(),
                    n
                )));
            }
            Some(raw.iter().map(|c| to_points(c)).collect())
        }
        None => {
            flags.push(ScoringFlag::MissingContours);
            None
        }
    };

    if paradigm.supports_tail_rattling()
        && !(parts.contains_key(&BodyPart::TailEnd) && parts.contains_key(&BodyPart::TailBase))
    {
        warn!(session = %input.session_name, "tail tracks missing, tail rattling will not be scored");
        flags.push(ScoringFlag::MissingTailTracks);
    }

    let open_rearing = input
        .open_rearing
        .iter()
        .map(|[start, end]| {
            Episode::new(*start, *end).map_err(|e| {
                ScoringError::ParseError(format!("open rearing interval rejected: {}", e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SessionData {
        name: input.session_name.clone(),
        paradigm,
        time_base,
        calibration,
        tracks: TrackSet { parts, centroid },
        motion: input.motion.clone(),
        contours,
        open_rearing,
        flags,
    })
}

fn resolve_paradigm(input: &SessionInput, flags: &mut Vec<ScoringFlag>) -> Paradigm {
    let explicit = input.paradigm.as_deref().and_then(Paradigm::from_label);
    match explicit.or_else(|| Paradigm::detect(&input.session_name)) {
        Some(paradigm) => paradigm,
        None => {
            warn!(
                session = %input.session_name,
                "could not infer paradigm from session name, using default thresholds"
            );
            flags.push(ScoringFlag::AmbiguousParadigm);
            Paradigm::Default
        }
    }
}

fn check_len(series: &[Option<f64>], expected: usize, what: &str) -> Result<(), ScoringError> {
    if series.len() != expected {
        return Err(ScoringError::InvalidTimeBase(format!(
            "{} has {} frames, time base has {}",
            what,
            series.len(),
            expected
        )));
    }
    Ok(())
}

fn finite_point(x: Option<f64>, y: Option<f64>) -> Option<Point> {
    let (x, y) = (x?, y?);
    (x.is_finite() && y.is_finite()).then(|| Point::new(x, y))
}

/// Drop positions below the confidence threshold or outside the frame
fn invalidate_track(
    part: BodyPart,
    raw: &RawTrack,
    calibration: &CalibrationContext,
    tracking: &TrackingConfig,
) -> Track {
    let positions = raw
        .x
        .iter()
        .zip(&raw.y)
        .zip(&raw.likelihood)
        .map(|((x, y), conf)| {
            let conf = (*conf)?;
            if conf < tracking.min_confidence {
                return None;
            }
            finite_point(*x, *y).filter(|p| calibration.in_frame(p))
        })
        .collect();

    Track {
        part,
        positions,
        confidence: raw.likelihood.clone(),
    }
}
