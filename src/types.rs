//! Core types for the ethoflux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: tracks and the time base, behaviour masks, and episodes.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use crate::error::ScoringError;

/// A per-frame scalar time series. `None` marks a gap (missing data), never zero.
pub type Series = Vec<Option<f64>>;

/// Tracked body parts, in the fixed naming vocabulary of the pose-estimation output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Snout,
    EarLeft,
    EarRight,
    TailBase,
    TailQuarterAnt,
    TailMiddle,
    TailQuarterPost,
    TailEnd,
    ForePawLeft,
    ForePawRight,
    HindPawLeft,
    HindPawRight,
}

impl BodyPart {
    pub const ALL: [BodyPart; 12] = [
        BodyPart::Snout,
        BodyPart::EarLeft,
        BodyPart::EarRight,
        BodyPart::TailBase,
        BodyPart::TailQuarterAnt,
        BodyPart::TailMiddle,
        BodyPart::TailQuarterPost,
        BodyPart::TailEnd,
        BodyPart::ForePawLeft,
        BodyPart::ForePawRight,
        BodyPart::HindPawLeft,
        BodyPart::HindPawRight,
    ];

    /// Parts every session must provide
    pub const REQUIRED: [BodyPart; 8] = [
        BodyPart::Snout,
        BodyPart::EarLeft,
        BodyPart::EarRight,
        BodyPart::TailBase,
        BodyPart::ForePawLeft,
        BodyPart::ForePawRight,
        BodyPart::HindPawLeft,
        BodyPart::HindPawRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPart::Snout => "Snout",
            BodyPart::EarLeft => "EarLeft",
            BodyPart::EarRight => "EarRight",
            BodyPart::TailBase => "TailBase",
            BodyPart::TailQuarterAnt => "TailQuarterAnt",
            BodyPart::TailMiddle => "TailMiddle",
            BodyPart::TailQuarterPost => "TailQuarterPost",
            BodyPart::TailEnd => "TailEnd",
            BodyPart::ForePawLeft => "ForePawLeft",
            BodyPart::ForePawRight => "ForePawRight",
            BodyPart::HindPawLeft => "HindPawLeft",
            BodyPart::HindPawRight => "HindPawRight",
        }
    }
}

/// A 2D image-space point in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Angle of `self` seen from `origin`, in radians (-π, π]
    pub fn angle_from(&self, origin: &Point) -> f64 {
        (self.y - origin.y).atan2(self.x - origin.x)
    }
}

/// Per-frame position and confidence of one body part.
///
/// `positions[t]` is `None` whenever the tracker confidence fell below the
/// session threshold or the point left the frame. `confidence` keeps the raw
/// score so that "tracker unreliable" can be told apart from "point absent".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub part: BodyPart,
    pub positions: Vec<Option<Point>>,
    pub confidence: Vec<Option<f64>>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Raw confidence at frame `t`, treating a missing score as zero confidence
    pub fn confidence_at(&self, t: usize) -> f64 {
        self.confidence.get(t).copied().flatten().unwrap_or(0.0)
    }
}

/// All body-part tracks of a session plus the contour-tracker centroid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackSet {
    pub parts: BTreeMap<BodyPart, Track>,
    pub centroid: Vec<Option<Point>>,
}

impl TrackSet {
    pub fn get(&self, part: BodyPart) -> Option<&Track> {
        self.parts.get(&part)
    }

    /// Position of `part` at frame `t`, `None` if the part is untracked or missing
    pub fn position(&self, part: BodyPart, t: usize) -> Option<Point> {
        self.parts
            .get(&part)
            .and_then(|track| track.positions.get(t).copied().flatten())
    }
}

/// Per-frame timestamps in seconds; the authoritative clock for episode boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBase {
    timestamps: Vec<f64>,
}

impl TimeBase {
    /// Build a time base, rejecting empty or non-increasing timestamps
    pub fn new(timestamps: Vec<f64>) -> Result<Self, ScoringError> {
        if timestamps.is_empty() {
            return Err(ScoringError::MissingInputData(
                "timestamps are empty".to_string(),
            ));
        }
        if let Some(i) = timestamps.iter().position(|t| !t.is_finite()) {
            return Err(ScoringError::InvalidTimeBase(format!(
                "timestamp at frame {} is not finite",
                i
            )));
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ScoringError::InvalidTimeBase(format!(
                "timestamps must increase strictly (frame {} -> {})",
                i,
                i + 1
            )));
        }
        Ok(Self { timestamps })
    }

    /// Uniformly sampled time base starting at zero
    pub fn uniform(frames: usize, fps: f64) -> Result<Self, ScoringError> {
        Self::new((0..frames).map(|i| i as f64 / fps).collect())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn time(&self, frame: usize) -> f64 {
        self.timestamps[frame]
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn duration(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Median inter-frame interval in seconds
    pub fn frame_period(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 1.0;
        }
        let mut deltas: Vec<f64> = self.timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        deltas.sort_by(f64::total_cmp);
        deltas[deltas.len() / 2]
    }

    /// Convert a duration in seconds into a whole number of frames (at least 1)
    pub fn frames_for(&self, seconds: f64) -> usize {
        ((seconds / self.frame_period()).round() as usize).max(1)
    }
}

/// Behaviour categories, declared in strict priority order (highest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Behaviour {
    TailRattling,
    Grooming,
    OpenRearing,
    Rearing,
    WallRearing,
    HeadDips,
    StretchAttend,
    Freezing,
    AreaBound,
    Flight,
    Remaining,
}

impl Behaviour {
    pub const COUNT: usize = 11;

    /// Classification order; every behaviour excludes the frames of all earlier ones
    pub const PRIORITY: [Behaviour; Behaviour::COUNT] = [
        Behaviour::TailRattling,
        Behaviour::Grooming,
        Behaviour::OpenRearing,
        Behaviour::Rearing,
        Behaviour::WallRearing,
        Behaviour::HeadDips,
        Behaviour::StretchAttend,
        Behaviour::Freezing,
        Behaviour::AreaBound,
        Behaviour::Flight,
        Behaviour::Remaining,
    ];

    /// Stages recomputed by a threshold re-run
    pub const CASCADE_TAIL: [Behaviour; 4] = [
        Behaviour::Freezing,
        Behaviour::AreaBound,
        Behaviour::Flight,
        Behaviour::Remaining,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Behaviour::TailRattling => "TailRattling",
            Behaviour::Grooming => "Grooming",
            Behaviour::OpenRearing => "OpenRearing",
            Behaviour::Rearing => "Rearing",
            Behaviour::WallRearing => "WallRearing",
            Behaviour::HeadDips => "HeadDips",
            Behaviour::StretchAttend => "StretchAttend",
            Behaviour::Freezing => "Freezing",
            Behaviour::AreaBound => "AreaBound",
            Behaviour::Flight => "Flight",
            Behaviour::Remaining => "Remaining",
        }
    }

    pub fn is_rearing(&self) -> bool {
        matches!(
            self,
            Behaviour::Rearing | Behaviour::WallRearing | Behaviour::OpenRearing
        )
    }
}

/// Fixed-size map with one slot per behaviour, indexed by the enum
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviourMap<T> {
    values: [T; Behaviour::COUNT],
}

impl<T> BehaviourMap<T> {
    pub fn from_fn(mut f: impl FnMut(Behaviour) -> T) -> Self {
        Self {
            values: std::array::from_fn(|i| f(Behaviour::PRIORITY[i])),
        }
    }

    /// Iterate in priority order
    pub fn iter(&self) -> impl Iterator<Item = (Behaviour, &T)> {
        Behaviour::PRIORITY.iter().copied().zip(self.values.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Behaviour, &mut T)> {
        Behaviour::PRIORITY.iter().copied().zip(self.values.iter_mut())
    }

    pub fn map<U>(&self, mut f: impl FnMut(Behaviour, &T) -> U) -> BehaviourMap<U> {
        BehaviourMap::from_fn(|b| f(b, &self.values[b.index()]))
    }
}

impl<T: Default> Default for BehaviourMap<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<Behaviour> for BehaviourMap<T> {
    type Output = T;

    fn index(&self, behaviour: Behaviour) -> &T {
        &self.values[behaviour.index()]
    }
}

impl<T> IndexMut<Behaviour> for BehaviourMap<T> {
    fn index_mut(&mut self, behaviour: Behaviour) -> &mut T {
        &mut self.values[behaviour.index()]
    }
}

impl<T: Serialize> Serialize for BehaviourMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Behaviour::COUNT))?;
        for (behaviour, value) in self.iter() {
            map.serialize_entry(behaviour.as_str(), value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de> + Default> Deserialize<'de> for BehaviourMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut entries: BTreeMap<Behaviour, T> = BTreeMap::deserialize(deserializer)?;
        Ok(Self::from_fn(|b| entries.remove(&b).unwrap_or_default()))
    }
}

/// Per-frame boolean membership of one behaviour, aligned with the time base
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviourMask(Vec<bool>);

impl BehaviourMask {
    pub fn empty(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn from_frames(frames: Vec<bool>) -> Self {
        Self(frames)
    }

    pub fn from_fn(len: usize, f: impl FnMut(usize) -> bool) -> Self {
        Self((0..len).map(f).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn frames(&self) -> &[bool] {
        &self.0
    }

    pub fn get(&self, frame: usize) -> bool {
        self.0.get(frame).copied().unwrap_or(false)
    }

    pub fn set(&mut self, frame: usize, value: bool) {
        if let Some(slot) = self.0.get_mut(frame) {
            *slot = value;
        }
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|v| **v).count()
    }

    /// Copy of `self` with every frame claimed in `claimed` cleared
    pub fn excluding(&self, claimed: &BehaviourMask) -> BehaviourMask {
        BehaviourMask(
            self.0
                .iter()
                .enumerate()
                .map(|(i, v)| *v && !claimed.get(i))
                .collect(),
        )
    }

    /// Frame-wise union with `other`
    pub fn union(&self, other: &BehaviourMask) -> BehaviourMask {
        BehaviourMask(
            self.0
                .iter()
                .enumerate()
                .map(|(i, v)| *v || other.get(i))
                .collect(),
        )
    }

    /// First frame set in both masks, if any
    pub fn first_overlap(&self, other: &BehaviourMask) -> Option<usize> {
        self.0.iter().enumerate().position(|(i, v)| *v && other.get(i))
    }
}

/// A scored time interval; `start < end` always holds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub start: f64,
    pub end: f64,
}

impl Episode {
    /// Build an episode, rejecting empty or inverted intervals
    pub fn new(start: f64, end: f64) -> Result<Self, ScoringError> {
        if !(start.is_finite() && end.is_finite()) || start >= end {
            return Err(ScoringError::InvalidEdit(format!(
                "episode start {} must precede end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Episode) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_time(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Recoverable conditions recorded while scoring a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFlag {
    /// Paradigm could not be inferred; default thresholds were used
    AmbiguousParadigm,
    /// AreaExplored undefined on some frames (degenerate point sets)
    DegenerateGeometry { frames: usize },
    /// No frame passed the size-calibration selection; correction fell back to 1.0
    SizeCalibrationFallback,
    /// No contours supplied; mid-body width and stretch ratio are undefined
    MissingContours,
    /// Tail tracks absent; tail rattling skipped
    MissingTailTracks,
    /// Size correction and thresholds taken from a previous save
    Reprocessed,
}
