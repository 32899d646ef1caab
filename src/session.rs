//! Session context and persisted session format
//!
//! `SessionContext` owns every artefact of one scored session and is passed by
//! reference through the pipeline stages. `SavedSession` is its durable JSON
//! form: episode lists, exclusion ranges, the effective configuration, the
//! frozen size correction and an append-only processing history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::calibration::CalibrationContext;
use crate::classifier::ClassificationContext;
use crate::config::ScoringConfig;
use crate::episodes::{clean_episodes, reconcile_adjacent, update_logical, EditCase, NEIGHBOUR_TOLERANCE_FRAMES};
use crate::error::ScoringError;
use crate::exclusion::ExclusionSet;
use crate::features::FeatureSeries;
use crate::paradigm::Paradigm;
use crate::size::SizeCalibration;
use crate::types::{Behaviour, BehaviourMap, BehaviourMask, Episode, ScoringFlag, TimeBase, TrackSet};
use crate::zones::SpatialZones;
use crate::ETHOFLUX_VERSION;

/// Version of the saved-session layout
pub const SAVE_FORMAT_VERSION: u32 = 1;

/// One processing run recorded in a saved session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    /// Engine version that produced the run
    pub version: String,
}

impl HistoryEntry {
    pub fn now(user: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user: user.to_string(),
            version: ETHOFLUX_VERSION.to_string(),
        }
    }
}

/// Durable form of a scored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub format_version: u32,
    pub session_name: String,
    pub paradigm: Paradigm,
    /// Frozen size correction reused on reprocessing
    pub size_correction: f64,
    /// Effective configuration; takes precedence on reprocessing
    pub config: ScoringConfig,
    #[serde(default)]
    pub exclusions: Vec<[f64; 2]>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Per-behaviour `[start, end]` pairs in seconds, millisecond precision
    #[serde(default)]
    pub episodes: BTreeMap<Behaviour, Vec<[f64; 2]>>,
}

impl SavedSession {
    pub fn from_json(json: &str) -> Result<Self, ScoringError> {
        let saved: SavedSession = serde_json::from_str(json)?;
        if saved.format_version > SAVE_FORMAT_VERSION {
            return Err(ScoringError::ParseError(format!(
                "saved session format {} is newer than supported {}",
                saved.format_version, SAVE_FORMAT_VERSION
            )));
        }
        saved.config.validate()?;
        Ok(saved)
    }

    pub fn to_json(&self) -> Result<String, ScoringError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ScoringError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScoringError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ScoringError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Stored episode lists; behaviours absent from the save are `None`
    pub fn episode_lists(&self) -> Result<BehaviourMap<Option<Vec<Episode>>>, ScoringError> {
        let mut lists: BehaviourMap<Option<Vec<Episode>>> = BehaviourMap::default();
        for (behaviour, pairs) in &self.episodes {
            let episodes = pairs
                .iter()
                .map(|[start, end]| Episode::new(*start, *end))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    ScoringError::ParseError(format!("{} episodes: {}", behaviour.as_str(), e))
                })?;
            lists[*behaviour] = Some(episodes);
        }
        Ok(lists)
    }

    pub fn exclusion_set(&self) -> Result<ExclusionSet, ScoringError> {
        let ranges = self
            .exclusions
            .iter()
            .map(|[start, end]| Episode::new(*start, *end))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExclusionSet::from_ranges(ranges))
    }
}

fn to_pairs(episodes: &[Episode]) -> Vec<[f64; 2]> {
    clean_episodes(episodes)
        .iter()
        .map(|e| [e.start, e.end])
        .collect()
}

/// Everything known about one session during and after scoring
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub name: String,
    pub paradigm: Paradigm,
    pub time_base: TimeBase,
    pub calibration: CalibrationContext,
    pub tracks: TrackSet,
    pub features: FeatureSeries,
    pub size: SizeCalibration,
    pub zones: SpatialZones,
    pub open_rearing: Vec<Episode>,
    /// Classifier output, exclusive per frame
    pub masks: BehaviourMap<BehaviourMask>,
    pub episodes: BehaviourMap<Vec<Episode>>,
    pub exclusions: ExclusionSet,
    pub config: ScoringConfig,
    pub flags: Vec<ScoringFlag>,
    pub history: Vec<HistoryEntry>,
}

impl SessionContext {
    pub fn classification_context(&self) -> ClassificationContext<'_> {
        ClassificationContext {
            paradigm: self.paradigm,
            time_base: &self.time_base,
            tracks: &self.tracks,
            features: &self.features,
            zones: &self.zones,
            open_rearing: &self.open_rearing,
            size_correction: self.size.correction,
        }
    }

    /// Frame masks re-derived from the current episode lists
    pub fn projected_masks(&self) -> BehaviourMap<BehaviourMask> {
        self.episodes
            .map(|_, episodes| update_logical(episodes, &self.time_base))
    }

    /// Largest gap still treated as two episodes touching
    pub fn edit_tolerance(&self) -> f64 {
        NEIGHBOUR_TOLERANCE_FRAMES * self.time_base.frame_period()
    }

    /// Resize one episode and reconcile its neighbours
    pub fn edit_episode(
        &mut self,
        behaviour: Behaviour,
        index: usize,
        new_range: Episode,
    ) -> Result<Vec<EditCase>, ScoringError> {
        let tolerance = self.edit_tolerance();
        reconcile_adjacent(&mut self.episodes, behaviour, index, new_range, tolerance)
    }

    pub fn record_processing(&mut self, user: &str) {
        self.history.push(HistoryEntry::now(user));
    }

    pub fn to_saved(&self) -> SavedSession {
        let episodes = self
            .episodes
            .iter()
            .map(|(behaviour, list)| (behaviour, to_pairs(list)))
            .collect();
        SavedSession {
            format_version: SAVE_FORMAT_VERSION,
            session_name: self.name.clone(),
            paradigm: self.paradigm,
            size_correction: self.size.correction,
            config: self.config.clone(),
            exclusions: self
                .exclusions
                .ranges()
                .iter()
                .map(|r| [r.start, r.end])
                .collect(),
            history: self.history.clone(),
            episodes,
        }
    }

    pub fn summary(&self) -> BehaviourMap<BehaviourSummary> {
        self.episodes.map(|_, list| BehaviourSummary {
            episodes: list.len(),
            total_s: list.iter().map(Episode::duration).sum(),
        })
    }

    /// Output document of a scoring run
    pub fn result(&self) -> ScoringResult {
        ScoringResult {
            session: self.to_saved(),
            frames: self.time_base.len(),
            flags: self.flags.clone(),
            size_calibration: self.size.clone(),
            summary: self.summary(),
            masks: self.projected_masks(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviourSummary {
    pub episodes: usize,
    pub total_s: f64,
}

/// Scored session as returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub session: SavedSession,
    pub frames: usize,
    pub flags: Vec<ScoringFlag>,
    pub size_calibration: SizeCalibration,
    pub summary: BehaviourMap<BehaviourSummary>,
    /// Per-frame masks projected from the episode lists
    pub masks: BehaviourMap<BehaviourMask>,
}
