//! Episode resolution and editing
//!
//! Turns per-frame behaviour masks into interval lists: contiguous runs,
//! left-to-right merging under a gap threshold, minimum-duration filtering,
//! and the small-episode reallocation between AreaBound and Remaining. Also
//! provides the helpers an editor needs to keep episode lists consistent
//! after a manual change.

use std::ops::Range;

use tracing::{debug, error};

use crate::config::{EpisodeConfig, NeighbourSides, ReallocationConfig, ReallocationPass, ScoringConfig};
use crate::error::ScoringError;
use crate::types::{Behaviour, BehaviourMap, BehaviourMask, Episode, TimeBase};

/// Neighbour search tolerance, in frame periods
pub const NEIGHBOUR_TOLERANCE_FRAMES: f64 = 1.5;

/// Interval covering frames `first..=last`.
///
/// A multi-frame run spans `time[first]..time[last]`. A lone frame spans the
/// midpoints to its neighbouring timestamps (clamped at the recording edges)
/// so it keeps a non-zero length and still projects onto exactly that frame.
pub fn frame_span(time_base: &TimeBase, first: usize, last: usize) -> Option<Episode> {
    if first < last {
        return Episode::new(time_base.time(first), time_base.time(last)).ok();
    }
    let t = time_base.time(first);
    let start = match first.checked_sub(1) {
        Some(prev) => (time_base.time(prev) + t) / 2.0,
        None => t,
    };
    let end = if first + 1 < time_base.len() {
        (t + time_base.time(first + 1)) / 2.0
    } else {
        t
    };
    Episode::new(start, end).ok()
}

/// Frames whose timestamp lies inside `episode` (bounds included)
pub fn frame_range(episode: &Episode, time_base: &TimeBase) -> Range<usize> {
    let times = time_base.timestamps();
    let first = times.partition_point(|t| *t < episode.start);
    let end = times.partition_point(|t| *t <= episode.end);
    first..end.max(first)
}

/// Contiguous runs of set frames, one interval per run (see [`frame_span`])
pub fn mask_to_runs(mask: &BehaviourMask, time_base: &TimeBase) -> Vec<Episode> {
    let frames = mask.frames();
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for t in 0..=frames.len() {
        let set = frames.get(t).copied().unwrap_or(false);
        match (set, start) {
            (true, None) => start = Some(t),
            (false, Some(first)) => {
                runs.extend(frame_span(time_base, first, t - 1));
                start = None;
            }
            _ => {}
        }
    }
    runs
}

/// Single left-to-right pass joining episodes whose gap is at most `merge_gap`
pub fn merge_episodes(episodes: &[Episode], merge_gap: f64) -> Vec<Episode> {
    let mut sorted = episodes.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Episode> = Vec::with_capacity(sorted.len());
    for episode in sorted {
        match merged.last_mut() {
            Some(last) if episode.start - last.end <= merge_gap => {
                last.end = last.end.max(episode.end);
            }
            _ => merged.push(episode),
        }
    }
    merged
}

/// Keep episodes lasting at least `min_duration` seconds
pub fn filter_min_duration(episodes: Vec<Episode>, min_duration: f64) -> Vec<Episode> {
    episodes
        .into_iter()
        .filter(|e| e.duration() >= min_duration)
        .collect()
}

/// Project episodes back onto frames: a frame is set when its timestamp lies in any episode
pub fn update_logical(episodes: &[Episode], time_base: &TimeBase) -> BehaviourMask {
    let mut mask = BehaviourMask::empty(time_base.len());
    for episode in episodes {
        for t in frame_range(episode, time_base) {
            mask.set(t, true);
        }
    }
    mask
}

/// Round to millisecond precision, sort and merge overlapping or touching episodes
pub fn clean_episodes(episodes: &[Episode]) -> Vec<Episode> {
    let rounded: Vec<Episode> = episodes
        .iter()
        .filter_map(|e| Episode::new(round_ms(e.start), round_ms(e.end)).ok())
        .collect();
    merge_episodes(&rounded, 0.0)
}

pub fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Give every frame to the first behaviour in `order` whose episodes cover it.
///
/// Episodes that share no frame with an earlier behaviour are kept as they
/// are. The others are cut down to their unclaimed frames, which may split
/// them or remove them entirely.
pub fn settle_overlaps(
    episodes: &mut BehaviourMap<Vec<Episode>>,
    order: &[Behaviour],
    time_base: &TimeBase,
) {
    let mut claimed = BehaviourMask::empty(time_base.len());
    for &behaviour in order {
        let mut kept = Vec::with_capacity(episodes[behaviour].len());
        for episode in &episodes[behaviour] {
            let range = frame_range(episode, time_base);
            if !range.clone().any(|t| claimed.get(t)) {
                kept.push(*episode);
                continue;
            }
            let before = kept.len();
            let mut run: Option<usize> = None;
            for t in range.start..=range.end {
                let free = t < range.end && !claimed.get(t);
                match (free, run) {
                    (true, None) => run = Some(t),
                    (false, Some(first)) => {
                        kept.extend(frame_span(time_base, first, t - 1));
                        run = None;
                    }
                    _ => {}
                }
            }
            debug!(
                behaviour = behaviour.as_str(),
                start = episode.start,
                end = episode.end,
                pieces = kept.len() - before,
                "episode trimmed by higher-priority episodes"
            );
        }
        for episode in &kept {
            for t in frame_range(episode, time_base) {
                claimed.set(t, true);
            }
        }
        episodes[behaviour] = kept;
    }
}

/// Check that no frame is covered by episodes of two different behaviours
pub fn verify_episodes(
    episodes: &BehaviourMap<Vec<Episode>>,
    time_base: &TimeBase,
) -> Result<(), ScoringError> {
    let mut owner: Vec<Option<Behaviour>> = vec![None; time_base.len()];
    for (behaviour, list) in episodes.iter() {
        for episode in list {
            for t in frame_range(episode, time_base) {
                match owner[t] {
                    Some(other) if other != behaviour => {
                        let msg = format!(
                            "{} episode {:.3}-{:.3} s overlaps {} at frame {}",
                            behaviour.as_str(),
                            episode.start,
                            episode.end,
                            other.as_str(),
                            t
                        );
                        error!("{}", msg);
                        return Err(ScoringError::InvariantViolation(msg));
                    }
                    _ => owner[t] = Some(behaviour),
                }
            }
        }
    }
    Ok(())
}

/// Mask-to-episode resolver for one session
pub struct EpisodeResolver<'a> {
    episodes: &'a EpisodeConfig,
    reallocation: &'a ReallocationConfig,
}

impl<'a> EpisodeResolver<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self {
            episodes: &config.episodes,
            reallocation: &config.reallocation,
        }
    }

    /// Runs, then merge, then minimum-duration filter.
    ///
    /// Merging first lets two short fragments separated by a small gap survive
    /// as one episode. Merged episodes are snapped back onto the frames they
    /// cover, so resolving the projection of a resolved list gives it back.
    pub fn resolve(
        &self,
        behaviour: Behaviour,
        mask: &BehaviourMask,
        time_base: &TimeBase,
    ) -> Vec<Episode> {
        let rule = self.episodes.rule(behaviour);
        let runs = mask_to_runs(mask, time_base);
        let merged: Vec<Episode> = merge_episodes(&runs, rule.merge_gap_s)
            .iter()
            .filter_map(|e| {
                let frames = frame_range(e, time_base);
                if frames.is_empty() {
                    return None;
                }
                frame_span(time_base, frames.start, frames.end - 1)
            })
            .collect();
        filter_min_duration(merged, rule.min_duration_s)
    }

    /// Resolve every behaviour, settle cross-behaviour overlaps in priority
    /// order, then reallocate small AreaBound / Remaining episodes
    pub fn resolve_all(
        &self,
        masks: &BehaviourMap<BehaviourMask>,
        time_base: &TimeBase,
    ) -> BehaviourMap<Vec<Episode>> {
        let mut episodes = masks.map(|behaviour, mask| self.resolve(behaviour, mask, time_base));
        self.settle_and_reallocate(&mut episodes, &Behaviour::PRIORITY, true, time_base);

        for (behaviour, list) in episodes.iter() {
            debug!(behaviour = behaviour.as_str(), episodes = list.len(), "episodes resolved");
        }
        episodes
    }

    /// Settle overlaps in `order`, optionally reallocate the AreaBound /
    /// Remaining pair, and settle again so absorbed gaps never reach into
    /// another behaviour's frames
    pub fn settle_and_reallocate(
        &self,
        episodes: &mut BehaviourMap<Vec<Episode>>,
        order: &[Behaviour],
        reallocate: bool,
        time_base: &TimeBase,
    ) {
        settle_overlaps(episodes, order, time_base);
        if reallocate {
            self.reallocate_pair(episodes, time_base);
            settle_overlaps(episodes, order, time_base);
        }
    }

    /// Apply the reallocation passes to the AreaBound / Remaining pair of an episode set
    pub fn reallocate_pair(&self, episodes: &mut BehaviourMap<Vec<Episode>>, time_base: &TimeBase) {
        let tolerance = NEIGHBOUR_TOLERANCE_FRAMES * time_base.frame_period();
        let mut area_bound = std::mem::take(&mut episodes[Behaviour::AreaBound]);
        let mut remaining = std::mem::take(&mut episodes[Behaviour::Remaining]);
        self.reallocate(&mut area_bound, &mut remaining, tolerance);
        episodes[Behaviour::AreaBound] = area_bound;
        episodes[Behaviour::Remaining] = remaining;
    }

    /// Absorb small episodes of either category into qualifying neighbours of the other.
    ///
    /// Neighbours are episodes of the other category starting or ending within
    /// `tolerance` seconds of the small episode.
    pub fn reallocate(&self, a: &mut Vec<Episode>, b: &mut Vec<Episode>, tolerance: f64) {
        for pass in &self.reallocation.passes {
            while let Some((from_a, index)) = next_candidate(a, b, pass, tolerance) {
                if from_a {
                    absorb(a, b, index, pass, tolerance);
                } else {
                    absorb(b, a, index, pass, tolerance);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Neighbours {
    before: Option<usize>,
    after: Option<usize>,
}

fn neighbours(small: &Episode, other: &[Episode], tolerance: f64) -> Neighbours {
    let before = other
        .iter()
        .position(|e| e.end <= small.start && small.start - e.end <= tolerance);
    let after = other
        .iter()
        .position(|e| e.start >= small.end && e.start - small.end <= tolerance);
    Neighbours { before, after }
}

fn qualifying(
    small: &Episode,
    other: &[Episode],
    pass: &ReallocationPass,
    tolerance: f64,
) -> Option<Neighbours> {
    if small.duration() >= pass.small_s {
        return None;
    }
    let qualifies = |i: Option<usize>| {
        i.filter(|i| {
            pass.neighbour_min_s
                .map(|min| other[*i].duration() >= min)
                .unwrap_or(true)
        })
    };
    let found = neighbours(small, other, tolerance);
    let found = Neighbours {
        before: qualifies(found.before),
        after: qualifies(found.after),
    };
    let ok = match pass.sides {
        NeighbourSides::Both => found.before.is_some() && found.after.is_some(),
        NeighbourSides::Either => found.before.is_some() || found.after.is_some(),
    };
    ok.then_some(found)
}

/// Earliest small episode in either list that can be absorbed in this pass
fn next_candidate(
    a: &[Episode],
    b: &[Episode],
    pass: &ReallocationPass,
    tolerance: f64,
) -> Option<(bool, usize)> {
    let first = |own: &[Episode], other: &[Episode]| {
        own.iter()
            .enumerate()
            .filter(|(_, e)| qualifying(e, other, pass, tolerance).is_some())
            .map(|(i, e)| (i, e.start))
            .next()
    };
    match (first(a, b), first(b, a)) {
        (Some((i, sa)), Some((j, sb))) => Some(if sa <= sb { (true, i) } else { (false, j) }),
        (Some((i, _)), None) => Some((true, i)),
        (None, Some((j, _))) => Some((false, j)),
        (None, None) => None,
    }
}

fn absorb(own: &mut Vec<Episode>, other: &mut Vec<Episode>, index: usize, pass: &ReallocationPass, tolerance: f64) {
    let small = own.remove(index);
    let Some(found) = qualifying(&small, other, pass, tolerance) else {
        own.insert(index, small);
        return;
    };

    match (found.before, found.after) {
        (Some(before), Some(after)) => {
            let end = other[after].end;
            other[before].end = end;
            other.remove(after);
        }
        (Some(before), None) => other[before].end = small.end,
        (None, Some(after)) => other[after].start = small.start,
        (None, None) => {}
    }
}

/// Which way one boundary of an edited episode moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditCase {
    GrowBefore,
    GrowAfter,
    ShrinkBefore,
    ShrinkAfter,
}

/// Apply a manual resize of `set[behaviour][index]` to `new_range` and reconcile neighbours.
///
/// Growing trims (or removes) overlapped episodes of other behaviours and
/// absorbs same-behaviour episodes it now touches. Shrinking hands the vacated
/// span to the other-behaviour episode that touched the moved boundary, if
/// any. `tolerance` is the largest gap (seconds) still counted as touching.
pub fn reconcile_adjacent(
    set: &mut BehaviourMap<Vec<Episode>>,
    behaviour: Behaviour,
    index: usize,
    new_range: Episode,
    tolerance: f64,
) -> Result<Vec<EditCase>, ScoringError> {
    let old = *set[behaviour].get(index).ok_or_else(|| {
        ScoringError::InvalidEdit(format!(
            "{} has no episode at index {}",
            behaviour.as_str(),
            index
        ))
    })?;
    // re-validates start < end for ranges built without Episode::new
    let new_range = Episode::new(new_range.start, new_range.end)?;

    let mut cases = Vec::new();
    if new_range.start < old.start {
        cases.push(EditCase::GrowBefore);
    } else if new_range.start > old.start {
        cases.push(EditCase::ShrinkBefore);
    }
    if new_range.end > old.end {
        cases.push(EditCase::GrowAfter);
    } else if new_range.end < old.end {
        cases.push(EditCase::ShrinkAfter);
    }

    for case in &cases {
        match case {
            EditCase::ShrinkBefore => {
                let vacated_to = new_range.start.min(old.end);
                hand_over(set, behaviour, |e| (e.end - old.start).abs() <= tolerance, |e| {
                    e.end = vacated_to
                });
            }
            EditCase::ShrinkAfter => {
                let vacated_from = new_range.end.max(old.start);
                hand_over(set, behaviour, |e| (e.start - old.end).abs() <= tolerance, |e| {
                    e.start = vacated_from
                });
            }
            EditCase::GrowBefore | EditCase::GrowAfter => {}
        }
    }

    let grows = cases
        .iter()
        .any(|c| matches!(c, EditCase::GrowBefore | EditCase::GrowAfter));
    if grows {
        trim_others(set, behaviour, &new_range);
        let mut own = std::mem::take(&mut set[behaviour]);
        own.remove(index);
        let mut merged = new_range;
        loop {
            let before = own.len();
            own.retain(|e| {
                let touching =
                    e.start - merged.end <= tolerance && merged.start - e.end <= tolerance;
                if touching {
                    merged.start = merged.start.min(e.start);
                    merged.end = merged.end.max(e.end);
                }
                !touching
            });
            if own.len() == before {
                break;
            }
        }
        own.push(merged);
        set[behaviour] = own;
    } else {
        set[behaviour][index] = new_range;
    }

    for (_, list) in set.iter_mut() {
        list.sort_by(|a, b| a.start.total_cmp(&b.start));
    }
    Ok(cases)
}

/// Extend the other-behaviour episode that touched the moved boundary
fn hand_over(
    set: &mut BehaviourMap<Vec<Episode>>,
    edited: Behaviour,
    touches: impl Fn(&Episode) -> bool,
    extend: impl Fn(&mut Episode),
) {
    let found = set
        .iter()
        .filter(|(behaviour, _)| *behaviour != edited)
        .find_map(|(behaviour, list)| list.iter().position(&touches).map(|i| (behaviour, i)));
    if let Some((behaviour, i)) = found {
        extend(&mut set[behaviour][i]);
    }
}

/// Remove or trim other-behaviour episodes overlapping `range`
fn trim_others(set: &mut BehaviourMap<Vec<Episode>>, edited: Behaviour, range: &Episode) {
    for (behaviour, list) in set.iter_mut() {
        if behaviour == edited {
            continue;
        }
        let mut trimmed = Vec::with_capacity(list.len());
        for e in list.drain(..) {
            if !e.overlaps(range) {
                trimmed.push(e);
                continue;
            }
            if e.start < range.start {
                trimmed.push(Episode {
                    start: e.start,
                    end: range.start,
                });
            }
            if e.end > range.end {
                trimmed.push(Episode {
                    start: range.end,
                    end: e.end,
                });
            }
        }
        *list = trimmed;
    }
}
