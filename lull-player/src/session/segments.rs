//! Segment model and selection
//!
//! A sound is a set of regular segments. For a contiguous sound (zero max
//! silence) every ordered pair of regular segments, including a segment with
//! itself, also gets a synthetic bridge segment named `from + to`. Bridges are
//! kept in an adjacency map keyed by origin so that picking the bridge after a
//! segment only looks at that segment's outgoing edges.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::content::SoundEntry;
use crate::error::{Error, Result};

/// Access tier of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Free,
    Premium,
}

impl AccessTier {
    fn from_premium(premium: bool) -> Self {
        if premium {
            AccessTier::Premium
        } else {
            AccessTier::Free
        }
    }
}

/// Endpoints of a bridge segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub from: String,
    pub to: String,
}

/// One retrievable audio unit of a sound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    /// Folder holding the per-segment directories for the current bitrate
    pub base_path: String,
    pub tier: AccessTier,
    pub bridge: Option<Bridge>,
}

impl Segment {
    /// Locator of this segment's chunk index
    pub fn index_locator(&self) -> String {
        format!("{}/{}/index.txt", self.base_path, self.name)
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn is_eligible(&self, premium: bool) -> bool {
        premium || self.tier == AccessTier::Free
    }
}

/// Regular segments plus the bridge adjacency of one sound
#[derive(Debug, Clone)]
pub struct SegmentGraph {
    sound_id: String,
    max_silence: f64,
    segments: Vec<Segment>,
    bridges: HashMap<String, Vec<Segment>>,
}

impl SegmentGraph {
    /// Build the graph for `sound_id` with segments stored under `base_path`
    pub fn build(sound_id: &str, entry: &SoundEntry, base_path: &str) -> Self {
        let segments: Vec<Segment> = entry
            .segments
            .iter()
            .map(|s| Segment {
                name: s.name.clone(),
                base_path: base_path.to_string(),
                tier: AccessTier::from_premium(s.premium),
                bridge: None,
            })
            .collect();

        let mut bridges: HashMap<String, Vec<Segment>> = HashMap::new();
        if entry.is_contiguous() {
            for from in &segments {
                let outgoing = segments
                    .iter()
                    .map(|to| Segment {
                        name: format!("{}{}", from.name, to.name),
                        base_path: base_path.to_string(),
                        tier: if from.tier == AccessTier::Free && to.tier == AccessTier::Free {
                            AccessTier::Free
                        } else {
                            AccessTier::Premium
                        },
                        bridge: Some(Bridge {
                            from: from.name.clone(),
                            to: to.name.clone(),
                        }),
                    })
                    .collect();
                bridges.insert(from.name.clone(), outgoing);
            }
        }

        Self {
            sound_id: sound_id.to_string(),
            max_silence: entry.max_silence,
            segments,
            bridges,
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.max_silence <= 0.0
    }

    pub fn max_silence(&self) -> f64 {
        self.max_silence
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Bridges leaving the regular segment `origin`
    pub fn bridges_from(&self, origin: &str) -> &[Segment] {
        self.bridges.get(origin).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bridge_count(&self) -> usize {
        self.bridges.values().map(Vec::len).sum()
    }

    /// Choose the segment to queue after `previous`.
    ///
    /// A bridge is always followed by its destination. After a regular
    /// segment of a contiguous sound, a random eligible outgoing bridge is
    /// chosen. Otherwise any eligible regular segment is chosen at random.
    pub fn select_next<R: Rng>(
        &self,
        previous: Option<&Segment>,
        premium: bool,
        rng: &mut R,
    ) -> Result<Segment> {
        let chosen = match previous {
            Some(Segment {
                bridge: Some(bridge),
                ..
            }) => self
                .segments
                .iter()
                .find(|s| s.name == bridge.to && s.is_eligible(premium)),
            Some(prev) if self.is_contiguous() => {
                let candidates: Vec<&Segment> = self
                    .bridges_from(&prev.name)
                    .iter()
                    .filter(|s| s.is_eligible(premium))
                    .collect();
                candidates.choose(rng).copied()
            }
            _ => {
                let candidates: Vec<&Segment> = self
                    .segments
                    .iter()
                    .filter(|s| s.is_eligible(premium))
                    .collect();
                candidates.choose(rng).copied()
            }
        };

        chosen.cloned().ok_or_else(|| Error::NoEligibleSegment {
            sound_id: self.sound_id.clone(),
            previous: previous.map(|s| s.name.clone()),
        })
    }
}

/// Length of the silence gap before the next segment of a non-contiguous sound
///
/// Uniform in `[min_silence, max_silence]`; collapses to `min_silence` when the
/// sound allows less than that.
pub fn silence_duration<R: Rng>(min_silence: f64, max_silence: f64, rng: &mut R) -> f64 {
    let span = (max_silence - min_silence).max(0.0);
    if span == 0.0 {
        return min_silence;
    }
    min_silence + rng.gen_range(0.0..=span)
}
