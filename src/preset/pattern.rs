// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::PadId;

/// The pattern track reserved for non-pad markers such as the click track.
pub const UNDEFINED_TRACK: &str = "undefined";

/// A single sequencer note: the zero-based step the pad fires on.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternNote {
    start: usize,
}

impl PatternNote {
    pub fn new(start: usize) -> PatternNote {
        PatternNote { start }
    }

    /// The step this note fires on.
    pub fn start(&self) -> usize {
        self.start
    }
}

/// A fixed-length step pattern from a preset's BeatSchool bank.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    id: i64,
    version: u32,
    name: String,
    sequencer_size: usize,
    /// Notes keyed by zero-based pad index, plus the undefined marker track.
    pads: BTreeMap<String, Vec<PatternNote>>,
    #[serde(default)]
    order_by: i64,
}

impl Pattern {
    /// Creates a new pattern. Notes outside of the pattern's steps are dropped.
    pub fn new(
        id: i64,
        version: u32,
        name: &str,
        sequencer_size: usize,
        pads: BTreeMap<String, Vec<PatternNote>>,
    ) -> Pattern {
        let mut pattern = Pattern {
            id,
            version,
            name: name.to_string(),
            sequencer_size,
            pads,
            order_by: 0,
        };
        pattern.retain_valid_notes();
        pattern
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The total number of steps in the pattern.
    pub fn sequencer_size(&self) -> usize {
        self.sequencer_size
    }

    pub fn order_by(&self) -> i64 {
        self.order_by
    }

    /// Drops any note whose step falls outside of `[0, sequencer_size)`. Returns the
    /// number of notes removed.
    pub fn retain_valid_notes(&mut self) -> usize {
        let size = self.sequencer_size;
        let mut removed = 0;
        for (key, notes) in self.pads.iter_mut() {
            let before = notes.len();
            notes.retain(|note| note.start < size);
            if notes.len() != before {
                warn!(
                    pattern = self.name,
                    track = key,
                    dropped = before - notes.len(),
                    sequencer_size = size,
                    "Dropping notes outside of the pattern"
                );
                removed += before - notes.len();
            }
        }
        removed
    }

    /// The per-pad sequences of this pattern, ordered by pad id. Track keys are
    /// zero-based pad indices, so track "0" drives pad 1. The undefined track and
    /// any non-numeric key are excluded.
    pub fn pad_sequences(&self) -> Vec<PadSequence> {
        let mut sequences: Vec<PadSequence> = self
            .pads
            .iter()
            .filter(|(key, _)| key.as_str() != UNDEFINED_TRACK)
            .filter_map(|(key, notes)| {
                let index = key.parse::<PadId>().ok()?;
                let mut steps: Vec<usize> = notes
                    .iter()
                    .map(|note| note.start)
                    .filter(|step| *step < self.sequencer_size)
                    .collect();
                steps.sort_unstable();
                steps.dedup();
                Some(PadSequence {
                    pad_id: index + 1,
                    steps,
                })
            })
            .collect();
        sequences.sort_by_key(|sequence| sequence.pad_id);
        sequences
    }

    /// Events on the undefined track (click track, markers).
    pub fn undefined_events(&self) -> &[PatternNote] {
        self.pads
            .get(UNDEFINED_TRACK)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The notes stored under the given raw track key.
    pub fn notes_for_pad(&self, pad_index: PadId) -> &[PatternNote] {
        self.pads
            .get(&pad_index.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns true if the given raw track key has any notes.
    pub fn has_notes_for_pad(&self, pad_index: PadId) -> bool {
        !self.notes_for_pad(pad_index).is_empty()
    }
}

/// The steps at which a single pad fires within a pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PadSequence {
    pad_id: PadId,
    steps: Vec<usize>,
}

impl PadSequence {
    pub fn pad_id(&self) -> PadId {
        self.pad_id
    }

    /// The sorted steps this pad fires on.
    pub fn steps(&self) -> &[usize] {
        &self.steps
    }

    /// Returns true if this pad fires on the given step.
    pub fn plays_at_step(&self, step: usize) -> bool {
        self.steps.binary_search(&step).is_ok()
    }
}

/// The tutorial pattern bank of a preset.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BeatSchool {
    #[serde(default)]
    v0: Vec<Pattern>,
    #[serde(default)]
    v1: Vec<Pattern>,
}

impl BeatSchool {
    pub fn new(v0: Vec<Pattern>, v1: Vec<Pattern>) -> BeatSchool {
        BeatSchool { v0, v1 }
    }

    /// The patterns for the given bank version. Unknown versions have no patterns.
    pub fn patterns(&self, version: u32) -> &[Pattern] {
        match version {
            0 => &self.v0,
            1 => &self.v1,
            _ => &[],
        }
    }

    /// Finds a pattern by version and id.
    pub fn find(&self, version: u32, pattern_id: i64) -> Option<&Pattern> {
        self.patterns(version)
            .iter()
            .find(|pattern| pattern.id == pattern_id)
    }

    /// The total number of patterns across all versions.
    pub fn len(&self) -> usize {
        self.v0.len() + self.v1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn patterns_mut(&mut self) -> impl Iterator<Item = &mut Pattern> {
        self.v0.iter_mut().chain(self.v1.iter_mut())
    }
}
