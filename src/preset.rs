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

//! Presets, pads and the samples bound to them.

use std::fmt;
use std::path::{Path, PathBuf};

mod pattern;

pub use pattern::{BeatSchool, PadSequence, Pattern, PatternNote, UNDEFINED_TRACK};

/// Identifies a pad within a preset.
pub type PadId = u32;

/// A choke group id. Zero (or anything below) means the pad never chokes.
pub type ChokeGroup = i32;

/// Returns true if the given choke group takes part in choking.
pub fn is_choking(group: ChokeGroup) -> bool {
    group > 0
}

/// An audio sample resolved to a file on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    id: u32,
    filename: String,
    name: String,
    path: PathBuf,
    color: String,
    choke_group: ChokeGroup,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(
        id: u32,
        filename: &str,
        name: &str,
        path: PathBuf,
        color: &str,
        choke_group: ChokeGroup,
    ) -> Sample {
        Sample {
            id,
            filename: filename.to_string(),
            name: name.to_string(),
            path,
            color: color.to_string(),
            choke_group,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The display name of the sample.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The absolute path of the sample file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn choke_group(&self) -> ChokeGroup {
        self.choke_group
    }
}

/// A triggerable pad bound to exactly one sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrumPad {
    id: PadId,
    sample: Sample,
    color: String,
    choke_group: ChokeGroup,
}

impl DrumPad {
    /// Creates a new pad. The pad's choke group is the one used for arbitration,
    /// regardless of what the sample carries.
    pub fn new(id: PadId, sample: Sample, color: &str, choke_group: ChokeGroup) -> DrumPad {
        DrumPad {
            id,
            sample,
            color: color.to_string(),
            choke_group,
        }
    }

    pub fn id(&self) -> PadId {
        self.id
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn choke_group(&self) -> ChokeGroup {
        self.choke_group
    }
}

impl fmt::Display for DrumPad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, choke group {}, {})",
            self.id,
            self.sample.name,
            self.choke_group,
            self.sample.path.display()
        )
    }
}

/// A named, tempo-tagged collection of pads along with its tutorial patterns.
#[derive(Clone, Debug)]
pub struct Preset {
    id: String,
    name: String,
    tempo: u32,
    author: String,
    tags: Vec<String>,
    order_by: String,
    pads: Vec<DrumPad>,
    beat_school: BeatSchool,
}

impl Preset {
    /// Creates a new preset. Pads are kept sorted by id; when two pads share an id only
    /// the first one is kept so ids stay unique. A tempo of zero is raised to one.
    pub fn new(
        id: &str,
        name: &str,
        tempo: u32,
        mut pads: Vec<DrumPad>,
        beat_school: BeatSchool,
    ) -> Preset {
        pads.sort_by_key(|pad| pad.id);
        pads.dedup_by_key(|pad| pad.id);

        Preset {
            id: id.to_string(),
            name: name.to_string(),
            tempo: tempo.max(1),
            author: String::new(),
            tags: Vec::new(),
            order_by: String::new(),
            pads,
            beat_school,
        }
    }

    /// Attaches catalog metadata to the preset.
    pub fn with_metadata(mut self, author: &str, tags: Vec<String>, order_by: &str) -> Preset {
        self.author = author.to_string();
        self.tags = tags;
        self.order_by = order_by.to_string();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tempo in beats per minute.
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    /// The pads, ordered by id.
    pub fn pads(&self) -> &[DrumPad] {
        &self.pads
    }

    /// Gets the pad with the given id.
    pub fn pad(&self, id: PadId) -> Option<&DrumPad> {
        self.pads
            .binary_search_by_key(&id, |pad| pad.id)
            .ok()
            .map(|index| &self.pads[index])
    }

    pub fn beat_school(&self) -> &BeatSchool {
        &self.beat_school
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) @ {} BPM, {} pads, {} patterns",
            self.name,
            self.id,
            self.tempo,
            self.pads.len(),
            self.beat_school.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(id: PadId, choke_group: ChokeGroup) -> DrumPad {
        let filename = format!("{:02}.wav", id);
        DrumPad::new(
            id,
            Sample::new(
                id,
                &filename,
                &format!("{:02}", id),
                PathBuf::from("/samples").join(&filename),
                "red",
                choke_group,
            ),
            "red",
            choke_group,
        )
    }

    #[test]
    fn pads_are_sorted_and_unique() {
        let preset = Preset::new(
            "550",
            "Test",
            120,
            vec![pad(3, 0), pad(1, 1), pad(3, 2), pad(2, 0)],
            BeatSchool::default(),
        );

        let ids: Vec<PadId> = preset.pads().iter().map(|pad| pad.id()).collect();
        assert_eq!(vec![1, 2, 3], ids);
        assert_eq!(Some(1), preset.pad(1).map(|pad| pad.choke_group()));
        assert!(preset.pad(4).is_none());
    }

    #[test]
    fn tempo_is_at_least_one() {
        let preset = Preset::new("1", "Slow", 0, vec![], BeatSchool::default());
        assert_eq!(1, preset.tempo());
    }

    #[test]
    fn choking_groups() {
        assert!(!is_choking(0));
        assert!(!is_choking(-1));
        assert!(is_choking(1));
    }
}
