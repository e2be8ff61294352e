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

//! Drum pad sample playback, pattern sequencing and performance recording.
//!
//! The [`engine::PadEngine`] owns the loaded preset and every pad's player. Pads are
//! triggered manually or by the [`sequencer::StepSequencer`]; both paths share choke
//! group arbitration and recording. Recorded performances are bounced to a WAV file
//! by [`mixdown::render`].

pub mod audio;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod mixdown;
pub mod playsync;
pub mod preset;
pub mod samples;
pub mod sequencer;
#[cfg(test)]
mod testutil;

pub use engine::{EngineError, PadEngine, PositionStream, PositionUpdate, TriggerEvent};
pub use preset::{DrumPad, PadId, Pattern, Preset, Sample};
pub use sequencer::{SequenceEvent, SequenceProgress, StepSequencer};
