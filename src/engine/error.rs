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
use std::path::PathBuf;

use crate::catalog::CatalogError;
use crate::mixdown::MixdownError;
use crate::preset::{ChokeGroup, PadId};

/// Errors surfaced by pad engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unable to load preset {id}: {cause}")]
    PresetLoadFailed {
        id: String,
        #[source]
        cause: CatalogError,
    },

    #[error("sample not found: {}", .0.display())]
    SampleNotFound(PathBuf),

    #[error("pad {0} is not part of the loaded preset")]
    PadNotFound(PadId),

    #[error("a recording is already in progress")]
    RecordingInProgress,

    #[error("no recording available")]
    NoRecordingAvailable,

    #[error("choke group {0} does not choke")]
    InvalidChokeGroup(ChokeGroup),

    #[error("unable to render recording: {0}")]
    RenderFailed(#[from] MixdownError),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed(e.to_string())
    }
}
