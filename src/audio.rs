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
use std::any::Any;
use std::{error::Error, fmt, sync::Arc, time::Duration};

use crate::config;
use crate::samples::LoadedSample;

pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod sample_source;

/// A player bound to a single sample. Players are cheap handles; the audio itself
/// is rendered by the device that created them.
pub trait PadPlayer: Send + Sync {
    /// Starts playback from the current position. Does nothing if already playing.
    fn play(&self);

    /// Stops playback, keeping the current position.
    fn stop(&self);

    /// Moves the playback position. Positions past the end are clamped.
    fn seek(&self, position: Duration);

    /// Returns true while the sample is audible.
    fn is_playing(&self) -> bool;

    /// The current playback position.
    fn current_time(&self) -> Duration;

    /// The length of the bound sample.
    fn duration(&self) -> Duration;
}

/// An audio output that pad players render through.
pub trait Device: Any + fmt::Display + Send + Sync {
    /// The rate samples must be converted to before creating players.
    fn sample_rate(&self) -> u32;

    /// Creates a stopped player for the given sample.
    fn create_player(&self, sample: LoadedSample) -> Arc<dyn PadPlayer>;
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the device described by the configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
