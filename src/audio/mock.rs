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
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::audio::PadPlayer;
use crate::samples::LoadedSample;

/// The sample rate mock devices report.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// A mock device. Doesn't actually play anything; its players advance with tokio's
/// clock, so paused-time tests can drive them.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    players: Arc<Mutex<Vec<Arc<Player>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            players: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every player this device has created, oldest first.
    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.lock().clone()
    }

    /// The players created for the given file.
    pub fn players_for(&self, path: &Path) -> Vec<Arc<Player>> {
        self.players
            .lock()
            .iter()
            .filter(|player| player.path() == path)
            .cloned()
            .collect()
    }
}

impl crate::audio::Device for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_player(&self, sample: LoadedSample) -> Arc<dyn PadPlayer> {
        debug!(device = self.name, path = ?sample.path(), "Creating mock player");
        let player = Arc::new(Player::new(sample.path().to_path_buf(), sample.duration()));
        self.players.lock().push(player.clone());
        player
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

struct PlayerState {
    /// When playback last started or was seeked while playing.
    started_at: Option<Instant>,
    /// Position at `started_at`, or the resting position while stopped.
    offset: Duration,
}

/// A silent player that tracks position against the clock.
pub struct Player {
    path: PathBuf,
    duration: Duration,
    state: Mutex<PlayerState>,
    play_count: AtomicUsize,
    stop_count: AtomicUsize,
}

impl Player {
    fn new(path: PathBuf, duration: Duration) -> Player {
        Player {
            path,
            duration,
            state: Mutex::new(PlayerState {
                started_at: None,
                offset: Duration::ZERO,
            }),
            play_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times play was called.
    pub fn play_count(&self) -> usize {
        self.play_count.load(Ordering::Relaxed)
    }

    /// Number of times stop was called.
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::Relaxed)
    }

    fn position(&self, state: &PlayerState) -> Duration {
        let position = match state.started_at {
            Some(started_at) => state.offset + started_at.elapsed(),
            None => state.offset,
        };
        position.min(self.duration)
    }
}

impl PadPlayer for Player {
    fn play(&self) {
        self.play_count.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let position = self.position(&state);
        if state.started_at.is_some() && position < self.duration {
            return;
        }
        state.offset = if position >= self.duration {
            Duration::ZERO
        } else {
            position
        };
        state.started_at = Some(Instant::now());
    }

    fn stop(&self) {
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.offset = self.position(&state);
        state.started_at = None;
    }

    fn seek(&self, position: Duration) {
        let mut state = self.state.lock();
        state.offset = position.min(self.duration);
        if state.started_at.is_some() {
            state.started_at = Some(Instant::now());
        }
    }

    fn is_playing(&self) -> bool {
        let state = self.state.lock();
        state.started_at.is_some() && self.position(&state) < self.duration
    }

    fn current_time(&self) -> Duration {
        self.position(&self.state.lock())
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}
