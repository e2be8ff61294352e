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

//! The pad engine: preset ownership, pad triggering with choke groups, position
//! streaming and performance recording.
//!
//! All mutable playback state lives in one [`EngineState`] behind an async mutex, so
//! triggers from the sequencer and from manual taps are serialized. Background tasks
//! (position polling) only read player state and route mutations back through the
//! same lock.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::audio::{self, Device, PadPlayer};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::mixdown;
use crate::preset::{is_choking, ChokeGroup, DrumPad, PadId, Preset, Sample};
use crate::samples::SampleLoader;

mod choke;
mod error;
mod position;

pub use choke::ChokeGroups;
pub use error::EngineError;
pub use position::{PositionSink, PositionStream, PositionStreams, PositionUpdate};

/// Polling interval near the end of a sample.
const FINAL_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Polling interval while a pad is playing.
const PLAYING_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Polling interval while a pad has no player.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Position updates closer together than this are dropped.
const POSITION_DEBOUNCE: Duration = Duration::from_millis(50);
/// Fraction of the duration after which the final polling interval is used.
const FINAL_STRETCH: f64 = 0.95;

const RECORDING_PREFIX: &str = "pad_recording_";

/// A pad trigger captured while recording.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerEvent {
    offset: Duration,
    sample_path: PathBuf,
    velocity: f32,
}

impl TriggerEvent {
    /// Creates an event at full velocity.
    pub fn new(offset: Duration, sample_path: PathBuf) -> TriggerEvent {
        TriggerEvent {
            offset,
            sample_path,
            velocity: 1.0,
        }
    }

    /// Time since the recording started.
    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn sample_path(&self) -> &Path {
        &self.sample_path
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }
}

struct RecordingSession {
    path: PathBuf,
    started_at: Instant,
    events: Vec<TriggerEvent>,
}

/// Everything the engine mutates, guarded by a single lock.
#[derive(Default)]
struct EngineState {
    preset: Option<Arc<Preset>>,
    /// Players by pad, created on first trigger.
    players: HashMap<PadId, Arc<dyn PadPlayer>>,
    /// Players for arbitrary files such as recordings.
    file_players: HashMap<PathBuf, Arc<dyn PadPlayer>>,
    choke_groups: ChokeGroups,
    recording: Option<RecordingSession>,
    last_recording: Option<PathBuf>,
}

impl EngineState {
    /// Drops pads that finished on their own from the choke groups.
    fn prune_choke_groups(&mut self) {
        let players = &self.players;
        self.choke_groups.retain_active(|pad_id| {
            players
                .get(&pad_id)
                .is_some_and(|player| player.is_playing())
        });
    }

    fn stop_players(&mut self) {
        for player in self.players.values().chain(self.file_players.values()) {
            if player.is_playing() {
                player.stop();
            }
        }
        self.choke_groups.clear_all();
    }
}

/// Restarts the player from the beginning.
fn restart(player: &Arc<dyn PadPlayer>) {
    player.seek(Duration::ZERO);
    if player.is_playing() {
        player.stop();
    }
    player.play();
}

/// Plays presets through an audio device.
#[derive(Clone)]
pub struct PadEngine {
    state: Arc<Mutex<EngineState>>,
    catalog: Arc<dyn Catalog>,
    device: Arc<dyn Device>,
    loader: Arc<parking_lot::Mutex<SampleLoader>>,
    positions: Arc<PositionStreams>,
    recordings_dir: PathBuf,
}

impl PadEngine {
    /// Creates an engine with nothing loaded.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        device: Arc<dyn Device>,
        recordings_dir: &Path,
    ) -> PadEngine {
        let loader = SampleLoader::new(device.sample_rate());
        PadEngine {
            state: Arc::new(Mutex::new(EngineState::default())),
            catalog,
            device,
            loader: Arc::new(parking_lot::Mutex::new(loader)),
            positions: Arc::new(PositionStreams::new()),
            recordings_dir: recordings_dir.to_path_buf(),
        }
    }

    /// Creates an engine from configuration, opening the configured audio device.
    pub fn from_config(config: &EngineConfig) -> Result<PadEngine, Box<dyn Error>> {
        let device = audio::get_device(config.audio())?;
        info!(device = device.to_string(), "Using audio device");
        Ok(PadEngine::new(
            Arc::new(config.catalog()),
            device,
            &config.recordings_dir(),
        ))
    }

    /// The audio device the engine plays through.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Loads the preset and makes it the active one. On failure the previous preset
    /// stays active.
    pub async fn load_preset(&self, id: &str) -> Result<Arc<Preset>, EngineError> {
        let catalog = self.catalog.clone();
        let preset_id = id.to_string();
        let preset = tokio::task::spawn_blocking(move || catalog.load(&preset_id))
            .await?
            .map_err(|cause| EngineError::PresetLoadFailed {
                id: id.to_string(),
                cause,
            })?;
        let preset = Arc::new(preset);

        // Decoding holds the loader lock, so clearing it can block.
        let loader = self.loader.clone();
        tokio::task::spawn_blocking(move || loader.lock().clear()).await?;

        let mut state = self.state.lock().await;
        state.stop_players();
        // Pad ids are reused across presets, so nothing per-pad carries over.
        state.players.clear();
        self.positions.clear();
        state.preset = Some(preset.clone());

        info!(
            preset = preset.id(),
            name = preset.name(),
            pads = preset.pads().len(),
            tempo = preset.tempo(),
            "Preset is active"
        );
        Ok(preset)
    }

    /// Stops everything and forgets the active preset.
    pub async fn unload_preset(&self) {
        let mut state = self.state.lock().await;
        state.stop_players();
        state.players.clear();
        self.positions.clear();
        if let Some(preset) = state.preset.take() {
            info!(preset = preset.id(), "Preset unloaded");
        }
    }

    pub async fn is_preset_loaded(&self) -> bool {
        self.state.lock().await.preset.is_some()
    }

    /// The active preset, including its tempo and pattern bank.
    pub async fn current_preset(&self) -> Option<Arc<Preset>> {
        self.state.lock().await.preset.clone()
    }

    pub async fn current_preset_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .preset
            .as_ref()
            .map(|preset| preset.id().to_string())
    }

    pub async fn current_tempo(&self) -> Option<u32> {
        self.state
            .lock()
            .await
            .preset
            .as_ref()
            .map(|preset| preset.tempo())
    }

    /// A snapshot of the active preset's pads.
    pub async fn list_pads(&self) -> Vec<DrumPad> {
        self.state
            .lock()
            .await
            .preset
            .as_ref()
            .map(|preset| preset.pads().to_vec())
            .unwrap_or_default()
    }

    /// The sample bound to the pad in the active preset.
    pub async fn sample_for_pad(&self, pad_id: PadId) -> Option<Sample> {
        self.state
            .lock()
            .await
            .preset
            .as_ref()
            .and_then(|preset| preset.pad(pad_id))
            .map(|pad| pad.sample().clone())
    }

    /// Triggers the pad: chokes its group, then restarts its sample from the top.
    pub async fn trigger_pad(&self, pad_id: PadId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let pad = state
            .preset
            .as_ref()
            .and_then(|preset| preset.pad(pad_id))
            .cloned()
            .ok_or(EngineError::PadNotFound(pad_id))?;
        let group = pad.choke_group();

        state.prune_choke_groups();
        for choked in state.choke_groups.pads_to_choke(group, pad_id) {
            if let Some(player) = state.players.get(&choked) {
                player.stop();
            }
            state.choke_groups.unregister(choked, group);
            debug!(pad = choked, by = pad_id, choke_group = group, "Choked pad");
        }

        let existing = state.players.get(&pad_id).cloned();
        let player = match existing {
            Some(player) => player,
            None => {
                let player = self.create_player(pad.sample().path()).await?;
                state.players.insert(pad_id, player.clone());
                player
            }
        };

        player.seek(Duration::ZERO);
        if player.is_playing() {
            player.stop();
        }
        state.choke_groups.register_playing(pad_id, group);
        if let Some(recording) = state.recording.as_mut() {
            recording.events.push(TriggerEvent::new(
                recording.started_at.elapsed(),
                pad.sample().path().to_path_buf(),
            ));
        }
        player.play();

        debug!(pad = pad_id, choke_group = group, "Triggered pad");
        Ok(())
    }

    /// Plays an arbitrary file from the beginning.
    pub async fn play_sample(&self, path: &Path) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let existing = state.file_players.get(path).cloned();
        let player = match existing {
            Some(player) => player,
            None => {
                let player = self.create_player(path).await?;
                state.file_players.insert(path.to_path_buf(), player.clone());
                player
            }
        };
        restart(&player);
        info!(path = ?path, "Playing sample");
        Ok(())
    }

    /// The length of the given sample file.
    pub async fn sample_duration(&self, path: &Path) -> Result<Duration, EngineError> {
        let loader = self.loader.clone();
        let sample_path = path.to_path_buf();
        let sample = tokio::task::spawn_blocking(move || loader.lock().load(&sample_path))
            .await?
            .map_err(|e| {
                warn!(path = ?path, err = e.to_string(), "Unable to load sample");
                EngineError::SampleNotFound(path.to_path_buf())
            })?;
        Ok(sample.duration())
    }

    /// Stops every pad and sample and clears the choke groups.
    pub async fn stop_all(&self) {
        self.state.lock().await.stop_players();
        debug!("Stopped all players");
    }

    /// Returns true if the pad's player is sounding.
    pub async fn is_pad_playing(&self, pad_id: PadId) -> bool {
        self.state
            .lock()
            .await
            .players
            .get(&pad_id)
            .is_some_and(|player| player.is_playing())
    }

    /// The pads currently ringing in the given choke group.
    pub async fn ringing_pads(&self, group: ChokeGroup) -> Result<Vec<PadId>, EngineError> {
        if !is_choking(group) {
            return Err(EngineError::InvalidChokeGroup(group));
        }
        Ok(self.state.lock().await.choke_groups.ringing(group))
    }

    /// Starts capturing triggers. Returns the path the recording will be rendered to.
    pub async fn start_recording(&self) -> Result<PathBuf, EngineError> {
        let mut state = self.state.lock().await;
        if state.recording.is_some() {
            return Err(EngineError::RecordingInProgress);
        }

        let path = allocate_recording_path(&self.recordings_dir);
        state.recording = Some(RecordingSession {
            path: path.clone(),
            started_at: Instant::now(),
            events: Vec::new(),
        });
        info!(path = ?path, "Recording started");
        Ok(path)
    }

    /// Stops capturing and renders what was captured. Returns None if nothing was
    /// being recorded.
    pub async fn stop_recording(&self) -> Result<Option<PathBuf>, EngineError> {
        let Some(recording) = self.state.lock().await.recording.take() else {
            return Ok(None);
        };
        info!(
            path = ?recording.path,
            events = recording.events.len(),
            "Recording stopped, rendering"
        );

        let RecordingSession { path, events, .. } = recording;
        let summary =
            tokio::task::spawn_blocking(move || mixdown::render(&events, &path)).await??;

        self.state.lock().await.last_recording = Some(summary.path.clone());
        Ok(Some(summary.path))
    }

    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.recording.is_some()
    }

    /// The most recently rendered recording.
    pub async fn last_recording(&self) -> Option<PathBuf> {
        self.state.lock().await.last_recording.clone()
    }

    /// Plays the most recently rendered recording.
    pub async fn play_recorded_audio(&self) -> Result<(), EngineError> {
        let path = self
            .last_recording()
            .await
            .ok_or(EngineError::NoRecordingAvailable)?;
        self.play_sample(&path).await
    }

    /// Streams the pad's playback position. Replaces any existing stream for the pad.
    /// Must be called from within a tokio runtime.
    pub fn subscribe_position(&self, pad_id: PadId) -> PositionStream {
        let (stream, sink) = self.positions.subscribe(pad_id);
        let engine = self.clone();
        let span = span!(Level::INFO, "position updates", pad = pad_id);
        tokio::spawn(async move { engine.poll_position(sink).await }.instrument(span));
        stream
    }

    /// Ends the pad's position stream.
    pub fn unsubscribe_position(&self, pad_id: PadId) {
        self.positions.unsubscribe(pad_id);
    }

    /// Returns true if the pad has a live position stream.
    pub fn has_position_subscriber(&self, pad_id: PadId) -> bool {
        self.positions.is_subscribed(pad_id)
    }

    async fn player_for_pad(&self, pad_id: PadId) -> Option<Arc<dyn PadPlayer>> {
        self.state.lock().await.players.get(&pad_id).cloned()
    }

    /// Polls the pad's player and feeds the sink until playback completes or the
    /// subscriber goes away.
    async fn poll_position(&self, sink: PositionSink) {
        let pad_id = sink.pad_id();
        let mut last_emitted: Option<Duration> = None;

        loop {
            if sink.is_closed() {
                debug!("Subscriber gone");
                break;
            }

            let Some(player) = self.player_for_pad(pad_id).await else {
                if !sink.sleep(IDLE_POLL_INTERVAL).await {
                    break;
                }
                continue;
            };

            let current_time = player.current_time();
            let duration = player.duration();
            if !player.is_playing() || current_time >= duration {
                sink.emit(duration, duration);
                sink.emit(Duration::ZERO, duration);
                self.finish_pad(pad_id).await;
                debug!("Playback complete");
                break;
            }

            let due = match last_emitted {
                Some(last) => time_delta(current_time, last) >= POSITION_DEBOUNCE,
                None => true,
            };
            if due {
                if !sink.emit(current_time, duration) {
                    break;
                }
                last_emitted = Some(current_time);
            }

            let interval =
                if current_time.as_secs_f64() >= duration.as_secs_f64() * FINAL_STRETCH {
                    FINAL_POLL_INTERVAL
                } else {
                    PLAYING_POLL_INTERVAL
                };
            if !sink.sleep(interval).await {
                break;
            }
        }
    }

    /// Drops a finished pad from its choke group unless it was retriggered meanwhile.
    async fn finish_pad(&self, pad_id: PadId) {
        let mut state = self.state.lock().await;
        let still_playing = state
            .players
            .get(&pad_id)
            .is_some_and(|player| player.is_playing());
        if still_playing {
            return;
        }
        let group = state
            .preset
            .as_ref()
            .and_then(|preset| preset.pad(pad_id))
            .map(|pad| pad.choke_group());
        if let Some(group) = group {
            state.choke_groups.unregister(pad_id, group);
        }
    }

    /// Decodes the file and creates a player for it.
    async fn create_player(&self, path: &Path) -> Result<Arc<dyn PadPlayer>, EngineError> {
        let loader = self.loader.clone();
        let sample_path = path.to_path_buf();
        let sample = tokio::task::spawn_blocking(move || loader.lock().load(&sample_path))
            .await?
            .map_err(|e| {
                warn!(path = ?path, err = e.to_string(), "Unable to load sample");
                EngineError::SampleNotFound(path.to_path_buf())
            })?;
        Ok(self.device.create_player(sample))
    }
}

fn time_delta(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Picks a recording file name that doesn't exist yet.
fn allocate_recording_path(dir: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let mut path = dir.join(format!("{}{}.wav", RECORDING_PREFIX, millis));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{}{}_{}.wav", RECORDING_PREFIX, millis, suffix));
        suffix += 1;
    }
    path
}
