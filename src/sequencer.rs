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

//! Plays BeatSchool patterns by triggering pads on a sixteenth-note grid.
//!
//! A run is a background task with its own [`CancelHandle`]. Starting a new run
//! cancels and joins the previous one first, so two runs never overlap. Progress is
//! published on a broadcast channel, and the latest state on a watch channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::engine::{EngineError, PadEngine};
use crate::playsync::CancelHandle;
use crate::preset::{PadId, PadSequence, Pattern};

/// Steps per beat. Pattern steps are sixteenth notes.
const STEPS_PER_BEAT: f64 = 4.0;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("invalid tempo {0}, must be at least 1 BPM")]
    InvalidTempo(u32),
}

/// Something the sequencer can trigger pads on.
pub trait PadTrigger: Send + Sync + 'static {
    fn trigger_pad(&self, pad_id: PadId)
        -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Silences everything that's sounding.
    fn stop_all(&self) -> impl Future<Output = ()> + Send;
}

impl PadTrigger for PadEngine {
    async fn trigger_pad(&self, pad_id: PadId) -> Result<(), EngineError> {
        PadEngine::trigger_pad(self, pad_id).await
    }

    async fn stop_all(&self) {
        PadEngine::stop_all(self).await
    }
}

/// A snapshot of a run's progress.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceProgress {
    pub current_step: usize,
    pub total_steps: usize,
    pub is_playing: bool,
    pub pattern_name: String,
    pub tempo: u32,
}

impl SequenceProgress {
    /// How far through the pattern the run is, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.current_step as f64 / self.total_steps as f64).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SequenceEvent {
    /// A run began.
    Started(SequenceProgress),
    /// A step's pads were triggered.
    Step(SequenceProgress),
    /// A run ended, either on its own or because it was stopped.
    Finished(SequenceProgress),
}

impl SequenceEvent {
    pub fn progress(&self) -> &SequenceProgress {
        match self {
            SequenceEvent::Started(progress)
            | SequenceEvent::Step(progress)
            | SequenceEvent::Finished(progress) => progress,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Playing,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequencerStatus {
    pub state: SequencerState,
    pub current_step: usize,
    pub total_steps: usize,
}

/// The length of one step at the given tempo.
pub fn step_duration(tempo: u32) -> Duration {
    Duration::from_secs_f64(60.0 / (tempo as f64 * STEPS_PER_BEAT))
}

struct Run {
    cancel: CancelHandle,
    join: JoinHandle<()>,
}

/// Drives pattern playback against a [`PadTrigger`].
pub struct StepSequencer<T: PadTrigger = PadEngine> {
    trigger: Arc<T>,
    run: Mutex<Option<Run>>,
    events: broadcast::Sender<SequenceEvent>,
    status: watch::Sender<SequencerStatus>,
}

impl<T: PadTrigger> StepSequencer<T> {
    pub fn new(trigger: Arc<T>) -> StepSequencer<T> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(SequencerStatus {
            state: SequencerState::Idle,
            current_step: 0,
            total_steps: 0,
        });
        StepSequencer {
            trigger,
            run: Mutex::new(None),
            events,
            status,
        }
    }

    /// Subscribes to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SequencerStatus {
        *self.status.borrow()
    }

    pub fn is_playing(&self) -> bool {
        self.status().state == SequencerState::Playing
    }

    /// Plays the pattern, replacing any run in progress.
    pub async fn play(
        &self,
        pattern: &Pattern,
        tempo: u32,
        looping: bool,
    ) -> Result<(), SequencerError> {
        if tempo == 0 {
            return Err(SequencerError::InvalidTempo(tempo));
        }

        let mut run = self.run.lock().await;
        if let Some(previous) = run.take() {
            self.finish_run(previous).await;
        }

        let sequence = Sequence {
            name: pattern.name().to_string(),
            tempo,
            total_steps: pattern.sequencer_size(),
            pad_sequences: pattern.pad_sequences(),
            step_duration: step_duration(tempo),
            looping,
        };
        info!(
            pattern = sequence.name,
            tempo,
            steps = sequence.total_steps,
            looping,
            "Starting sequence"
        );

        self.status.send_replace(SequencerStatus {
            state: SequencerState::Playing,
            current_step: 0,
            total_steps: sequence.total_steps,
        });
        let _ = self
            .events
            .send(SequenceEvent::Started(sequence.progress(0, true)));

        let cancel = CancelHandle::new();
        let span = span!(Level::INFO, "sequencer", pattern = sequence.name);
        let task = SequenceTask {
            trigger: self.trigger.clone(),
            sequence,
            cancel: cancel.clone(),
            events: self.events.clone(),
            status: self.status.clone(),
            started_at: Instant::now(),
        };
        let join = tokio::spawn(task.run().instrument(span));
        *run = Some(Run { cancel, join });
        Ok(())
    }

    /// Stops the current run and silences every pad. Safe to call at any time.
    pub async fn stop(&self) {
        let previous = self.run.lock().await.take();
        match previous {
            Some(previous) => self.finish_run(previous).await,
            None => self.trigger.stop_all().await,
        }
    }

    /// Same as [`StepSequencer::stop`].
    pub async fn pause(&self) {
        self.stop().await
    }

    /// Resolves once the sequencer isn't playing anymore.
    pub async fn wait(&self) {
        let mut status = self.status.subscribe();
        let _ = status
            .wait_for(|status| status.state != SequencerState::Playing)
            .await;
    }

    async fn finish_run(&self, run: Run) {
        run.cancel.cancel();
        if let Err(e) = run.join.await {
            warn!(err = e.to_string(), "Sequencer task failed");
        }
        self.trigger.stop_all().await;
    }
}

/// Everything a run needs to know about its pattern.
struct Sequence {
    name: String,
    tempo: u32,
    total_steps: usize,
    pad_sequences: Vec<PadSequence>,
    step_duration: Duration,
    looping: bool,
}

impl Sequence {
    fn progress(&self, current_step: usize, is_playing: bool) -> SequenceProgress {
        SequenceProgress {
            current_step,
            total_steps: self.total_steps,
            is_playing,
            pattern_name: self.name.clone(),
            tempo: self.tempo,
        }
    }
}

struct SequenceTask<T: PadTrigger> {
    trigger: Arc<T>,
    sequence: Sequence,
    cancel: CancelHandle,
    events: broadcast::Sender<SequenceEvent>,
    status: watch::Sender<SequencerStatus>,
    started_at: Instant,
}

impl<T: PadTrigger> SequenceTask<T> {
    async fn run(self) {
        let total_steps = self.sequence.total_steps;
        let step_duration = self.sequence.step_duration;
        let mut pass_start = self.started_at;

        'passes: loop {
            for step in 0..total_steps {
                if self.cancel.is_cancelled() {
                    break 'passes;
                }

                for pad_sequence in &self.sequence.pad_sequences {
                    if !pad_sequence.plays_at_step(step) {
                        continue;
                    }
                    if let Err(e) = self.trigger.trigger_pad(pad_sequence.pad_id()).await {
                        warn!(
                            pad = pad_sequence.pad_id(),
                            step,
                            err = e.to_string(),
                            "Unable to trigger pad, skipping"
                        );
                    }
                }

                self.status.send_modify(|status| status.current_step = step);
                let _ = self
                    .events
                    .send(SequenceEvent::Step(self.sequence.progress(step, true)));
                debug!(step, "Step");

                let deadline = pass_start + step_duration * (step as u32 + 1);
                if !self.cancel.sleep_until(deadline).await {
                    break 'passes;
                }
            }

            if !self.sequence.looping || total_steps == 0 {
                break;
            }
            pass_start += step_duration * total_steps as u32;
        }

        self.status.send_replace(SequencerStatus {
            state: SequencerState::Stopped,
            current_step: 0,
            total_steps,
        });
        let _ = self
            .events
            .send(SequenceEvent::Finished(self.sequence.progress(0, false)));
        info!(cancelled = self.cancel.is_cancelled(), "Sequence finished");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::preset::PatternNote;
    use crate::testutil::engine_fixture;

    /// Records when each pad was triggered.
    struct FakeTrigger {
        origin: Instant,
        known_pads: Vec<PadId>,
        triggers: parking_lot::Mutex<Vec<(PadId, Duration)>>,
        stops: AtomicUsize,
    }

    impl FakeTrigger {
        fn new(known_pads: &[PadId]) -> Arc<FakeTrigger> {
            Arc::new(FakeTrigger {
                origin: Instant::now(),
                known_pads: known_pads.to_vec(),
                triggers: parking_lot::Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
            })
        }

        fn triggers(&self) -> Vec<(PadId, Duration)> {
            self.triggers.lock().clone()
        }
    }

    impl PadTrigger for FakeTrigger {
        async fn trigger_pad(&self, pad_id: PadId) -> Result<(), EngineError> {
            if !self.known_pads.contains(&pad_id) {
                return Err(EngineError::PadNotFound(pad_id));
            }
            self.triggers.lock().push((pad_id, self.origin.elapsed()));
            Ok(())
        }

        async fn stop_all(&self) {
            self.stops.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn pattern(name: &str, size: usize, tracks: &[(&str, &[usize])]) -> Pattern {
        let pads: BTreeMap<String, Vec<PatternNote>> = tracks
            .iter()
            .map(|(key, steps)| {
                (
                    key.to_string(),
                    steps.iter().map(|step| PatternNote::new(*step)).collect(),
                )
            })
            .collect();
        Pattern::new(1, 0, name, size, pads)
    }

    fn drain(events: &mut broadcast::Receiver<SequenceEvent>) -> Vec<SequenceEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[test]
    fn sixteenth_note_steps() {
        assert_eq!(Duration::from_millis(125), step_duration(120));
        assert_eq!(Duration::from_millis(250), step_duration(60));
    }

    #[tokio::test(start_paused = true)]
    async fn plays_each_step_once() {
        let trigger = FakeTrigger::new(&[1]);
        let sequencer = StepSequencer::new(trigger.clone());
        let mut events = sequencer.subscribe();

        sequencer
            .play(&pattern("Basic", 4, &[("0", &[0, 2])]), 120, false)
            .await
            .expect("play");
        assert!(sequencer.is_playing());
        sequencer.wait().await;

        assert_eq!(
            vec![(1, Duration::ZERO), (1, Duration::from_millis(250))],
            trigger.triggers()
        );
        assert_eq!(SequencerState::Stopped, sequencer.status().state);

        let events = drain(&mut events);
        assert_eq!(6, events.len());
        assert!(matches!(&events[0], SequenceEvent::Started(p) if p.current_step == 0 && p.is_playing));
        for (step, event) in events[1..5].iter().enumerate() {
            assert!(matches!(event, SequenceEvent::Step(p) if p.current_step == step));
        }
        match &events[5] {
            SequenceEvent::Finished(progress) => {
                assert!(!progress.is_playing);
                assert_eq!(4, progress.total_steps);
                assert_eq!("Basic", progress.pattern_name);
                assert_eq!(120, progress.tempo);
            }
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn looping_until_stopped() {
        let trigger = FakeTrigger::new(&[1]);
        let sequencer = StepSequencer::new(trigger.clone());

        sequencer
            .play(&pattern("Loop", 4, &[("0", &[0, 2])]), 120, true)
            .await
            .expect("play");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        sequencer.stop().await;

        let times: Vec<Duration> = trigger.triggers().iter().map(|(_, at)| *at).collect();
        let expected: Vec<Duration> = [0, 250, 500, 750, 1000]
            .iter()
            .map(|millis| Duration::from_millis(*millis))
            .collect();
        assert_eq!(expected, times);
        assert_eq!(1, trigger.stops.load(Ordering::Relaxed));
        assert!(!sequencer.is_playing());

        // Stopping again is harmless.
        sequencer.stop().await;
        assert_eq!(SequencerState::Stopped, sequencer.status().state);
    }

    #[tokio::test]
    async fn zero_tempo_is_rejected() {
        let sequencer = StepSequencer::new(FakeTrigger::new(&[1]));
        assert!(matches!(
            sequencer.play(&pattern("Basic", 4, &[]), 0, false).await,
            Err(SequencerError::InvalidTempo(0))
        ));
        assert_eq!(SequencerState::Idle, sequencer.status().state);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pads_are_skipped() {
        let trigger = FakeTrigger::new(&[2]);
        let sequencer = StepSequencer::new(trigger.clone());

        sequencer
            .play(&pattern("Gaps", 2, &[("0", &[0]), ("1", &[1])]), 120, false)
            .await
            .expect("play");
        sequencer.wait().await;

        assert_eq!(vec![(2, Duration::from_millis(125))], trigger.triggers());
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_run_replaces_the_old_one() {
        let trigger = FakeTrigger::new(&[1, 2]);
        let sequencer = StepSequencer::new(trigger.clone());
        let mut events = sequencer.subscribe();

        sequencer
            .play(&pattern("First", 4, &[("0", &[0, 1, 2, 3])]), 120, true)
            .await
            .expect("play first");
        tokio::time::sleep(Duration::from_millis(300)).await;
        sequencer
            .play(&pattern("Second", 2, &[("1", &[0])]), 120, false)
            .await
            .expect("play second");
        sequencer.wait().await;

        let boundaries: Vec<String> = drain(&mut events)
            .iter()
            .filter_map(|event| match event {
                SequenceEvent::Started(p) => Some(format!("started {}", p.pattern_name)),
                SequenceEvent::Finished(p) => Some(format!("finished {}", p.pattern_name)),
                SequenceEvent::Step(_) => None,
            })
            .collect();
        assert_eq!(
            vec![
                "started First",
                "finished First",
                "started Second",
                "finished Second"
            ],
            boundaries
        );
        assert_eq!(1, trigger.stops.load(Ordering::Relaxed));
        let first_pass: Vec<PadId> = trigger.triggers().iter().map(|(pad, _)| *pad).collect();
        assert_eq!(vec![1, 1, 1, 2], first_pass);
    }

    #[tokio::test]
    async fn empty_patterns_finish_immediately() {
        let trigger = FakeTrigger::new(&[1]);
        let sequencer = StepSequencer::new(trigger.clone());

        sequencer
            .play(&pattern("Empty", 0, &[]), 120, true)
            .await
            .expect("play");
        sequencer.wait().await;

        assert!(trigger.triggers().is_empty());
        assert_eq!(SequencerState::Stopped, sequencer.status().state);
    }

    #[tokio::test(start_paused = true)]
    async fn drives_the_engine() {
        let fixture = engine_fixture();
        let engine = Arc::new(fixture.engine.clone());
        let preset = engine.load_preset("1").await.expect("load");
        let basic = preset.beat_school().find(0, 1).expect("pattern").clone();

        let sequencer = StepSequencer::new(engine.clone());
        sequencer
            .play(&basic, preset.tempo(), false)
            .await
            .expect("play");
        sequencer.wait().await;

        let kick = fixture
            .device
            .players_for(&fixture.samples_dir().join("kick.wav"));
        let hat = fixture
            .device
            .players_for(&fixture.samples_dir().join("hat.wav"));
        assert_eq!(2, kick[0].play_count());
        assert_eq!(1, hat[0].play_count());
        assert!(engine.is_pad_playing(1).await);

        sequencer.stop().await;
        assert!(!engine.is_pad_playing(1).await);
    }
}
