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
// Voice mixing shared by the cpal output stream and tests.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::audio::PadPlayer;
use crate::samples::LoadedSample;

/// Playback state of one sample, shared between its player and the mixer.
pub struct Voice {
    sample: LoadedSample,
    /// Next frame to mix.
    position: AtomicUsize,
    playing: AtomicBool,
}

impl Voice {
    fn new(sample: LoadedSample) -> Voice {
        Voice {
            sample,
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
        }
    }

    fn frames(&self) -> usize {
        self.sample.frames()
    }
}

/// A player whose audio is rendered by an [`AudioMixer`].
pub struct MixerPlayer {
    voice: Arc<Voice>,
    voice_tx: crossbeam_channel::Sender<Arc<Voice>>,
}

impl MixerPlayer {
    /// Creates a stopped player that hands its voice to the mixer on play.
    pub fn new(sample: LoadedSample, voice_tx: crossbeam_channel::Sender<Arc<Voice>>) -> Self {
        MixerPlayer {
            voice: Arc::new(Voice::new(sample)),
            voice_tx,
        }
    }
}

impl PadPlayer for MixerPlayer {
    fn play(&self) {
        if self.voice.position.load(Ordering::Acquire) >= self.voice.frames() {
            self.voice.position.store(0, Ordering::Release);
        }
        if self.voice.playing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.voice_tx.send(self.voice.clone()) {
            self.voice.playing.store(false, Ordering::Release);
            error!(
                err = e.to_string(),
                path = ?self.voice.sample.path(),
                "Audio output is gone, unable to play"
            );
        }
    }

    fn stop(&self) {
        self.voice.playing.store(false, Ordering::Release);
    }

    fn seek(&self, position: Duration) {
        let frame = (position.as_secs_f64() * self.voice.sample.sample_rate() as f64).round();
        let frame = (frame as usize).min(self.voice.frames());
        self.voice.position.store(frame, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.voice.playing.load(Ordering::Acquire)
    }

    fn current_time(&self) -> Duration {
        let sample_rate = self.voice.sample.sample_rate();
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        let position = self.voice.position.load(Ordering::Acquire);
        Duration::from_secs_f64(position as f64 / sample_rate as f64)
    }

    fn duration(&self) -> Duration {
        self.voice.sample.duration()
    }
}

/// Mixes every playing voice additively into interleaved output buffers.
pub struct AudioMixer {
    voices: Vec<Arc<Voice>>,
    voice_rx: crossbeam_channel::Receiver<Arc<Voice>>,
    num_channels: u16,
}

impl AudioMixer {
    /// Creates a new mixer along with the sender players use to reach it.
    pub fn new(num_channels: u16) -> (AudioMixer, crossbeam_channel::Sender<Arc<Voice>>) {
        let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
        (
            AudioMixer {
                voices: Vec::new(),
                voice_rx,
                num_channels: num_channels.max(1),
            },
            voice_tx,
        )
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Number of voices the mixer is currently rendering.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fills the interleaved output buffer with the next block of audio.
    pub fn process(&mut self, output: &mut [f32]) {
        while let Ok(voice) = self.voice_rx.try_recv() {
            // A voice stopped and restarted before the last block is still listed.
            if !self.voices.iter().any(|active| Arc::ptr_eq(active, &voice)) {
                self.voices.push(voice);
            }
        }

        output.fill(0.0);
        let out_channels = self.num_channels as usize;
        let frames = output.len() / out_channels;
        self.voices
            .retain(|voice| mix_voice(voice, output, out_channels, frames));

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Mixes one voice into the output. Returns false once the voice is done.
fn mix_voice(voice: &Voice, output: &mut [f32], out_channels: usize, frames: usize) -> bool {
    if !voice.playing.load(Ordering::Acquire) {
        return false;
    }

    let data = voice.sample.data();
    let src_channels = voice.sample.channel_count() as usize;
    let total = voice.frames();
    let start = voice.position.load(Ordering::Acquire);
    if start >= total {
        voice.playing.store(false, Ordering::Release);
        return false;
    }

    let count = frames.min(total - start);
    for frame in 0..count {
        let src = (start + frame) * src_channels;
        let dst = frame * out_channels;
        for channel in 0..out_channels {
            // Mono sources fan out to every output channel.
            output[dst + channel] += data[src + channel.min(src_channels - 1)];
        }
    }

    // A concurrent seek wins over the mixer's advance.
    let end = start + count;
    let _ = voice
        .position
        .compare_exchange(start, end, Ordering::AcqRel, Ordering::Acquire);
    if voice.position.load(Ordering::Acquire) >= total {
        voice.playing.store(false, Ordering::Release);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn sample(data: Vec<f32>, channels: u16) -> LoadedSample {
        LoadedSample::from_samples(PathBuf::from("test.wav"), data, channels, 10)
    }

    #[test]
    fn mono_fans_out_to_stereo() {
        let (mut mixer, voice_tx) = AudioMixer::new(2);
        let player = MixerPlayer::new(sample(vec![0.1, 0.2, 0.3], 1), voice_tx);
        player.play();

        let mut output = vec![0.0; 8];
        mixer.process(&mut output);

        assert_eq!(vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0], output);
        assert!(!player.is_playing());
        assert_eq!(0, mixer.active_voices());
    }

    #[test]
    fn voices_mix_additively_and_clip() {
        let (mut mixer, voice_tx) = AudioMixer::new(1);
        let a = MixerPlayer::new(sample(vec![0.25, 0.75], 1), voice_tx.clone());
        let b = MixerPlayer::new(sample(vec![0.5, 0.5], 1), voice_tx);
        a.play();
        b.play();

        let mut output = vec![0.0; 2];
        mixer.process(&mut output);

        assert_eq!(vec![0.75, 1.0], output);
    }

    #[test]
    fn stop_and_seek() {
        let (mut mixer, voice_tx) = AudioMixer::new(1);
        let player = MixerPlayer::new(sample(vec![0.5; 20], 1), voice_tx);
        assert_eq!(Duration::from_secs(2), player.duration());

        player.play();
        let mut output = vec![0.0; 5];
        mixer.process(&mut output);
        assert!(player.is_playing());
        assert_eq!(Duration::from_millis(500), player.current_time());

        player.stop();
        mixer.process(&mut output);
        assert_eq!(vec![0.0; 5], output);
        assert_eq!(0, mixer.active_voices());
        assert_eq!(Duration::from_millis(500), player.current_time());

        player.seek(Duration::ZERO);
        player.play();
        player.play();
        mixer.process(&mut output);
        assert_eq!(1, mixer.active_voices());
        assert_eq!(Duration::from_millis(500), player.current_time());

        player.seek(Duration::from_secs(10));
        assert_eq!(Duration::from_secs(2), player.current_time());
    }

    #[test]
    fn restart_before_next_block_is_not_doubled() {
        let (mut mixer, voice_tx) = AudioMixer::new(1);
        let player = MixerPlayer::new(sample(vec![0.5; 20], 1), voice_tx);
        player.play();
        let mut output = vec![0.0; 2];
        mixer.process(&mut output);

        player.stop();
        player.seek(Duration::ZERO);
        player.play();
        mixer.process(&mut output);

        assert_eq!(1, mixer.active_voices());
        assert_eq!(vec![0.5, 0.5], output);
    }
}
