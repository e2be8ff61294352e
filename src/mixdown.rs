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

//! Offline rendering of recorded pad triggers into a single stereo WAV file.
//!
//! Events are mixed additively at their offsets. There's no limiter: overlapping
//! hits can exceed full scale, and the float output keeps those values as they are.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, info, warn};

use crate::engine::TriggerEvent;
use crate::samples::{LoadedSample, SampleLoader};

/// Sample rate of rendered files.
pub const SAMPLE_RATE: u32 = 44100;

/// Channel count of rendered files.
pub const CHANNELS: u16 = 2;

/// Length of the file written when nothing was recorded.
const SILENT_DURATION: Duration = Duration::from_secs(1);

/// Renders never produce less audio than this.
const MIN_DURATION: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum MixdownError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// What a render produced.
#[derive(Clone, Debug)]
pub struct RenderSummary {
    /// The written file.
    pub path: PathBuf,
    /// Frames written per channel.
    pub frames: usize,
    /// Events mixed into the output.
    pub events_rendered: usize,
    /// Events skipped because their sample couldn't be decoded.
    pub events_skipped: usize,
}

impl RenderSummary {
    /// The playback length of the rendered file.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / SAMPLE_RATE as f64)
    }
}

/// Renders the events into a stereo float WAV file at `output`. An empty event list
/// produces one second of silence.
pub fn render(events: &[TriggerEvent], output: &Path) -> Result<RenderSummary, MixdownError> {
    if events.is_empty() {
        let frames = frames_for(SILENT_DURATION);
        write_buffer(output, &vec![0.0; frames * CHANNELS as usize])?;
        info!(path = ?output, "Nothing recorded, wrote silence");
        return Ok(RenderSummary {
            path: output.to_path_buf(),
            frames,
            events_rendered: 0,
            events_skipped: 0,
        });
    }

    let mut loader = SampleLoader::new(SAMPLE_RATE);
    let mut decoded: Vec<(&TriggerEvent, LoadedSample)> = Vec::with_capacity(events.len());
    let mut events_skipped = 0;
    for event in events {
        match loader.load(event.sample_path()) {
            Ok(sample) => decoded.push((event, sample)),
            Err(e) => {
                warn!(
                    path = ?event.sample_path(),
                    err = e.to_string(),
                    "Unable to decode recorded sample, skipping event"
                );
                events_skipped += 1;
            }
        }
    }

    let duration = decoded
        .iter()
        .map(|(event, sample)| event.offset() + sample.duration())
        .max()
        .unwrap_or(Duration::ZERO)
        .max(MIN_DURATION);
    let frames = frames_for(duration);
    let mut buffer = vec![0.0f32; frames * CHANNELS as usize];

    for (event, sample) in &decoded {
        let start_frame = (event.offset().as_secs_f64() * SAMPLE_RATE as f64).floor() as usize;
        mix_into(&mut buffer, frames, start_frame, sample, event.velocity());
    }

    write_buffer(output, &buffer)?;
    info!(
        path = ?output,
        events = decoded.len(),
        skipped = events_skipped,
        duration_ms = duration.as_millis(),
        "Rendered recording"
    );

    Ok(RenderSummary {
        path: output.to_path_buf(),
        frames,
        events_rendered: decoded.len(),
        events_skipped,
    })
}

fn frames_for(duration: Duration) -> usize {
    (duration.as_secs_f64() * SAMPLE_RATE as f64).ceil() as usize
}

/// Adds the sample into the interleaved stereo buffer starting at `start_frame`,
/// dropping whatever falls past the end.
fn mix_into(
    buffer: &mut [f32],
    frames: usize,
    start_frame: usize,
    sample: &LoadedSample,
    velocity: f32,
) {
    if start_frame >= frames {
        return;
    }
    let data = sample.data();
    let src_channels = sample.channel_count() as usize;
    let dst_channels = CHANNELS as usize;
    let count = sample.frames().min(frames - start_frame);

    for frame in 0..count {
        let src = frame * src_channels;
        let dst = (start_frame + frame) * dst_channels;
        for channel in 0..dst_channels {
            buffer[dst + channel] += data[src + channel.min(src_channels - 1)] * velocity;
        }
    }
    debug!(path = ?sample.path(), start_frame, frames = count, "Mixed event");
}

fn write_buffer(output: &Path, buffer: &[f32]) -> Result<(), MixdownError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(
        output,
        WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for sample in buffer {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_constant_sample;

    fn read_frames(path: &Path) -> (WavSpec, Vec<f32>) {
        let mut reader = hound::WavReader::open(path).expect("open wav");
        let samples = reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .expect("read samples");
        (reader.spec(), samples)
    }

    fn at(samples: &[f32], seconds: f64, channel: usize) -> f32 {
        let frame = (seconds * SAMPLE_RATE as f64) as usize;
        samples[frame * CHANNELS as usize + channel]
    }

    #[test]
    fn empty_recording_is_one_second_of_silence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("silence.wav");

        let summary = render(&[], &output).expect("render");

        assert_eq!(44100, summary.frames);
        let (spec, samples) = read_frames(&output);
        assert_eq!(2, spec.channels);
        assert_eq!(44100, spec.sample_rate);
        assert_eq!(44100 * 2, samples.len());
        assert!(samples.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn overlapping_events_are_summed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_constant_sample(&a, 0.25, Duration::from_millis(500), 44100).expect("a");
        write_constant_sample(&b, 0.5, Duration::from_millis(400), 44100).expect("b");
        let output = dir.path().join("out").join("mix.wav");

        let events = vec![
            TriggerEvent::new(Duration::ZERO, a),
            TriggerEvent::new(Duration::from_millis(300), b),
        ];
        let summary = render(&events, &output).expect("render");

        assert_eq!(2, summary.events_rendered);
        assert!(summary.duration() >= Duration::from_millis(699));
        let (_, samples) = read_frames(&output);
        assert!(samples.len() / 2 >= 30869);
        for channel in 0..2 {
            assert!((at(&samples, 0.1, channel) - 0.25).abs() < 1e-6);
            assert!((at(&samples, 0.4, channel) - 0.75).abs() < 1e-6);
            assert!((at(&samples, 0.6, channel) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn undecodable_events_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.wav");
        write_constant_sample(&a, 0.25, Duration::from_millis(200), 44100).expect("a");
        let broken = dir.path().join("broken.wav");
        fs::write(&broken, b"not audio").expect("write");
        let output = dir.path().join("mix.wav");

        let events = vec![
            TriggerEvent::new(Duration::ZERO, broken),
            TriggerEvent::new(Duration::from_millis(50), a),
            TriggerEvent::new(Duration::ZERO, dir.path().join("missing.wav")),
        ];
        let summary = render(&events, &output).expect("render");

        assert_eq!(1, summary.events_rendered);
        assert_eq!(2, summary.events_skipped);
        let (_, samples) = read_frames(&output);
        assert_eq!(0.0, at(&samples, 0.01, 0));
        assert!((at(&samples, 0.1, 1) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn short_renders_are_padded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.wav");
        write_constant_sample(&a, 0.25, Duration::from_millis(10), 44100).expect("a");
        let output = dir.path().join("mix.wav");

        let summary = render(&[TriggerEvent::new(Duration::ZERO, a)], &output).expect("render");

        assert!((4410..=4411).contains(&summary.frames));
    }
}
