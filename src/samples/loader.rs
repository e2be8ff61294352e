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
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::audio::sample_source::{decode_file, SampleSourceError};

/// A decoded sample. The data is shared, so clones are cheap.
#[derive(Clone)]
pub struct LoadedSample {
    /// The file the sample was decoded from.
    path: PathBuf,
    /// Interleaved f32 samples.
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    /// Creates a sample from already decoded interleaved data.
    pub fn from_samples(
        path: PathBuf,
        data: Vec<f32>,
        channel_count: u16,
        sample_rate: u32,
    ) -> LoadedSample {
        LoadedSample {
            path,
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The interleaved sample data.
    pub fn data(&self) -> &Arc<Vec<f32>> {
        &self.data
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// The playback length of the sample.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("path", &self.path)
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Decodes sample files and caches them by path.
pub struct SampleLoader {
    /// Cache of loaded samples by file path.
    cache: HashMap<PathBuf, LoadedSample>,
    /// Every loaded sample is converted to this rate.
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            cache: HashMap::new(),
            target_sample_rate,
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Loads a sample from a file into memory, converted to the target sample rate.
    /// Returns the cached copy if the file was loaded before.
    pub fn load(&mut self, path: &Path) -> Result<LoadedSample, SampleSourceError> {
        if let Some(sample) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        let decoded = decode_file(path)?;
        let samples = if decoded.sample_rate != self.target_sample_rate {
            debug!(
                path = ?path,
                source_rate = decoded.sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(
                &decoded.samples,
                decoded.channels,
                decoded.sample_rate,
                self.target_sample_rate,
            )?
        } else {
            decoded.samples
        };

        let loaded = LoadedSample::from_samples(
            path.to_path_buf(),
            samples,
            decoded.channels,
            self.target_sample_rate,
        );

        info!(
            path = ?path,
            channels = loaded.channel_count,
            sample_rate = loaded.sample_rate,
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );

        self.cache.insert(path.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Returns true if the given file is cached.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache.contains_key(path)
    }

    /// Drops every cached sample.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|s| s.memory_size()).sum()
    }
}

impl fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cache.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Resamples interleaved audio by interpolating between neighbouring frames. Output
/// past the last source frame holds that frame.
pub(crate) fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, SampleSourceError> {
    if source_rate == 0 || target_rate == 0 || channel_count == 0 {
        return Err(SampleSourceError::ResamplingFailed(source_rate, target_rate));
    }

    let channels = channel_count as usize;
    let frame = |index: usize| samples.get(index * channels..(index + 1) * channels);
    let source_frames = samples.len() / channels;
    let Some(last) = source_frames.checked_sub(1).and_then(frame) else {
        return Ok(Vec::new());
    };

    let step = source_rate as f64 / target_rate as f64;
    let frames = (source_frames as f64 * target_rate as f64 / source_rate as f64).ceil() as usize;
    let mut resampled = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        let position = n as f64 * step;
        let index = position as usize;
        let weight = (position - index as f64) as f32;
        let current = frame(index).unwrap_or(last);
        let next = frame(index + 1).unwrap_or(current);
        resampled.extend(
            current
                .iter()
                .zip(next)
                .map(|(from, to)| from + (to - from) * weight),
        );
    }

    Ok(resampled)
}
