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
    error::Error,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::json;

use crate::audio::mock;
use crate::catalog::DirectoryCatalog;
use crate::engine::PadEngine;

/// Wait for the given async predicate to return true or fail. Uses tokio's clock,
/// so it also works in paused-time tests.
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate().await {
            return;
        }
        tokio::time::sleep(tick).await;
    }
}

/// Writes a 32-bit WAV file. `samples` holds one vector per channel; they're
/// interleaved on write and truncated to the shortest channel.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let sample_format = if std::any::TypeId::of::<S>() == std::any::TypeId::of::<f32>() {
        SampleFormat::Float
    } else if std::any::TypeId::of::<S>() == std::any::TypeId::of::<i32>() {
        SampleFormat::Int
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format,
        },
    )?;

    let frames = samples.iter().map(Vec::len).min().unwrap_or(0);
    for frame in 0..frames {
        for channel in &samples {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Writes a mono, constant-valued float sample of the given length.
pub fn write_constant_sample(
    path: &Path,
    value: f32,
    duration: Duration,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    write_wav(path.to_path_buf(), vec![vec![value; frames]], sample_rate)
}

/// A pad definition for [`write_preset_manifest`]: pad id, sample filename and choke
/// group.
pub struct PadFixture<'a> {
    pub id: u32,
    pub filename: &'a str,
    pub choke: i32,
}

/// Writes a `drumpad-presets-<id>.json` manifest into `presets_dir`, with an
/// optional BeatSchool bank.
pub fn write_preset_manifest(
    presets_dir: &Path,
    id: &str,
    tempo: u32,
    pads: &[PadFixture<'_>],
    beat_school: serde_json::Value,
) -> Result<PathBuf, Box<dyn Error>> {
    let mut files = serde_json::Map::new();
    for pad in pads {
        files.insert(
            pad.id.to_string(),
            json!({
                "filename": pad.filename,
                "color": "red",
                "choke": pad.choke,
            }),
        );
    }

    let manifest = json!({
        "id": id,
        "name": format!("Preset {}", id),
        "tempo": tempo,
        "author": "tests",
        "tags": ["test"],
        "orderBy": "1",
        "files": files,
        "beatSchool": beat_school,
    });

    std::fs::create_dir_all(presets_dir)?;
    let path = presets_dir.join(format!("drumpad-presets-{}.json", id));
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    Ok(path)
}

/// An engine on a mock device, backed by a temporary preset library.
pub struct EngineFixture {
    pub dir: tempfile::TempDir,
    pub device: mock::Device,
    pub engine: PadEngine,
}

impl EngineFixture {
    pub fn samples_dir(&self) -> PathBuf {
        self.dir.path().join("samples")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.dir.path().join("recordings")
    }
}

/// Builds an engine whose library holds preset "1" at 120 BPM:
///
/// - pad 1: kick.wav, 500ms, choke group 1
/// - pad 2: snare.wav, 300ms, choke group 1
/// - pad 3: hat.wav, 200ms, no choke group
/// - pad 4: missing.wav, which doesn't exist
///
/// Its BeatSchool bank has one v0 pattern, "Basic" (id 1, 4 steps), with the kick
/// on steps 0 and 2 and the hat on step 1.
pub fn engine_fixture() -> EngineFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let samples = dir.path().join("samples");
    std::fs::create_dir_all(&samples).expect("samples dir");
    for (filename, millis) in [("kick.wav", 500), ("snare.wav", 300), ("hat.wav", 200)] {
        write_constant_sample(
            &samples.join(filename),
            0.25,
            Duration::from_millis(millis),
            mock::DEFAULT_SAMPLE_RATE,
        )
        .expect("write sample");
    }

    let presets = dir.path().join("presets");
    write_preset_manifest(
        &presets,
        "1",
        120,
        &[
            PadFixture { id: 1, filename: "kick.wav", choke: 1 },
            PadFixture { id: 2, filename: "snare.wav", choke: 1 },
            PadFixture { id: 3, filename: "hat.wav", choke: 0 },
            PadFixture { id: 4, filename: "missing.wav", choke: 0 },
        ],
        json!({
            "v0": [{
                "id": 1,
                "version": 0,
                "name": "Basic",
                "sequencerSize": 4,
                "pads": {
                    "0": [{"start": 0}, {"start": 2}],
                    "2": [{"start": 1}]
                }
            }]
        }),
    )
    .expect("write manifest");

    let device = mock::Device::get("mock-device");
    let engine = PadEngine::new(
        Arc::new(DirectoryCatalog::new(&presets, &samples)),
        Arc::new(device.clone()),
        &dir.path().join("recordings"),
    );
    EngineFixture {
        dir,
        device,
        engine,
    }
}
