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

//! Resolves preset ids into presets bound to sample files on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::preset::{BeatSchool, ChokeGroup, DrumPad, PadId, Preset, Sample};

const MANIFEST_PREFIX: &str = "drumpad-presets-";
const MANIFEST_EXTENSION: &str = "json";
const DEFAULT_TEMPO: u32 = 120;

/// Errors raised while resolving a preset.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("preset {id} not found at {}", path.display())]
    NotFound { id: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse preset manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolves preset ids into presets.
pub trait Catalog: Send + Sync {
    /// Loads the preset with the given id. Pads whose samples can't be found are
    /// skipped; only an unreadable or unparseable manifest fails the load.
    fn load(&self, id: &str) -> Result<Preset, CatalogError>;
}

/// A sample entry of a preset manifest.
#[derive(Deserialize)]
struct FileEntry {
    filename: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    choke: ChokeGroup,
}

/// The JSON representation of a preset.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    name: String,
    #[serde(default = "default_tempo")]
    tempo: u32,
    #[serde(default)]
    author: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    order_by: Option<serde_json::Value>,
    files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    beat_school: BeatSchool,
}

fn default_tempo() -> u32 {
    DEFAULT_TEMPO
}

/// Loads `drumpad-presets-<id>.json` manifests from a directory. Sample filenames
/// resolve against a separate samples directory.
#[derive(Clone, Debug)]
pub struct DirectoryCatalog {
    presets_dir: PathBuf,
    samples_dir: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(presets_dir: &Path, samples_dir: &Path) -> DirectoryCatalog {
        DirectoryCatalog {
            presets_dir: presets_dir.to_path_buf(),
            samples_dir: samples_dir.to_path_buf(),
        }
    }

    /// The manifest path for the given preset id.
    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.presets_dir
            .join(format!("{}{}.{}", MANIFEST_PREFIX, id, MANIFEST_EXTENSION))
    }

    /// Lists the ids of every preset in the catalog, sorted.
    pub fn list_ids(&self) -> Result<Vec<String>, CatalogError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.presets_dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == MANIFEST_EXTENSION) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix(MANIFEST_PREFIX));
            if let Some(id) = id {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn parse(&self, id: &str, manifest: Manifest) -> Preset {
        let mut pads = Vec::with_capacity(manifest.files.len());
        for (key, file) in manifest.files {
            let Ok(pad_id) = key.parse::<PadId>() else {
                debug!(preset = id, key, "Skipping non-numeric pad key");
                continue;
            };

            let path = self.samples_dir.join(&file.filename);
            if !path.is_file() {
                warn!(
                    preset = id,
                    pad = pad_id,
                    path = ?path,
                    "Sample not found, skipping pad"
                );
                continue;
            }

            let name = Path::new(&file.filename)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&file.filename)
                .to_string();
            let sample = Sample::new(
                pad_id,
                &file.filename,
                &name,
                path,
                &file.color,
                file.choke,
            );
            pads.push(DrumPad::new(pad_id, sample, &file.color, file.choke));
        }

        let mut beat_school = manifest.beat_school;
        for pattern in beat_school.patterns_mut() {
            pattern.retain_valid_notes();
        }

        let order_by = match manifest.order_by {
            Some(serde_json::Value::String(order_by)) => order_by,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        Preset::new(id, &manifest.name, manifest.tempo, pads, beat_school).with_metadata(
            &manifest.author,
            manifest.tags,
            &order_by,
        )
    }
}

impl Catalog for DirectoryCatalog {
    fn load(&self, id: &str) -> Result<Preset, CatalogError> {
        let path = self.manifest_path(id);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound {
                    id: id.to_string(),
                    path,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest = serde_json::from_slice(&contents)?;
        let preset = self.parse(id, manifest);
        info!(
            preset = id,
            name = preset.name(),
            pads = preset.pads().len(),
            patterns = preset.beat_school().len(),
            "Loaded preset"
        );
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::testutil::{write_constant_sample, write_preset_manifest, PadFixture};

    fn catalog_with_samples(filenames: &[&str]) -> (tempfile::TempDir, DirectoryCatalog) {
        let dir = tempfile::tempdir().expect("tempdir");
        let samples = dir.path().join("samples");
        fs::create_dir_all(&samples).expect("samples dir");
        for filename in filenames {
            write_constant_sample(
                &samples.join(filename),
                0.5,
                Duration::from_millis(100),
                44100,
            )
            .expect("write sample");
        }
        let catalog = DirectoryCatalog::new(&dir.path().join("presets"), &samples);
        (dir, catalog)
    }

    #[test]
    fn load_resolves_pads() {
        let (dir, catalog) = catalog_with_samples(&["kick.wav", "snare.wav"]);
        write_preset_manifest(
            &dir.path().join("presets"),
            "550",
            95,
            &[
                PadFixture { id: 2, filename: "snare.wav", choke: 0 },
                PadFixture { id: 1, filename: "kick.wav", choke: 1 },
            ],
            json!({}),
        )
        .expect("manifest");

        let preset = catalog.load("550").expect("load");

        assert_eq!("550", preset.id());
        assert_eq!(95, preset.tempo());
        assert_eq!("tests", preset.author());
        assert_eq!(2, preset.pads().len());
        let kick = preset.pad(1).expect("pad 1");
        assert_eq!("kick", kick.sample().name());
        assert_eq!(1, kick.choke_group());
        assert_eq!(
            dir.path().join("samples").join("kick.wav"),
            kick.sample().path()
        );
    }

    #[test]
    fn missing_sample_skips_pad() {
        let (dir, catalog) = catalog_with_samples(&["kick.wav", "snare.wav"]);
        write_preset_manifest(
            &dir.path().join("presets"),
            "7",
            120,
            &[
                PadFixture { id: 1, filename: "kick.wav", choke: 0 },
                PadFixture { id: 2, filename: "snare.wav", choke: 0 },
                PadFixture { id: 3, filename: "missing.wav", choke: 0 },
            ],
            json!({}),
        )
        .expect("manifest");

        let preset = catalog.load("7").expect("load");

        let ids: Vec<PadId> = preset.pads().iter().map(|pad| pad.id()).collect();
        assert_eq!(vec![1, 2], ids);
    }

    #[test]
    fn beat_school_notes_are_bounded() {
        let (dir, catalog) = catalog_with_samples(&["kick.wav"]);
        write_preset_manifest(
            &dir.path().join("presets"),
            "9",
            120,
            &[PadFixture { id: 1, filename: "kick.wav", choke: 0 }],
            json!({
                "v0": [{
                    "id": 1,
                    "version": 0,
                    "name": "Four",
                    "sequencerSize": 4,
                    "pads": {"0": [{"start": 0}, {"start": 2}, {"start": 4}]}
                }]
            }),
        )
        .expect("manifest");

        let preset = catalog.load("9").expect("load");

        let pattern = preset.beat_school().find(0, 1).expect("pattern");
        assert_eq!(&[0, 2], pattern.pad_sequences()[0].steps());
        assert!(preset.beat_school().patterns(1).is_empty());
    }

    #[test]
    fn missing_and_broken_manifests() {
        let (dir, catalog) = catalog_with_samples(&[]);
        assert!(matches!(
            catalog.load("nope"),
            Err(CatalogError::NotFound { .. })
        ));

        let presets = dir.path().join("presets");
        fs::create_dir_all(&presets).expect("presets dir");
        fs::write(catalog.manifest_path("bad"), "{ not json").expect("write");
        assert!(matches!(catalog.load("bad"), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn list_ids_sorted() {
        let (dir, catalog) = catalog_with_samples(&[]);
        let presets = dir.path().join("presets");
        for id in ["b", "a", "10"] {
            write_preset_manifest(&presets, id, 120, &[], json!({})).expect("manifest");
        }
        fs::write(presets.join("notes.txt"), "ignored").expect("write");

        assert_eq!(vec!["10", "a", "b"], catalog.list_ids().expect("list"));
    }
}
