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

//! Engine configuration.
//!
//! Configuration is a YAML file such as:
//!
//! ```yaml
//! audio:
//!   device: default
//!   sample_rate: 48000
//! presets: presets
//! samples: samples
//! recordings: recordings
//! ```
//!
//! Any value can be overridden from the environment, e.g. `DRUMPAD__AUDIO__DEVICE=mock`.
//! Relative directories resolve against the directory holding the config file.
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::debug;

pub mod audio;
pub mod error;

pub use audio::Audio;
pub use error::ConfigError;

use crate::catalog::DirectoryCatalog;

const DEFAULT_PRESETS_DIR: &str = "presets";
const DEFAULT_SAMPLES_DIR: &str = "samples";
const DEFAULT_RECORDINGS_DIR: &str = "recordings";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "DRUMPAD";

/// The configuration of a pad engine.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// The audio output.
    #[serde(default)]
    audio: Audio,

    /// Directory holding preset manifests.
    presets: Option<PathBuf>,

    /// Directory holding sample files.
    samples: Option<PathBuf>,

    /// Directory recordings are written to.
    recordings: Option<PathBuf>,

    /// Relative paths are resolved against this directory.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl EngineConfig {
    /// Creates a configuration rooted at the given directory with default settings.
    pub fn new(audio: Audio, base_dir: &Path) -> EngineConfig {
        EngineConfig {
            audio,
            presets: None,
            samples: None,
            recordings: None,
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Loads the configuration from a YAML file, applying environment overrides.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut config: EngineConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.base_dir = base_dir;
        debug!(path = ?path, config = ?config, "Loaded configuration");
        Ok(config)
    }

    /// Parses the configuration from YAML text.
    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<EngineConfig, ConfigError> {
        let mut config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// The directory holding preset manifests.
    pub fn presets_dir(&self) -> PathBuf {
        self.resolve(self.presets.as_deref(), DEFAULT_PRESETS_DIR)
    }

    /// The directory holding sample files.
    pub fn samples_dir(&self) -> PathBuf {
        self.resolve(self.samples.as_deref(), DEFAULT_SAMPLES_DIR)
    }

    /// The directory recordings are written to.
    pub fn recordings_dir(&self) -> PathBuf {
        self.resolve(self.recordings.as_deref(), DEFAULT_RECORDINGS_DIR)
    }

    /// A catalog over the configured preset and sample directories.
    pub fn catalog(&self) -> DirectoryCatalog {
        DirectoryCatalog::new(&self.presets_dir(), &self.samples_dir())
    }

    fn resolve(&self, path: Option<&Path>, default: &str) -> PathBuf {
        let path = path.unwrap_or(Path::new(default));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::from_yaml("{}", Path::new("/etc/drumpad")).expect("parse");

        assert_eq!("default", config.audio().device());
        assert_eq!(None, config.audio().sample_rate());
        assert_eq!(PathBuf::from("/etc/drumpad/presets"), config.presets_dir());
        assert_eq!(PathBuf::from("/etc/drumpad/samples"), config.samples_dir());
        assert_eq!(
            PathBuf::from("/etc/drumpad/recordings"),
            config.recordings_dir()
        );
    }

    #[test]
    fn explicit_values() {
        let yaml = r#"
            audio:
              device: mock-output
              sample_rate: 48000
              buffer_size: 256
            presets: kits
            samples: /data/samples
        "#;
        let config = EngineConfig::from_yaml(yaml, Path::new("/home/user")).expect("parse");

        assert_eq!("mock-output", config.audio().device());
        assert_eq!(Some(48000), config.audio().sample_rate());
        assert_eq!(Some(256), config.audio().buffer_size());
        assert_eq!(PathBuf::from("/home/user/kits"), config.presets_dir());
        assert_eq!(PathBuf::from("/data/samples"), config.samples_dir());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drumpad.yaml");
        std::fs::write(&path, "audio:\n  device: mock\nrecordings: out\n").expect("write");

        let config = EngineConfig::load(&path).expect("load");

        assert_eq!("mock", config.audio().device());
        assert_eq!(dir.path().join("out"), config.recordings_dir());
    }

    #[test]
    fn invalid_yaml() {
        let result = EngineConfig::from_yaml("audio: [1, 2", Path::new("/"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
