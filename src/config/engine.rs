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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;

use super::error::ConfigError;
use super::instrument::InstrumentDefinition;
use super::parse_duration;
use crate::notes::DEFAULT_SEARCH_BOUND;
use crate::samples::SamplerOptions;

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_LIBRARY: &str = "./samples";
const DEFAULT_FADE: Duration = Duration::from_millis(100);
const DEFAULT_VOICE_FADE_IN: Duration = Duration::from_millis(5);
const DEFAULT_VOICE_FADE_OUT: Duration = Duration::from_millis(50);
const DEFAULT_MAX_VOICES: u32 = 64;

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// Sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Output channel count (default: 2).
    channels: Option<u16>,

    /// Directory holding the sample library (default: ./samples).
    library: Option<String>,

    /// Fade window used when stages start and stop (default: 100ms).
    fade: Option<String>,

    /// Fade-in applied to every sampler voice (default: 5ms).
    voice_fade_in: Option<String>,

    /// Fade-out applied at the natural end of every sampler voice (default: 50ms).
    voice_fade_out: Option<String>,

    /// How far, in semitones, a sampler searches for the nearest sample (default: 96).
    search_bound: Option<u32>,

    /// Per-sampler polyphony limit (default: 64).
    max_voices: Option<u32>,

    /// Virtual instruments that can be prerendered.
    #[serde(default)]
    instruments: Vec<InstrumentDefinition>,
}

impl EngineConfig {
    /// Parse the engine configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn library(&self) -> PathBuf {
        PathBuf::from(self.library.as_deref().unwrap_or(DEFAULT_LIBRARY))
    }

    /// Returns the stage fade window.
    pub fn fade(&self) -> Result<Duration, ConfigError> {
        optional_duration(&self.fade, DEFAULT_FADE)
    }

    pub fn voice_fade_in(&self) -> Result<Duration, ConfigError> {
        optional_duration(&self.voice_fade_in, DEFAULT_VOICE_FADE_IN)
    }

    pub fn voice_fade_out(&self) -> Result<Duration, ConfigError> {
        optional_duration(&self.voice_fade_out, DEFAULT_VOICE_FADE_OUT)
    }

    pub fn search_bound(&self) -> u32 {
        self.search_bound.unwrap_or(DEFAULT_SEARCH_BOUND)
    }

    pub fn max_voices(&self) -> u32 {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES)
    }

    /// Sampler settings derived from this configuration.
    pub fn sampler_options(&self) -> Result<SamplerOptions, ConfigError> {
        Ok(SamplerOptions {
            fade_in: self.voice_fade_in()?.as_secs_f64(),
            fade_out: self.voice_fade_out()?.as_secs_f64(),
            search_bound: self.search_bound(),
            max_voices: self.max_voices(),
        })
    }

    pub fn instruments(&self) -> &[InstrumentDefinition] {
        &self.instruments
    }

    /// Looks up a virtual instrument by name.
    pub fn instrument(&self, name: &str) -> Result<&InstrumentDefinition, ConfigError> {
        self.instruments
            .iter()
            .find(|instrument| instrument.name() == name)
            .ok_or_else(|| ConfigError::UnknownInstrument(name.to_string()))
    }
}

fn optional_duration(value: &Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => parse_duration(value),
        None => Ok(default),
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use config::FileFormat;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.library(), PathBuf::from("./samples"));
        assert_eq!(config.fade().unwrap(), Duration::from_millis(100));
        assert_eq!(config.search_bound(), 96);

        let options = config.sampler_options().unwrap();
        assert!((options.fade_in - 0.005).abs() < 1e-9);
        assert!((options.fade_out - 0.05).abs() < 1e-9);
        assert_eq!(options.max_voices, 64);
    }

    #[test]
    fn test_parse_engine() {
        let yaml = r#"
            sample_rate: 48000
            channels: 1
            library: /var/lib/ambience
            fade: 250ms
            voice_fade_out: 1s
            search_bound: 24
            instruments:
              - name: piano-verb
                source: piano
                tail: 2s
                effects:
                  - type: gain
                    gain: 0.5
              - name: harp-dry
                source: harp
        "#;

        let config: EngineConfig = Config::builder()
            .add_source(config::File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.channels(), 1);
        assert_eq!(config.library(), PathBuf::from("/var/lib/ambience"));
        assert_eq!(config.fade().unwrap(), Duration::from_millis(250));
        assert_eq!(config.voice_fade_in().unwrap(), Duration::from_millis(5));
        assert_eq!(config.voice_fade_out().unwrap(), Duration::from_secs(1));
        assert_eq!(config.search_bound(), 24);
        assert_eq!(config.instruments().len(), 2);
        assert_eq!(config.instrument("harp-dry").unwrap().source(), "harp");
        assert!(matches!(
            config.instrument("organ"),
            Err(ConfigError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_deserialize_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "sample_rate: 22050\nfade: 1s").unwrap();

        let config = EngineConfig::deserialize(file.path()).unwrap();
        assert_eq!(config.sample_rate(), 22050);
        assert_eq!(config.fade().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::deserialize(Path::new("/nonexistent/ambience.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_bad_duration() {
        let config: EngineConfig = Config::builder()
            .add_source(config::File::from_str("fade: sometime", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!(matches!(
            config.fade(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
