//! Configuration for the gateway.
//!
//! Loaded once at startup from a YAML file and passed by reference into
//! the engine components; there is no hot-reload.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::pedal::PedalState;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// MIDI channel for all synthesized drum commands (0-based, default 9 = channel 10)
    #[serde(default = "default_channel")]
    pub channel: u8,

    #[serde(default)]
    pub pedal: PedalConfig,

    /// Static note remapping; notes not listed pass through unchanged
    #[serde(default = "default_remap")]
    pub remap: HashMap<u8, u8>,

    /// Notes whose output depends on pedal state instead of the static table
    #[serde(default = "default_dynamic")]
    pub dynamic: Option<DynamicConfig>,

    #[serde(default)]
    pub midi: MidiConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Mixer pre-flight; set to null to skip
    #[serde(default = "default_mixer")]
    pub mixer: Option<MixerConfig>,

    /// Device-local voice muting while the backend generates sound
    #[serde(default)]
    pub local_mute: LocalMuteConfig,
}

/// Hi-hat pedal evidence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PedalConfig {
    /// Continuous controller carrying pedal position
    #[serde(default = "default_pedal_controller")]
    pub controller: u8,

    /// CC value at or above this reads as Open, below as Closed
    #[serde(default = "default_pedal_threshold")]
    pub threshold: u8,

    /// State assumed before any evidence arrives
    #[serde(default = "default_pedal_state")]
    pub default_state: PedalState,

    /// Pedal chick note; always reads as Closed
    #[serde(default = "default_chick_note")]
    pub chick_note: Option<u8>,

    /// Raw closed-hat pad note, usable as Closed evidence
    #[serde(default = "default_closed_note")]
    pub closed_note: Option<u8>,

    /// Raw open-hat pad note, usable as Open evidence
    #[serde(default = "default_open_note")]
    pub open_note: Option<u8>,
}

/// Pedal-dependent note group
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicConfig {
    pub notes: Vec<u8>,
    pub open_target: u8,
    pub closed_target: u8,
}

/// MIDI device selection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiConfig {
    /// Name fragments identifying the drum controller (substring match)
    #[serde(default = "default_input_match")]
    pub input_match: Vec<String>,

    /// Name fragments for pseudo-ports to skip when falling back
    #[serde(default = "default_exclude_match")]
    pub exclude_match: Vec<String>,
}

/// Backend output mode
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Send remapped events back to the controller's own input
    Loopback,
    /// Spawn the synth as a daemon exposing a MIDI port
    Daemon,
    /// Spawn the synth with an interactive command shell on stdin
    Shell,
}

/// External synth backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default = "default_backend_mode")]
    pub mode: BackendMode,

    #[serde(default = "default_backend_command")]
    pub command: String,

    #[serde(default = "default_backend_args")]
    pub args: Vec<String>,

    /// Name fragments identifying the backend's MIDI port (daemon mode)
    #[serde(default = "default_port_match")]
    pub port_match: Vec<String>,

    /// Sound-bank candidates, checked in order; first existing wins
    #[serde(default = "default_soundfont_paths")]
    pub soundfont_paths: Vec<PathBuf>,

    /// Append the located sound bank as the final command argument.
    /// Disable for backends like timidity that load it themselves.
    #[serde(default = "default_pass_soundfont")]
    pub pass_soundfont: bool,

    /// Captured stdout/stderr of the backend, for post-mortem inspection
    #[serde(default = "default_backend_log")]
    pub log_path: PathBuf,

    /// Delay before the first liveness probe after spawn
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Port-appearance poll attempts after a daemon spawn
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Base backoff between port-appearance polls
    #[serde(default = "default_readiness_backoff_ms")]
    pub readiness_backoff_ms: u64,

    /// Bounded wait for graceful shutdown before forced kill
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,

    /// Bank/preset selected on the drum channel in shell mode
    #[serde(default = "default_select")]
    pub select: Option<SelectConfig>,
}

/// Bank program selection (shell mode)
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectConfig {
    pub bank: u16,
    pub preset: u8,
}

/// Audio mixer pre-flight
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixerConfig {
    #[serde(default = "default_mixer_controls")]
    pub controls: Vec<String>,
    #[serde(default = "default_mixer_level")]
    pub level: String,
}

/// Device-local voice muting via GM drum-level NRPN
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalMuteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Vec<u8>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check range invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.channel > 15 {
            bail!("channel must be 0-15, got {}", self.channel);
        }
        if self.pedal.controller > 127 {
            bail!("pedal controller must be 0-127, got {}", self.pedal.controller);
        }
        if self.pedal.threshold > 127 {
            bail!("pedal threshold must be 0-127, got {}", self.pedal.threshold);
        }
        // Parsed CC/note numbers are 7-bit; an out-of-range evidence
        // note could never match and would silently disable the source.
        for (name, note) in [
            ("chick_note", self.pedal.chick_note),
            ("closed_note", self.pedal.closed_note),
            ("open_note", self.pedal.open_note),
        ] {
            if let Some(note) = note {
                if note > 127 {
                    bail!("pedal {} must be 0-127, got {}", name, note);
                }
            }
        }
        for (from, to) in &self.remap {
            if *from > 127 || *to > 127 {
                bail!("remap entry {} -> {} out of note range 0-127", from, to);
            }
        }
        if let Some(dynamic) = &self.dynamic {
            if dynamic.open_target > 127 || dynamic.closed_target > 127 {
                bail!("dynamic targets must be in note range 0-127");
            }
            for note in &dynamic.notes {
                if *note > 127 {
                    bail!("dynamic group note {} out of note range 0-127", note);
                }
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Matches the built-in DD-70 "charleston/snare swap" setup.
        Self {
            channel: default_channel(),
            pedal: PedalConfig::default(),
            remap: default_remap(),
            dynamic: default_dynamic(),
            midi: MidiConfig::default(),
            backend: BackendConfig::default(),
            mixer: default_mixer(),
            local_mute: LocalMuteConfig::default(),
        }
    }
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            controller: default_pedal_controller(),
            threshold: default_pedal_threshold(),
            default_state: default_pedal_state(),
            chick_note: default_chick_note(),
            closed_note: default_closed_note(),
            open_note: default_open_note(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_match: default_input_match(),
            exclude_match: default_exclude_match(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: default_backend_mode(),
            command: default_backend_command(),
            args: default_backend_args(),
            port_match: default_port_match(),
            soundfont_paths: default_soundfont_paths(),
            pass_soundfont: default_pass_soundfont(),
            log_path: default_backend_log(),
            settle_ms: default_settle_ms(),
            readiness_attempts: default_readiness_attempts(),
            readiness_backoff_ms: default_readiness_backoff_ms(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            select: default_select(),
        }
    }
}

impl Default for LocalMuteConfig {
    fn default() -> Self {
        Self { enabled: false, notes: Vec::new() }
    }
}

// Default value functions
fn default_channel() -> u8 { 9 }
fn default_pedal_controller() -> u8 { 4 }
fn default_pedal_threshold() -> u8 { 64 }
fn default_pedal_state() -> PedalState { PedalState::Unknown }
fn default_chick_note() -> Option<u8> { Some(44) }
fn default_closed_note() -> Option<u8> { Some(42) }
fn default_open_note() -> Option<u8> { Some(46) }

fn default_remap() -> HashMap<u8, u8> {
    // Snare pads become hats and hats become the snare.
    HashMap::from([(38, 42), (40, 42), (42, 38), (46, 38)])
}

fn default_dynamic() -> Option<DynamicConfig> {
    Some(DynamicConfig {
        notes: vec![38, 40],
        open_target: 46,
        closed_target: 42,
    })
}

fn default_input_match() -> Vec<String> {
    vec!["e-drum".to_string(), "DD-70".to_string()]
}
fn default_exclude_match() -> Vec<String> {
    vec!["Through".to_string()]
}

fn default_backend_mode() -> BackendMode { BackendMode::Shell }
fn default_backend_command() -> String { "fluidsynth".to_string() }
fn default_backend_args() -> Vec<String> {
    [
        "-a", "alsa",
        "-g", "2.0",
        "-r", "48000",
        "-o", "audio.alsa.device=hw:0",
        "-o", "synth.polyphony=128",
        "-o", "synth.reverb.active=yes",
        "-o", "synth.chorus.active=no",
        // interactive shell on stdin, for the default shell mode
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_port_match() -> Vec<String> {
    vec!["FLUID".to_string(), "Synth".to_string()]
}
fn default_soundfont_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/share/sounds/sf2/FluidR3_GM.sf2"),
        PathBuf::from("/usr/share/soundfonts/FluidR3_GM.sf2"),
        PathBuf::from("/usr/share/sounds/sf2/default.sf2"),
    ]
}
fn default_pass_soundfont() -> bool { true }
fn default_backend_log() -> PathBuf { PathBuf::from("/tmp/fluidsynth.log") }
fn default_settle_ms() -> u64 { 2000 }
fn default_readiness_attempts() -> u32 { 20 }
fn default_readiness_backoff_ms() -> u64 { 250 }
fn default_graceful_timeout_ms() -> u64 { 5000 }
fn default_select() -> Option<SelectConfig> {
    Some(SelectConfig { bank: 128, preset: 0 })
}

fn default_mixer() -> Option<MixerConfig> {
    Some(MixerConfig {
        controls: default_mixer_controls(),
        level: default_mixer_level(),
    })
}
fn default_mixer_controls() -> Vec<String> {
    vec!["PCM".to_string(), "Headphone".to_string()]
}
fn default_mixer_level() -> String { "100%".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.channel, 9);
        assert_eq!(config.pedal.controller, 4);
        assert_eq!(config.pedal.threshold, 64);
        assert_eq!(config.pedal.default_state, PedalState::Unknown);
        assert_eq!(config.remap.get(&38), Some(&42));
        assert_eq!(config.remap.get(&46), Some(&38));
        assert!(!config.local_mute.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let config: AppConfig = serde_yaml::from_str("channel: 9\n").unwrap();
        assert_eq!(config.backend.mode, BackendMode::Shell);
        assert_eq!(config.backend.graceful_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
channel: 9
pedal:
  controller: 4
  threshold: 70
  default_state: closed
remap:
  38: 42
  42: 38
dynamic:
  notes: [38, 40]
  open_target: 46
  closed_target: 42
midi:
  input_match: ["e-drum"]
  exclude_match: ["Through"]
backend:
  mode: daemon
  command: timidity
  args: ["-iA"]
  port_match: ["TiMidity"]
  soundfont_paths: ["/tmp/x.sf2"]
mixer: null
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pedal.threshold, 70);
        assert_eq!(config.pedal.default_state, PedalState::Closed);
        assert_eq!(config.backend.mode, BackendMode::Daemon);
        assert_eq!(config.backend.command, "timidity");
        assert!(config.mixer.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = AppConfig::default();
        config.remap.insert(200, 42);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.channel = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_pedal_fields() {
        let mut config = AppConfig::default();
        config.pedal.controller = 200;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pedal.threshold = 128;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pedal.chick_note = Some(200);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pedal.open_note = Some(128);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "channel: 9\nbackend:\n  mode: loopback\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.backend.mode, BackendMode::Loopback);
    }
}
