//! Layered configuration: built-in defaults, then an optional JSON file, then
//! command-line flags.

use crate::error::{CliError, CliResult};
use clap::Args;
use hushtone_core::{CodecConfig, ListenConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Codec settings readable from a JSON file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub freq_0: Option<f32>,
    pub freq_1: Option<f32>,
    pub sample_rate: Option<u32>,
    pub bit_duration: Option<f32>,
    pub amplitude: Option<f32>,
    pub detection_threshold: Option<f32>,
    pub error_tolerance: Option<f32>,
    pub sync_threshold: Option<f32>,
    pub min_power_ratio: Option<f32>,
    pub guard_band_hz: Option<f32>,
    pub low_power_run: Option<usize>,
    pub max_payload_bytes: Option<usize>,
    pub obfuscate: Option<bool>,
    #[serde(default)]
    pub listen: ListenFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenFileConfig {
    pub window_secs: Option<f32>,
    pub poll_interval_ms: Option<u64>,
    pub min_fill_ratio: Option<f32>,
    pub block_size: Option<usize>,
    pub event_capacity: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
        Self::parse(&text).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Codec overrides shared by every subcommand
#[derive(Debug, Default, Args)]
pub struct CodecArgs {
    /// Tone for bit 0 (Hz)
    #[arg(long = "freq0", global = true)]
    pub freq_0: Option<f32>,

    /// Tone for bit 1 (Hz)
    #[arg(long = "freq1", global = true)]
    pub freq_1: Option<f32>,

    /// Sample rate of generated audio (Hz)
    #[arg(long, global = true)]
    pub sample_rate: Option<u32>,

    /// Seconds per bit
    #[arg(long, global = true)]
    pub bit_duration: Option<f32>,

    /// Tone amplitude in (0, 1]
    #[arg(long, global = true)]
    pub amplitude: Option<f32>,

    /// Minimum in-band strength for a signal to count as present
    #[arg(long, global = true)]
    pub threshold: Option<f32>,

    /// Largest accepted fraction of parity mismatches
    #[arg(long, global = true)]
    pub tolerance: Option<f32>,

    /// Send the bare encrypted payload without length padding
    #[arg(long, global = true)]
    pub no_obfuscate: bool,
}

/// Defaults, overlaid by the file, overlaid by flags.
pub fn codec_config(file: &FileConfig, args: &CodecArgs) -> CodecConfig {
    let mut config = CodecConfig::default();

    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = file.$field {
                config.$field = value;
            })*
        };
    }
    overlay!(
        freq_0,
        freq_1,
        sample_rate,
        bit_duration,
        amplitude,
        detection_threshold,
        error_tolerance,
        sync_threshold,
        min_power_ratio,
        guard_band_hz,
        low_power_run,
        max_payload_bytes,
        obfuscate,
    );

    if let Some(freq_0) = args.freq_0 {
        config.freq_0 = freq_0;
    }
    if let Some(freq_1) = args.freq_1 {
        config.freq_1 = freq_1;
    }
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(duration) = args.bit_duration {
        config.bit_duration = duration;
    }
    if let Some(amplitude) = args.amplitude {
        config.amplitude = amplitude;
    }
    if let Some(threshold) = args.threshold {
        config.detection_threshold = threshold;
    }
    if let Some(tolerance) = args.tolerance {
        config.error_tolerance = tolerance;
    }
    if args.no_obfuscate {
        config.obfuscate = false;
    }

    config
}

pub fn listen_config(file: &FileConfig) -> ListenConfig {
    let mut config = ListenConfig::default();
    let listen = &file.listen;
    if let Some(window) = listen.window_secs {
        config.window_secs = window;
    }
    if let Some(ms) = listen.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ratio) = listen.min_fill_ratio {
        config.min_fill_ratio = ratio;
    }
    if let Some(block) = listen.block_size {
        config.block_size = block;
    }
    if let Some(capacity) = listen.event_capacity {
        config.event_capacity = capacity;
    }
    config
}
