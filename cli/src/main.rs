mod config;
mod error;
mod wav;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{ArgAction, Args, Parser, Subcommand};
use config::{codec_config, listen_config, CodecArgs, FileConfig};
use error::{CliError, CliResult};
use hushtone_core::{
    generate_key, CodecConfig, CommandDecoder, CommandEncoder, FailureClass, Key, ListenEvent,
    Listener, SampleSink, SignalAnalyzer, StegoError,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use wav::{read_wav, WavSink, WavSource};

#[derive(Parser)]
#[command(name = "hushtone")]
#[command(version)]
#[command(about = "Hide encrypted commands in near-ultrasonic audio", long_about = None)]
struct Cli {
    /// JSON file with codec and listener settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    codec: CodecArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct KeyArgs {
    /// Base64 AES key (16, 24 or 32 bytes)
    #[arg(long)]
    key: Option<String>,

    /// File holding a base64 AES key
    #[arg(long)]
    key_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random AES key and print it as base64
    Keygen {
        /// Key size in bits: 128, 192 or 256
        #[arg(long, default_value_t = 256)]
        bits: usize,

        /// Write the key to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt a command and render it as ultrasonic audio
    Embed {
        #[command(flatten)]
        key: KeyArgs,

        /// Command text to hide
        command: String,

        /// Output WAV file
        output: PathBuf,

        /// Mix the tones into this WAV file instead of rendering them alone
        #[arg(long)]
        carrier: Option<PathBuf>,
    },

    /// Recover a hidden command from a WAV file
    Decode {
        #[command(flatten)]
        key: KeyArgs,

        /// Input WAV file
        input: PathBuf,
    },

    /// Report signal presence, spectral peaks and decode outcome as JSON
    Analyze {
        #[command(flatten)]
        key: KeyArgs,

        /// Input WAV file
        input: PathBuf,
    },

    /// Print the worst-case signal duration for a command
    Estimate {
        /// Command text
        command: String,
    },

    /// Report whether a WAV file can carry the configured tones, as JSON
    Check {
        /// Carrier WAV file
        input: PathBuf,
    },

    /// Stream a WAV file through the live listener and print each command
    Listen {
        #[command(flatten)]
        key: KeyArgs,

        /// Input WAV file
        input: PathBuf,

        /// Pace reads to the file's sample rate
        #[arg(long)]
        realtime: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(exit_code(&e));
    }
}

/// 2 when nothing was hidden, 3 when a frame was found but unrecoverable.
fn exit_code(error: &CliError) -> i32 {
    match error {
        CliError::Stego(e) => match e.class() {
            FailureClass::Absence => 2,
            FailureClass::Corrupt => 3,
            FailureClass::Configuration | FailureClass::Capture => 1,
        },
        _ => 1,
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = codec_config(&file, &cli.codec);

    match cli.command {
        Commands::Keygen { bits, output } => keygen(bits, output.as_deref()),
        Commands::Embed {
            key,
            command,
            output,
            carrier,
        } => embed(&config, &load_key(&key)?, &command, &output, carrier.as_deref()),
        Commands::Decode { key, input } => decode(&config, &load_key(&key)?, &input),
        Commands::Analyze { key, input } => analyze(&config, &load_key(&key)?, &input),
        Commands::Estimate { command } => {
            let encoder = CommandEncoder::new(&config)?;
            let seconds = encoder.estimate_duration(&command);
            println!("Command: {} bytes", command.len());
            println!("Estimated duration: {:.2} s", seconds);
            Ok(())
        }
        Commands::Check { input } => check(&config, &input),
        Commands::Listen {
            key,
            input,
            realtime,
        } => listen(&config, load_key(&key)?, &file, &input, realtime),
    }
}

fn load_key(args: &KeyArgs) -> CliResult<Key> {
    let text = match (&args.key, &args.key_file) {
        (Some(key), _) => key.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?,
        (None, None) => return Err(CliError::Usage("a key is required".into())),
    };
    let bytes = STANDARD.decode(text.trim())?;
    Ok(Key::from_bytes(&bytes)?)
}

fn keygen(bits: usize, output: Option<&Path>) -> CliResult<()> {
    if bits % 8 != 0 {
        return Err(CliError::Usage(format!("{} is not a whole number of bytes", bits)));
    }
    let key = generate_key(bits / 8)?;
    let encoded = STANDARD.encode(key.as_bytes());

    match output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", encoded)).map_err(|e| CliError::io(path, e))?;
            println!("Wrote {}-bit key to {}", bits, path.display());
        }
        None => println!("{}", encoded),
    }
    Ok(())
}

fn embed(
    config: &CodecConfig,
    key: &Key,
    command: &str,
    output: &Path,
    carrier: Option<&Path>,
) -> CliResult<()> {
    let encoder = CommandEncoder::new(config)?;

    let signal = match carrier {
        Some(path) => {
            let carrier = read_wav(path)?;
            let report = encoder.check_compatibility(&carrier);
            println!(
                "Carrier: {} Hz, {:.2} s",
                report.sample_rate, report.duration_secs
            );
            encoder.embed_into(&carrier, command, key)?
        }
        None => encoder.embed(command, key)?,
    };

    WavSink::new(output).write(&signal)?;

    println!("Embedded {} bytes", command.len());
    println!(
        "Tones: {} Hz / {} Hz at {} Hz",
        config.freq_0, config.freq_1, signal.sample_rate
    );
    println!("Duration: {:.2} s", signal.duration_secs());
    println!("Wrote {}", output.display());
    Ok(())
}

fn decode(config: &CodecConfig, key: &Key, input: &Path) -> CliResult<()> {
    let signal = read_wav(input)?;
    let decoder = CommandDecoder::new(config)?;
    let decoded = decoder.decode_located(&signal, key)?;

    log::info!(
        "Frame spans samples {}..{} of {}",
        decoded.start_sample,
        decoded.end_sample,
        signal.len()
    );
    println!("{}", decoded.command);
    Ok(())
}

fn analyze(config: &CodecConfig, key: &Key, input: &Path) -> CliResult<()> {
    let signal = read_wav(input)?;
    let report = CommandDecoder::new(config)?.analyze(&signal, key)?;

    let decoded = match &report.decoded {
        Ok(command) => json!({ "command": command }),
        Err(e) => json!({ "error": e.to_string(), "class": failure_class_name(e) }),
    };
    let value = json!({
        "has_signal": report.detection.has_signal,
        "strength": report.detection.strength,
        "dominant_frequencies": report.detection.dominant_frequencies,
        "frequency_range": [report.frequency_range.0, report.frequency_range.1],
        "duration_secs": report.duration_secs,
        "sample_rate": report.sample_rate,
        "decoded": decoded,
    });
    print_json(&value)
}

fn check(config: &CodecConfig, input: &Path) -> CliResult<()> {
    let carrier = read_wav(input)?;
    let report = CommandEncoder::new(config)?.check_compatibility(&carrier);

    let mut value = json!({
        "compatible": report.compatible,
        "sample_rate": report.sample_rate,
        "nyquist_frequency": report.nyquist_frequency,
        "frequency_range": [report.frequency_range.0, report.frequency_range.1],
        "recommended_sample_rate": report.recommended_sample_rate,
        "duration_secs": report.duration_secs,
    });
    if report.compatible {
        // Energy already in the tone band
        let strength = SignalAnalyzer::new(config)?.strength(&carrier)?;
        value["in_band_strength"] = json!(strength);
    }
    print_json(&value)
}

fn listen(
    config: &CodecConfig,
    key: Key,
    file: &FileConfig,
    input: &Path,
    realtime: bool,
) -> CliResult<()> {
    let source = WavSource::open(input, realtime)?;
    let handle = Listener::spawn(source, key, config, listen_config(file))?;

    let mut commands = 0usize;
    let mut outcome = Ok(());
    for event in handle.events().iter() {
        match event {
            ListenEvent::Command(command) => {
                commands += 1;
                println!("{}", command);
            }
            ListenEvent::Failure(e) => eprintln!("Rejected frame: {}", e),
            ListenEvent::SourceFinished => break,
            ListenEvent::SourceFailed(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }
    handle.stop();

    log::info!("Listener finished with {} command(s)", commands);
    outcome
}

fn failure_class_name(error: &StegoError) -> &'static str {
    match error.class() {
        FailureClass::Absence => "absence",
        FailureClass::Corrupt => "corrupt",
        FailureClass::Configuration => "configuration",
        FailureClass::Capture => "capture",
    }
}

fn print_json(value: &serde_json::Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Usage(format!("could not render report: {}", e)))?;
    println!("{}", text);
    Ok(())
}
