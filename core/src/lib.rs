//! Covert command channel over near-ultrasonic audio
//!
//! Commands are AES-GCM encrypted, optionally length-padded, framed with a
//! preamble, length field and per-byte parity, then sent as binary FSK between
//! 18.5 and 19.5 kHz. The receiver band-limits, locks onto the preamble by
//! tone correlation and reverses the chain.

pub mod analyzer;
pub mod cipher;
pub mod config;
pub mod correlate;
pub mod decoder;
pub mod demodulator;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod framing;
pub mod listen;
pub mod modulator;
pub mod resample;
pub mod signal;

pub use analyzer::{DetectionResult, SignalAnalyzer};
pub use cipher::{generate_key, Key};
pub use config::CodecConfig;
pub use decoder::{decode, AnalysisReport, CommandDecoder, DecodedCommand};
pub use demodulator::{RecoveredBits, UltrasonicDemodulator};
pub use encoder::{embed, CommandEncoder, CompatibilityReport};
pub use error::{Absence, FailureClass, Result, StegoError, SyncFailure};
pub use framing::{FrameDecoder, FrameEncoder};
pub use listen::{ListenConfig, ListenEvent, Listener, ListenerHandle, SampleSink, SampleSource};
pub use modulator::UltrasonicModulator;
pub use resample::{downmix, resample_audio};
pub use signal::Signal;
