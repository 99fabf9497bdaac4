use std::fmt;
use thiserror::Error;

/// Why a signal was judged to carry no hidden frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Absence {
    /// In-band strength never rose above the detection threshold
    BelowThreshold { strength: f32, threshold: f32 },
    /// Energy was present but no window matched the preamble
    NoPreamble { best_score: f32 },
}

impl fmt::Display for Absence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Absence::BelowThreshold { strength, threshold } => write!(
                f,
                "in-band strength {:.4} not above threshold {:.4}",
                strength, threshold
            ),
            Absence::NoPreamble { best_score } => {
                write!(f, "no preamble match (best score {:.3})", best_score)
            }
        }
    }
}

/// Why a frame could not be delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    /// Not enough bits for the preamble and length field
    ShortHeader { bits: usize },
    /// Too many preamble bits differ from the expected pattern
    PreambleMismatch { mismatches: usize, allowed: usize },
    /// Declared payload length above the configured limit
    LengthOutOfRange { declared: usize, limit: usize },
    /// Signal ends before the declared frame does
    Truncated { present: usize, needed: usize },
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::ShortHeader { bits } => {
                write!(f, "{} bits are too few for a frame header", bits)
            }
            SyncFailure::PreambleMismatch { mismatches, allowed } => write!(
                f,
                "preamble has {} mismatched bits (at most {} allowed)",
                mismatches, allowed
            ),
            SyncFailure::LengthOutOfRange { declared, limit } => write!(
                f,
                "declared payload of {} bytes exceeds limit of {}",
                declared, limit
            ),
            SyncFailure::Truncated { present, needed } => {
                write!(f, "frame truncated: {} of {} bits present", present, needed)
            }
        }
    }
}

/// Coarse grouping of failures for callers that only need to react to the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing was hidden in the analyzed audio
    Absence,
    /// Something was hidden but could not be recovered
    Corrupt,
    /// Caller-supplied parameters were rejected before processing
    Configuration,
    /// The sample source failed
    Capture,
}

#[derive(Debug, Error)]
pub enum StegoError {
    #[error("No signal detected: {0}")]
    NoSignalDetected(Absence),

    #[error("Frame synchronization failed: {0}")]
    SyncError(SyncFailure),

    #[error("Parity check failed: {mismatches} of {total} parity bits mismatched")]
    ParityError { mismatches: usize, total: usize },

    #[error("Authentication failed")]
    AuthenticationError,

    #[error("Frequency {frequency} Hz is not below the Nyquist frequency {nyquist} Hz")]
    NyquistViolation { frequency: f32, nyquist: f32 },

    #[error("Invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("Malformed payload: {0}")]
    FormatError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sample source error: {0}")]
    Capture(String),
}

impl StegoError {
    /// True when the audio simply did not contain a frame.
    pub fn is_absence(&self) -> bool {
        matches!(self, StegoError::NoSignalDetected(_))
    }

    /// True when the frame was cut short rather than damaged; more audio
    /// may complete it.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            StegoError::SyncError(SyncFailure::ShortHeader { .. } | SyncFailure::Truncated { .. })
        )
    }

    pub fn class(&self) -> FailureClass {
        match self {
            StegoError::NoSignalDetected(_) => FailureClass::Absence,
            StegoError::SyncError(_)
            | StegoError::ParityError { .. }
            | StegoError::AuthenticationError => FailureClass::Corrupt,
            StegoError::NyquistViolation { .. }
            | StegoError::InvalidKeyLength(_)
            | StegoError::FormatError(_)
            | StegoError::InvalidConfig(_) => FailureClass::Configuration,
            StegoError::Capture(_) => FailureClass::Capture,
        }
    }
}

pub type Result<T> = std::result::Result<T, StegoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absence_is_distinguishable_from_corruption() {
        let absent = StegoError::NoSignalDetected(Absence::NoPreamble { best_score: 0.1 });
        assert!(absent.is_absence());
        assert_eq!(absent.class(), FailureClass::Absence);

        let corrupt = StegoError::ParityError { mismatches: 3, total: 20 };
        assert!(!corrupt.is_absence());
        assert_eq!(corrupt.class(), FailureClass::Corrupt);
        assert_eq!(StegoError::AuthenticationError.class(), FailureClass::Corrupt);
    }

    #[test]
    fn test_incomplete_frames() {
        let cut = StegoError::SyncError(SyncFailure::Truncated { present: 50, needed: 94 });
        assert!(cut.is_incomplete());
        assert_eq!(cut.class(), FailureClass::Corrupt);
        assert_eq!(
            cut.to_string(),
            "Frame synchronization failed: frame truncated: 50 of 94 bits present"
        );

        let garbled = StegoError::SyncError(SyncFailure::PreambleMismatch {
            mismatches: 5,
            allowed: 2,
        });
        assert!(!garbled.is_incomplete());
    }

    #[test]
    fn test_authentication_message_has_no_detail() {
        assert_eq!(StegoError::AuthenticationError.to_string(), "Authentication failed");
    }
}
