//! Errors for SyGuS emission, parsing, and the synthesizer subprocess.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("parse error at byte {at}: expected {expected}, found `{found}`")]
    Parse {
        at: usize,
        expected: String,
        found: String,
    },

    #[error("synthesizer binary not found at `{0}`")]
    BinaryNotFound(String),

    #[error("failed to run synthesizer: {0}")]
    Io(#[from] std::io::Error),
}

pub type SynthResult<T> = Result<T, SynthError>;
