//! Error kinds per §7. RT code never surfaces these; only the control
//! thread (SFZ loading, sample loading, command submission) returns them.

use thiserror::Error;

pub type CalfResult<T> = Result<T, CalfError>;

#[derive(Debug, Error)]
pub enum CalfError {
    #[error("parse error at {file}:{line}:{column}: {message}")]
    Parse {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("unknown header <{0}>")]
    InvalidHeader(String),

    #[error("resource error loading '{path}': {message}")]
    Resource { path: String, message: String },

    #[error("opcode '{opcode}' value {value} out of range, clamped to {clamped}")]
    RangeClamped {
        opcode: String,
        value: f32,
        clamped: f32,
    },

    #[error("command queue full after {elapsed_ms}ms")]
    CommandQueueFull { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
