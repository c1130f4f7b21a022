//! Error taxonomy for the copy scheduler.
//!
//! Mirrors the recognized-outcome split in the scheduler design: short reads and
//! destination-full are not represented here at all (they are handled internally as state
//! transitions), only the genuinely fatal kinds are.

use {crate::buffer::AllocError, std::io, thiserror::Error};

/// Which side of the copy an I/O error occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Input,
    Output,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SlotKind::Input => "input",
            SlotKind::Output => "output",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("block size {0} is outside [512, 16777216]")]
    BlockSizeRange(u32),
    #[error("block size {0} is not a multiple of 512")]
    BlockSizeAlignment(u32),
    #[error("queue depth {0} is outside [1, 32]")]
    QueueDepthRange(u32),
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("submitting operation failed: {0}")]
    Submit(#[source] io::Error),

    #[error("buffer allocation failed: {0}")]
    Alloc(#[from] AllocError),

    #[error("{slot} I/O error: {source}")]
    Io {
        slot: SlotKind,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl CopyError {
    /// Exit code used by the `blkcopy` binary collaborator; the core itself never exits.
    pub fn exit_code(&self) -> i32 {
        match self {
            CopyError::Config(_) => 1,
            CopyError::Alloc(_) => 2,
            CopyError::Submit(_) | CopyError::Io { .. } => 3,
        }
    }
}
