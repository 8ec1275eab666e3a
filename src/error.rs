//! Error types for the acquisition core

use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or output-file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound frame ended before the advertised length
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    TruncatedFrame { expected: usize, got: usize },

    /// Frame length prefix beyond anything the device would send
    #[error("oversized frame: {0} bytes")]
    OversizedFrame(usize),

    /// Sample bytes don't divide into whole multi-channel sample instants
    #[error("ragged sample block: {bytes} bytes across {nchan} channels of width {width}")]
    RaggedBlock {
        bytes: usize,
        width: usize,
        nchan: usize,
    },

    /// Sample width we don't speak (only single precision is supported)
    #[error("unsupported sample format width: {0}")]
    UnsupportedFormat(u8),

    /// Data handling attempted before the INFO handshake completed
    #[error("device metadata not yet received")]
    InfoMissing,

    /// Operation requires a live connection
    #[error("not connected to the device")]
    NotConnected,

    /// start() while the previous session's consumer has not wound down
    #[error("previous session has not finished stopping")]
    StopPending,

    /// start() while a session is already running
    #[error("a session is already running")]
    AlreadyRunning,

    /// Collaborator refused to clobber the target file
    #[error("output file {0} exists and overwrite was declined")]
    OverwriteDeclined(PathBuf),
}
