//! Error types
//!
//! `Error` is the crate-wide error returned by transport and server
//! operations. `DatagramError` covers failures while reading a datagram and
//! is kept separate so parsing code can stay transport-agnostic.

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying socket or I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed datagram
    #[error(transparent)]
    Datagram(#[from] DatagramError),

    /// Datagram too large for the u16 frame length prefix
    #[error("datagram of {0} bytes exceeds the 65535 byte frame limit")]
    DatagramTooLarge(usize),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Error while reading from a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DatagramError {
    /// Read past the end of the buffer
    #[error("datagram underflow: needed {needed} more bytes, {remaining} remaining")]
    Underflow {
        /// Bytes the read required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Seek target outside the buffer
    #[error("seek to offset {0} is past the end of the datagram")]
    SeekOutOfBounds(usize),
}
