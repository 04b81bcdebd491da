//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too small for a fixed-size record
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// First word of a message is neither a known operation nor a known command
    #[error("Unknown USB/IP command: {0:#010x}")]
    UnknownCommand(u32),

    /// Transfer length in a CMD_SUBMIT exceeds what the server will buffer
    #[error("Transfer too large: {size} bytes (max: {max})")]
    TransferTooLarge { size: usize, max: usize },

    /// I/O error while reading a request
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the peer closed or reset the connection
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Fail with [`ProtocolError::BufferTooSmall`] unless `bytes` holds at least `needed` bytes
pub(crate) fn ensure_len(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(ProtocolError::BufferTooSmall {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}
