use thiserror::Error;
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("ring buffer is empty")]
    BufferEmpty,
    #[error("invalid byte 0x{byte:02x} at offset {offset} in read batch")]
    InvalidData { byte: u8, offset: usize },
    #[error("failed to open byte source: {0}")]
    Open(String),
    #[error("failed to apply port settings: {0}")]
    PortState(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("read from byte source failed: {0}")]
    Read(String),
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}
impl ScopeError {
    /// Errors raised while setting up a byte source. These are surfaced to the
    /// caller; everything else is recoverable per tick.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ScopeError::Open(_) | ScopeError::PortState(_) | ScopeError::Config(_)
        )
    }
}
impl From<serialport::Error> for ScopeError {
    fn from(value: serialport::Error) -> Self {
        match value.kind() {
            serialport::ErrorKind::InvalidInput => ScopeError::Config(value.to_string()),
            serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(_) => {
                ScopeError::Open(value.to_string())
            }
            _ => ScopeError::PortState(value.to_string()),
        }
    }
}
