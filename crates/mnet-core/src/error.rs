use thiserror::Error;

/// Errors produced by the mnet transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("duplicate handler for opcode 0x{opcode:04X}: {existing} and {duplicate}")]
    DuplicateOpcode {
        opcode: u16,
        existing: &'static str,
        duplicate: &'static str,
    },

    #[error("packet underflow: wanted {wanted} bytes, {remaining} remaining")]
    Underflow { wanted: usize, remaining: usize },

    #[error("session has been disposed")]
    Disposed,

    #[error("session already started")]
    AlreadyStarted,

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl NetError {
    /// Whether the error is the ordinary end of a connection rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            NetError::Disposed => true,
            _ => false,
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
