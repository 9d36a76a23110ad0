use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown command code: {0}")]
    UnknownCommand(u32),

    #[error("Unknown status code: {0}")]
    UnknownStatus(u32),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, ProtoError>;
