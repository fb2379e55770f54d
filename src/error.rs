use crate::transaction::key::TransactionKey;
use std::env::VarError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP parse error: {0}")]
    Parse(String),

    #[error("SDP validation error: {0}")]
    SdpValidation(String),

    #[error("media relay error: {0}")]
    Relay(String),

    #[error("transaction error: {0}: {1}")]
    Transaction(String, TransactionKey),

    #[error("transaction timeout: {0}")]
    TransactionTimeout(TransactionKey),

    #[error("ack timeout: {0}")]
    AckTimeout(String),

    #[error("capacity exceeded: {0} active sessions")]
    Capacity(usize),

    #[error("unknown call: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("dialog error: {0}: {1}")]
    Dialog(String, String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("hub error: {0}")]
    Hub(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("environment variable error: {0}")]
    Var(#[from] VarError),

    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("channel send error: {0}")]
    ChannelSend(String),
}

impl Error {
    pub fn configuration<E: std::fmt::Display>(err: E) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelSend(e.to_string())
    }
}
