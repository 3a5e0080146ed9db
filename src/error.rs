//! Error taxonomy shared by transports, drivers and the control loop.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, HushError>;

#[derive(Debug, thiserror::Error)]
pub enum HushError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no temperature readings for {0}")]
    NoReadings(String),
}

/// Failures below the protocol layer: the request never produced a usable response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    HttpStatus { url: String, status: u16 },
}

impl HushError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        HushError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        HushError::Config(msg.into())
    }
}

impl From<reqwest::Error> for HushError {
    fn from(e: reqwest::Error) -> Self {
        HushError::Transport(TransportError::Http(e))
    }
}

impl From<serde_json::Error> for HushError {
    fn from(e: serde_json::Error) -> Self {
        HushError::Protocol(format!("malformed JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_keep_command_context() {
        let err: HushError = TransportError::Timeout {
            command: "ipmitool -c sdr".to_string(),
            after: Duration::from_secs(10),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("transport error"));
        assert!(msg.contains("ipmitool -c sdr"));
    }

    #[test]
    fn json_errors_are_protocol_errors() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(HushError::from(bad), HushError::Protocol(_)));
    }
}
