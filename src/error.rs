use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::protocol::packet::ErrPayloadBytes;
use crate::protocol::response::ErrPayload;

/// SQL-state of transport failures (communication link failure)
pub const SQLSTATE_CONNECTION_FAILURE: &str = "08S01";
/// SQL-state of protocol violations
pub const SQLSTATE_PROTOCOL_VIOLATION: &str = "08000";
/// SQL-state used once the connection has been torn down
pub const SQLSTATE_CONNECTION_DOES_NOT_EXIST: &str = "08003";
/// Generic SQL-state
pub const SQLSTATE_GENERAL: &str = "HY000";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("Could not prepare statement: {source}{}", .hint.map(|h| format!(". {h}")).unwrap_or_default())]
    PrepareError {
        sql: String,
        #[source]
        source: ErrPayload,
        hint: Option<&'static str>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Packet too large: {size} bytes exceeds max_allowed_packet ({max} bytes)")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Transport and protocol errors leave the stream position unknown; the connection must be dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IoError(_)
            | Error::InvalidPacket
            | Error::UnexpectedEof
            | Error::ConnectionClosed
            | Error::UnsupportedAuthPlugin(_)
            | Error::LibraryBug(_) => true,
            Error::ServerError(_)
            | Error::PrepareError { .. }
            | Error::BadConfigError(_)
            | Error::BadUsageError(_)
            | Error::PacketTooLarge { .. } => false,
        }
    }

    /// Vendor error code (0 for client-side errors)
    pub fn error_code(&self) -> u16 {
        match self {
            Error::ServerError(err) => err.error_code,
            Error::PrepareError { source, .. } => source.error_code,
            _ => 0,
        }
    }

    /// Five-character SQL-state
    pub fn sql_state(&self) -> &str {
        match self {
            Error::ServerError(err) | Error::PrepareError { source: err, .. } => {
                if err.sql_state.is_empty() {
                    SQLSTATE_GENERAL
                } else {
                    &err.sql_state
                }
            }
            Error::IoError(_) => SQLSTATE_CONNECTION_FAILURE,
            Error::InvalidPacket | Error::UnexpectedEof | Error::LibraryBug(_) => {
                SQLSTATE_PROTOCOL_VIOLATION
            }
            Error::ConnectionClosed => SQLSTATE_CONNECTION_DOES_NOT_EXIST,
            Error::UnsupportedAuthPlugin(_)
            | Error::BadConfigError(_)
            | Error::BadUsageError(_)
            | Error::PacketTooLarge { .. } => SQLSTATE_GENERAL,
        }
    }

    pub(crate) fn from_debug(err: impl std::fmt::Debug) -> Self {
        Error::LibraryBug(eyre!("{:?}", err))
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: u16, state: &str, message: &str) -> Error {
        Error::ServerError(ErrPayload {
            error_code: code,
            sql_state: state.to_string(),
            message: message.to_string(),
        })
    }

    #[test]
    fn server_errors_are_not_fatal() {
        let err = server_error(1146, "42S02", "Table 'x' doesn't exist");
        assert!(!err.is_fatal());
        assert_eq!(err.error_code(), 1146);
        assert_eq!(err.sql_state(), "42S02");
        assert!(err.to_string().contains("Table 'x' doesn't exist"));
    }

    #[test]
    fn transport_errors_are_fatal() {
        let err = Error::IoError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected end of stream",
        ));
        assert!(err.is_fatal());
        assert_eq!(err.sql_state(), "08S01");
        assert_eq!(err.error_code(), 0);
        assert_eq!(Error::InvalidPacket.sql_state(), "08000");
        assert_eq!(Error::ConnectionClosed.sql_state(), "08003");
    }

    #[test]
    fn missing_sql_state_defaults_to_general() {
        let err = server_error(1045, "", "Access denied");
        assert_eq!(err.sql_state(), "HY000");
    }

    #[test]
    fn prepare_error_carries_hint() {
        let err = Error::PrepareError {
            sql: "SELECT ?".to_string(),
            source: ErrPayload {
                error_code: 1054,
                sql_state: "42S22".to_string(),
                message: "Unknown column".to_string(),
            },
            hint: Some("use CAST(? AS type)"),
        };
        assert_eq!(err.error_code(), 1054);
        assert_eq!(err.sql_state(), "42S22");
        let message = err.to_string();
        assert!(message.starts_with("Could not prepare statement"));
        assert!(message.ends_with("use CAST(? AS type)"));
        assert!(!err.is_fatal());
    }
}
