//! Client side of the MySQL / MariaDB wire protocol
//!
//! [`protocol`] holds the pure codecs: packet headers, handshake, command writers,
//! the result decoder and the row codec. [`sync`] runs them over a blocking stream:
//! packet channel, compression, prepared-statement cache and the session itself.

mod buffer;
pub mod col;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
pub mod row;
pub mod sync;

pub use buffer::BufferSet;
pub use col::ColumnDefinition;
pub use error::{Error, Result};
pub use opts::Opts;
pub use row::Row;
pub use sync::{Conn, PreparedStatement, ResultStream, SessionState, SharedConn};
