//! Blocking client built on `std::net` and `std::os::unix::net`

pub mod channel;
pub mod compress;
mod conn;
pub mod prepared;
mod result;
pub mod stream;

pub use channel::{PacketChannel, PayloadReader, SequenceCounter};
pub use conn::{Conn, SessionState, SharedConn};
pub use prepared::{PrepareCache, PreparedStatement};
pub use result::ResultStream;
pub use stream::{Socket, Stream, TlsUpgrader};
