use crate::constant::CommandByte;
use crate::protocol::primitive::*;

/// Write COM_QUIT command (the server closes the socket without replying)
pub fn write_quit(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Quit as u8);
}

/// Write COM_PING command
pub fn write_ping(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Ping as u8);
}

/// Write COM_INIT_DB command
pub fn write_init_db(out: &mut Vec<u8>, database: &str) {
    write_int_1(out, CommandByte::InitDb as u8);
    out.extend_from_slice(database.as_bytes());
}

/// Write COM_RESET_CONNECTION command
///
/// The server drops session state including every prepared statement.
pub fn write_reset_connection(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::ResetConnection as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_commands() {
        let mut out = Vec::new();
        write_quit(&mut out);
        write_ping(&mut out);
        write_reset_connection(&mut out);
        assert_eq!(out, vec![0x01, 0x0e, 0x1f]);
    }

    #[test]
    fn init_db_carries_schema_name() {
        let mut out = Vec::new();
        write_init_db(&mut out, "shop");
        assert_eq!(out, b"\x02shop");
    }
}
