/// Reusable buffers for one connection
///
/// `Conn` uses a single `BufferSet` for all its operations; a buffer's bytes are only
/// valid until the next command.
#[derive(Debug, Default)]
pub struct BufferSet {
    /// Payload of the last packet read as a whole (headers, column definitions, terminators)
    pub read_buffer: Vec<u8>,

    /// Payload of the command being sent, before it is split into packets
    write_buffer: Vec<u8>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the write buffer and return it for a new command
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    #[inline]
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_set_is_empty() {
        let buffers = BufferSet::new();
        assert!(buffers.read_buffer.is_empty());
        assert!(buffers.write_buffer().is_empty());
    }

    #[test]
    fn new_write_buffer_starts_empty() {
        let mut buffers = BufferSet::new();
        buffers.new_write_buffer().extend_from_slice(b"\x03SELECT 1");
        assert_eq!(buffers.write_buffer(), b"\x03SELECT 1");

        buffers.new_write_buffer().push(0x0e);
        assert_eq!(buffers.write_buffer(), &[0x0e]);
    }

    #[test]
    fn buffers_keep_capacity_across_commands() {
        let mut buffers = BufferSet::new();
        buffers.read_buffer.extend_from_slice(b"test data");
        buffers.new_write_buffer().extend_from_slice(b"query");

        buffers.read_buffer.clear();
        let capacity = buffers.new_write_buffer().capacity();

        assert!(buffers.read_buffer.capacity() >= 9);
        assert!(capacity >= 5);
        assert!(buffers.write_buffer().is_empty());
    }
}
