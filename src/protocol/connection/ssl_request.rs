use zerocopy::byteorder::little_endian::U32 as U32LE;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::CapabilityFlags;

/// Truncated handshake response that asks the server to switch to TLS
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct SslRequest {
    client_flag: U32LE,
    max_packet_size: U32LE,
    character_set: u8,
    filler: [u8; 23],
}

impl SslRequest {
    pub fn capability_flags(&self) -> CapabilityFlags {
        CapabilityFlags::from_bits_truncate(self.client_flag.get())
    }
}

pub fn write_ssl_request(
    out: &mut Vec<u8>,
    capability_flags: CapabilityFlags,
    max_packet_size: u32,
    charset: u8,
) {
    let request = SslRequest {
        client_flag: U32LE::new((capability_flags | CapabilityFlags::CLIENT_SSL).bits()),
        max_packet_size: U32LE::new(max_packet_size),
        character_set: charset,
        filler: [0; 23],
    };
    out.extend_from_slice(request.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request_layout() {
        let mut out = Vec::new();
        write_ssl_request(&mut out, CapabilityFlags::CLIENT_PROTOCOL_41, 1 << 24, 45);
        assert_eq!(out.len(), 32);
        assert_eq!(&out[4..8], &[0, 0, 0, 1]);
        assert_eq!(out[8], 45);

        let request = SslRequest::ref_from_bytes(&out).unwrap();
        assert!(
            request
                .capability_flags()
                .contains(CapabilityFlags::CLIENT_SSL | CapabilityFlags::CLIENT_PROTOCOL_41)
        );
    }
}
