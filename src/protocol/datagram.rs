//! Datagram assembly
//!
//! A `Datagram` is a length-delimited binary message built with typed
//! little-endian writers. The director itself only ever interprets the
//! recipient header; everything after it is opaque payload.

use bytes::{BufMut, BytesMut};

use crate::protocol::constants::{Channel, CONTROL_MESSAGE};

/// An append-only binary message with typed little-endian writers
///
/// Wire layout of a routed datagram:
///
/// ```text
/// uint8   recipient_count          // N
/// uint64  recipients[N]            // destination channels
/// ...payload...                    // opaque to the director
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    buf: BytesMut,
}

impl Datagram {
    /// Create an empty datagram
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an empty datagram with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Create a datagram from raw bytes
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether the datagram is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the assembled bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append an unsigned 8-bit value
    pub fn add_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Append an unsigned 16-bit value
    pub fn add_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Append an unsigned 32-bit value
    pub fn add_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Append an unsigned 64-bit value
    pub fn add_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Append a channel address
    pub fn add_channel(&mut self, channel: Channel) {
        self.buf.put_u64_le(channel);
    }

    /// Append a length-prefixed UTF-8 string
    ///
    /// The length prefix is u16, so the string must be under 64 KiB.
    pub fn add_string(&mut self, value: &str) {
        self.buf.put_u16_le(value.len() as u16);
        self.buf.put_slice(value.as_bytes());
    }

    /// Append raw bytes with no length prefix
    pub fn add_data(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Append another datagram as a length-prefixed blob
    pub fn add_blob(&mut self, datagram: &Datagram) {
        self.buf.put_u16_le(datagram.len() as u16);
        self.buf.put_slice(datagram.as_slice());
    }

    /// Append a control header addressed to the director itself
    ///
    /// Writes `recipient_count = 1`, the reserved `CONTROL_MESSAGE` channel,
    /// and the control code. Control payload follows.
    pub fn add_control_header(&mut self, msg_type: u16) {
        self.add_u8(1);
        self.add_channel(CONTROL_MESSAGE);
        self.add_u16(msg_type);
    }

    /// Append a routed-message header
    ///
    /// Writes the recipient list followed by the conventional
    /// `sender, msg_type` payload prefix used across the cluster.
    pub fn add_server_header(&mut self, recipients: &[Channel], sender: Channel, msg_type: u16) {
        self.add_u8(recipients.len() as u8);
        for &channel in recipients {
            self.add_channel(channel);
        }
        self.add_channel(sender);
        self.add_u16(msg_type);
    }
}

impl From<Vec<u8>> for Datagram {
    fn from(data: Vec<u8>) -> Self {
        Self {
            buf: BytesMut::from(&data[..]),
        }
    }
}

impl AsRef<[u8]> for Datagram {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::CONTROL_SET_CHANNEL;

    #[test]
    fn test_typed_writes_are_little_endian() {
        let mut dg = Datagram::new();
        dg.add_u8(0xAB);
        dg.add_u16(0x1234);
        dg.add_u32(0xDEADBEEF);
        dg.add_u64(0x0102030405060708);

        assert_eq!(
            dg.as_slice(),
            &[
                0xAB, // u8
                0x34, 0x12, // u16
                0xEF, 0xBE, 0xAD, 0xDE, // u32
                0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // u64
            ]
        );
    }

    #[test]
    fn test_control_header_layout() {
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_SET_CHANNEL);
        dg.add_channel(77);

        // count=1, CONTROL_MESSAGE channel, code, argument
        assert_eq!(dg.len(), 1 + 8 + 2 + 8);
        assert_eq!(dg.as_slice()[0], 1);
        assert_eq!(
            u64::from_le_bytes(dg.as_slice()[1..9].try_into().unwrap()),
            CONTROL_MESSAGE
        );
        assert_eq!(
            u16::from_le_bytes(dg.as_slice()[9..11].try_into().unwrap()),
            CONTROL_SET_CHANNEL
        );
    }

    #[test]
    fn test_server_header_layout() {
        let mut dg = Datagram::new();
        dg.add_server_header(&[100, 200], 42, 7);

        assert_eq!(dg.as_slice()[0], 2);
        assert_eq!(
            u64::from_le_bytes(dg.as_slice()[1..9].try_into().unwrap()),
            100
        );
        assert_eq!(
            u64::from_le_bytes(dg.as_slice()[9..17].try_into().unwrap()),
            200
        );
        assert_eq!(
            u64::from_le_bytes(dg.as_slice()[17..25].try_into().unwrap()),
            42
        );
        assert_eq!(
            u16::from_le_bytes(dg.as_slice()[25..27].try_into().unwrap()),
            7
        );
    }

    #[test]
    fn test_add_string_prefixes_length() {
        let mut dg = Datagram::new();
        dg.add_string("md");

        assert_eq!(dg.as_slice(), &[2, 0, b'm', b'd']);
    }

    #[test]
    fn test_add_blob_nests_datagram() {
        let mut inner = Datagram::new();
        inner.add_u16(0xAAAA);

        let mut outer = Datagram::new();
        outer.add_blob(&inner);

        assert_eq!(outer.as_slice(), &[2, 0, 0xAA, 0xAA]);
    }

    #[test]
    fn test_from_slice_round_trips() {
        let dg = Datagram::from_slice(&[1, 2, 3]);
        assert_eq!(dg.as_slice(), &[1, 2, 3]);
        assert_eq!(dg.len(), 3);
        assert!(!dg.is_empty());
    }
}
