//! Datagram reading
//!
//! `DatagramIterator` is a borrowing cursor over a datagram's bytes. Every
//! read is bounds-checked and returns `DatagramError::Underflow` instead of
//! panicking, so a truncated datagram from a misbehaving peer surfaces as an
//! ordinary error on that participant.

use crate::error::DatagramError;
use crate::protocol::constants::Channel;
use crate::protocol::datagram::Datagram;

/// Typed little-endian reader over a datagram
#[derive(Debug)]
pub struct DatagramIterator<'dg> {
    data: &'dg [u8],
    offset: usize,
}

impl<'dg> DatagramIterator<'dg> {
    /// Create an iterator positioned at the start of the datagram
    pub fn new(datagram: &'dg Datagram) -> Self {
        Self {
            data: datagram.as_slice(),
            offset: 0,
        }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Current read position
    pub fn tell(&self) -> usize {
        self.offset
    }

    /// Move the read position to an absolute offset
    pub fn seek(&mut self, offset: usize) -> Result<(), DatagramError> {
        if offset > self.data.len() {
            return Err(DatagramError::SeekOutOfBounds(offset));
        }
        self.offset = offset;
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&'dg [u8], DatagramError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(DatagramError::Underflow {
                needed: count,
                remaining,
            });
        }
        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    /// Read an unsigned 8-bit value
    pub fn read_u8(&mut self) -> Result<u8, DatagramError> {
        Ok(self.take(1)?[0])
    }

    /// Read an unsigned 16-bit value
    pub fn read_u16(&mut self) -> Result<u16, DatagramError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an unsigned 32-bit value
    pub fn read_u32(&mut self) -> Result<u32, DatagramError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an unsigned 64-bit value
    pub fn read_u64(&mut self) -> Result<u64, DatagramError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Read a channel address
    pub fn read_channel(&mut self) -> Result<Channel, DatagramError> {
        self.read_u64()
    }

    /// Read a length-prefixed string
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the director treats
    /// names and urls as diagnostics only.
    pub fn read_string(&mut self) -> Result<String, DatagramError> {
        let length = self.read_u16()? as usize;
        let bytes = self.take(length)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a length-prefixed blob as a nested datagram
    pub fn read_blob(&mut self) -> Result<Datagram, DatagramError> {
        let length = self.read_u16()? as usize;
        Ok(Datagram::from_slice(self.take(length)?))
    }

    /// Read raw bytes
    pub fn read_data(&mut self, count: usize) -> Result<&'dg [u8], DatagramError> {
        self.take(count)
    }

    /// Position the cursor just past the recipient header
    ///
    /// Leaves the iterator at the first payload byte regardless of its
    /// current position.
    pub fn skip_headers(&mut self) -> Result<(), DatagramError> {
        self.seek(0)?;
        let recipient_count = self.read_u8()?;
        for _ in 0..recipient_count {
            self.read_channel()?;
        }
        Ok(())
    }
}
