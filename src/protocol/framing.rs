//! Wire framing
//!
//! Every datagram travels over a stream transport as a little-endian u16
//! length prefix followed by that many bytes. The frame codec is the only
//! place the size limit is enforced; datagram assembly itself is unbounded.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::datagram::Datagram;

/// Size of the frame length prefix
pub const FRAME_HEADER_SIZE: usize = 2;

/// Read one frame from the transport
///
/// Returns `Ok(None)` on a clean end-of-stream (the peer closed between
/// frames). EOF in the middle of a frame is an error: the peer vanished
/// mid-datagram.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Datagram>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u16::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Datagram::from(payload)))
}

/// Write one frame to the transport
pub async fn write_frame<W>(writer: &mut W, datagram: &Datagram) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::DatagramTooLarge(datagram.len()));
    }

    writer
        .write_all(&(datagram.len() as u16).to_le_bytes())
        .await?;
    writer.write_all(datagram.as_slice()).await?;
    Ok(())
}
