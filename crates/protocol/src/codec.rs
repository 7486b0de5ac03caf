//! Frame encoding and decoding
//!
//! # Frame Format
//!
//! Every string travels as a length-prefixed modified UTF-8 blob:
//! ```text
//! [Length: u16 (big-endian)][modified UTF-8 bytes]
//! ```
//!
//! Directory snapshot entries are bare strings, terminated by an empty string.
//! Live hotplug frames prefix the string with one state byte:
//! ```text
//! [State: u8 (0 = attached, 1 = detached)][Length: u16][bytes]
//! ```

use crate::error::{ProtocolError, Result};
use crate::mutf8;
use crate::types::{DeviceEvent, DeviceState};
#[cfg(feature = "async")]
use crate::types::Request;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum encoded string length the 16-bit prefix can express
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Encode a string with its length prefix
///
/// # Example
/// ```
/// let frame = protocol::encode_string("dev").unwrap();
/// assert_eq!(&frame[..], &[0, 3, b'd', b'e', b'v']);
/// ```
pub fn encode_string(s: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + mutf8::encoded_len(s));
    put_string(&mut buf, s)?;
    Ok(buf.freeze())
}

/// Encode a live hotplug frame
pub fn encode_event(event: &DeviceEvent) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(3 + mutf8::encoded_len(&event.device));
    buf.put_u8(event.state.as_byte());
    put_string(&mut buf, &event.device)?;
    Ok(buf.freeze())
}

/// Frame that marks the end of a directory snapshot
pub fn snapshot_end() -> Bytes {
    Bytes::from_static(&[0, 0])
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    let encoded = mutf8::encode(s);
    if encoded.len() > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong {
            size: encoded.len(),
            max: MAX_STRING_LEN,
        });
    }
    buf.put_u16(encoded.len() as u16);
    buf.put_slice(&encoded);
    Ok(())
}

/// Write a length-prefixed string to a writer
pub fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let encoded = mutf8::encode(s);
    if encoded.len() > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong {
            size: encoded.len(),
            max: MAX_STRING_LEN,
        });
    }
    writer.write_u16::<BigEndian>(encoded.len() as u16)?;
    writer.write_all(&encoded)?;
    Ok(())
}

/// Read a length-prefixed string from a reader
///
/// # Example
/// ```
/// use std::io::Cursor;
///
/// let mut cursor = Cursor::new(vec![0, 2, b'h', b'i']);
/// assert_eq!(protocol::read_string(&mut cursor).unwrap(), "hi");
/// ```
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let length = reader.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    mutf8::decode(&bytes)
}

/// Read a live hotplug frame from a reader
pub fn read_event<R: Read>(reader: &mut R) -> Result<DeviceEvent> {
    let state = DeviceState::try_from(reader.read_u8()?)?;
    let device = read_string(reader)?;
    Ok(DeviceEvent { state, device })
}

/// Async: write a length-prefixed string
#[cfg(feature = "async")]
pub async fn write_string_async<W>(writer: &mut W, s: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let frame = encode_string(s)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Async: read a length-prefixed string
#[cfg(feature = "async")]
pub async fn read_string_async<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let length = reader.read_u16().await? as usize;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes).await?;
    mutf8::decode(&bytes)
}

/// Async: read the client's request
#[cfg(feature = "async")]
pub async fn read_request_async<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncReadExt + Unpin,
{
    Ok(Request::from_wire(read_string_async(reader).await?))
}

/// Async: read a live hotplug frame
#[cfg(feature = "async")]
pub async fn read_event_async<R>(reader: &mut R) -> Result<DeviceEvent>
where
    R: AsyncReadExt + Unpin,
{
    let state = DeviceState::try_from(reader.read_u8().await?)?;
    let device = read_string_async(reader).await?;
    Ok(DeviceEvent { state, device })
}
