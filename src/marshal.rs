//! Length-prefixed message framing and padded byte copies.
//!
//! Wire messages are a 4-byte big-endian header followed by the
//! payload. The header word carries the payload length with its high
//! bit set to mark the record's last fragment; continuation fragments
//! are not produced, so the bit is always set on allocation. Variable-
//! length fields inside a payload are padded with zero bytes to the
//! next 4-byte boundary, and the reader rejects non-zero padding.

use std::io;

/// Header bit marking the final fragment of a record.
const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Bytes of zero padding needed after `len` payload bytes.
fn pad_len(len: usize) -> usize {
    len.wrapping_neg() & 3
}

/// A framed wire message: 4-byte header plus payload.
///
/// ```
/// use vigilis::marshal::Message;
///
/// let msg = Message::alloc(5);
/// assert_eq!(msg.len(), 5);
/// assert_eq!(msg.raw_data().len(), 9);
/// assert_eq!(&msg.raw_data()[..4], &[0x80, 0, 0, 5]);
/// ```
pub struct Message {
    buf: Vec<u8>,
}

impl Message {
    /// Allocates a zeroed message with a `len`-byte payload and a
    /// filled-in header.
    ///
    /// # Panics
    ///
    /// Panics if `len` does not fit the 31-bit length field.
    pub fn alloc(len: usize) -> Message {
        assert!(len < LAST_FRAGMENT as usize, "message length must be below 2^31");
        let mut buf = vec![0u8; len + 4];
        let word = len as u32 | LAST_FRAGMENT;
        buf[..4].copy_from_slice(&word.to_be_bytes());
        Message { buf }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header and payload, as sent on the wire.
    pub fn raw_data(&self) -> &[u8] {
        &self.buf
    }

    /// The payload alone.
    pub fn data(&self) -> &[u8] {
        &self.buf[4..]
    }

    /// Mutable access to the payload.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[4..]
    }
}

/// Appends `buf` to `out`, then zero padding to the next 4-byte
/// boundary.
pub fn put_bytes(out: &mut Vec<u8>, buf: &[u8]) {
    out.extend_from_slice(buf);
    out.resize(out.len() + pad_len(buf.len()), 0);
}

/// Copies `buf.len()` bytes out of `cursor`, consuming them and their
/// padding.
///
/// Fails with [`io::ErrorKind::InvalidData`] if the cursor is too
/// short or any pad byte is non-zero.
pub fn get_bytes(cursor: &mut &[u8], buf: &mut [u8]) -> io::Result<()> {
    let len = buf.len();
    let padded = len + pad_len(len);
    if cursor.len() < padded {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message too short for field",
        ));
    }
    buf.copy_from_slice(&cursor[..len]);
    if cursor[len..padded].iter().any(|&b| b != 0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "non-zero padding bytes encountered",
        ));
    }
    *cursor = &cursor[padded..];
    Ok(())
}
