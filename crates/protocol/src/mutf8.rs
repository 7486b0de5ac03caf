//! Modified UTF-8 string encoding
//!
//! Strings on the wire use the encoding of Java's `DataOutputStream.writeUTF`,
//! which is what the libusb Android-manager client speaks:
//!
//! - `U+0000` is written as the two-byte sequence `C0 80`, never as a raw zero byte
//! - characters outside the BMP are written as a UTF-16 surrogate pair, three bytes
//!   per surrogate, instead of a four-byte UTF-8 sequence
//!
//! Everything else matches standard UTF-8.

use crate::error::{ProtocolError, Result};

/// Number of bytes `s` occupies once encoded
pub fn encoded_len(s: &str) -> usize {
    s.chars()
        .map(|c| match c as u32 {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            0x0800..=0xFFFF => 3,
            _ => 6,
        })
        .sum()
}

/// Encode a string as modified UTF-8
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    for c in s.chars() {
        let cp = c as u32;
        match cp {
            0x0001..=0x007F => out.push(cp as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (cp >> 6) as u8);
                out.push(0x80 | (cp & 0x3F) as u8);
            }
            0x0800..=0xFFFF => push_three(&mut out, cp as u16),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    push_three(&mut out, *unit);
                }
            }
        }
    }
    out
}

fn push_three(out: &mut Vec<u8>, unit: u16) {
    out.push(0xE0 | (unit >> 12) as u8);
    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
    out.push(0x80 | (unit & 0x3F) as u8);
}

/// Decode modified UTF-8 bytes into a string
///
/// Rejects the same byte patterns `DataInputStream.readUTF` rejects, plus lone
/// surrogates, which a Rust `String` cannot carry.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<(u16, usize)> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b >> 4 {
            0..=7 => {
                units.push((b as u16, i));
                i += 1;
            }
            12 | 13 => {
                let b2 = continuation(bytes, i + 1)?;
                units.push(((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16, i));
                i += 2;
            }
            14 => {
                let b2 = continuation(bytes, i + 1)?;
                let b3 = continuation(bytes, i + 2)?;
                let unit = (((b & 0x0F) as u16) << 12)
                    | (((b2 & 0x3F) as u16) << 6)
                    | (b3 & 0x3F) as u16;
                units.push((unit, i));
                i += 3;
            }
            _ => return Err(ProtocolError::MalformedString { offset: i }),
        }
    }

    let mut out = String::with_capacity(units.len());
    let mut iter = units.into_iter().peekable();
    while let Some((unit, offset)) = iter.next() {
        match unit {
            0xD800..=0xDBFF => {
                let low = match iter.peek() {
                    Some(&(low, _)) if (0xDC00..=0xDFFF).contains(&low) => low,
                    _ => return Err(ProtocolError::UnpairedSurrogate { offset }),
                };
                iter.next();
                let cp = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                out.push(char::from_u32(cp).ok_or(ProtocolError::UnpairedSurrogate { offset })?);
            }
            0xDC00..=0xDFFF => return Err(ProtocolError::UnpairedSurrogate { offset }),
            _ => out.push(
                char::from_u32(unit as u32).ok_or(ProtocolError::MalformedString { offset })?,
            ),
        }
    }

    Ok(out)
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b),
        _ => Err(ProtocolError::MalformedString { offset: at }),
    }
}
