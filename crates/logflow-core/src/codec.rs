//! Wire Frame Codec
//!
//! Binary framing for records crossing an external log transport. The layout
//! is fixed and versionless:
//!
//! ```text
//! [key_len:  i32 big-endian]
//! [key:      key_len bytes, UTF-8]
//! [flags:    u8   {bit0 = poison, bit1 = force-batch}]
//! [value_len: i32 big-endian, 0 when there is no payload]
//! [value:    value_len bytes]
//! ```
//!
//! The codec is exact: `decode(encode(r)) == r` for every constructible
//! record. Decoding is defensive - truncated buffers, negative lengths,
//! oversized sections, non-UTF-8 keys, unknown flag bits and contradictory
//! flags are all rejected rather than propagated.

use crate::error::{Error, Result};
use crate::record::Record;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound for a single key or value section.
///
/// Keeps a corrupt length prefix from triggering a giant allocation.
pub const MAX_SECTION_LEN: usize = 16 * 1024 * 1024;

/// Encode a record into its wire frame.
pub fn encode(record: &Record) -> Bytes {
    let key = record.key().as_bytes();
    let value = record.value().map(|v| v.as_ref()).unwrap_or(&[]);
    let mut buf = BytesMut::with_capacity(4 + key.len() + 1 + 4 + value.len());
    buf.put_i32(key.len() as i32);
    buf.put_slice(key);
    buf.put_u8(record.flags());
    buf.put_i32(value.len() as i32);
    buf.put_slice(value);
    buf.freeze()
}

/// Decode a single record frame from `buf`, consuming exactly one frame.
pub fn decode(buf: &mut impl Buf) -> Result<Record> {
    let key_len = read_len(buf, "key")?;
    if key_len == 0 {
        return Err(Error::InvalidFrame("zero-length key".into()));
    }
    let key_bytes = read_section(buf, key_len, "key")?;
    let key = String::from_utf8(key_bytes.to_vec())
        .map_err(|_| Error::InvalidFrame("key is not valid UTF-8".into()))?;

    if buf.remaining() < 1 {
        return Err(Error::InvalidFrame("frame truncated before flags".into()));
    }
    let flags = buf.get_u8();

    let value_len = read_len(buf, "value")?;
    let value = if value_len == 0 {
        None
    } else {
        Some(read_section(buf, value_len, "value")?)
    };

    Record::from_wire(key, value, flags)
}

/// Decode a frame from a standalone slice, rejecting trailing garbage.
pub fn decode_exact(frame: &[u8]) -> Result<Record> {
    let mut buf = frame;
    let record = decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(Error::InvalidFrame(format!(
            "{} trailing bytes after frame",
            buf.remaining()
        )));
    }
    Ok(record)
}

fn read_len(buf: &mut impl Buf, section: &str) -> Result<usize> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidFrame(format!(
            "frame truncated before {section} length"
        )));
    }
    let len = buf.get_i32();
    if len < 0 {
        return Err(Error::InvalidFrame(format!(
            "negative {section} length {len}"
        )));
    }
    let len = len as usize;
    if len > MAX_SECTION_LEN {
        return Err(Error::FrameTooLarge(len, MAX_SECTION_LEN));
    }
    Ok(len)
}

fn read_section(buf: &mut impl Buf, len: usize, section: &str) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(Error::InvalidFrame(format!(
            "frame truncated inside {section}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_plain() {
        let r = Record::of("doc-42", "some payload").unwrap();
        let frame = encode(&r);
        assert_eq!(decode_exact(&frame).unwrap(), r);
    }

    #[test]
    fn test_roundtrip_no_value() {
        let r = Record::of_key("doc-42").unwrap();
        assert_eq!(decode_exact(&encode(&r)).unwrap(), r);
    }

    #[test]
    fn test_roundtrip_control_flags() {
        for r in [Record::poison("k").unwrap(), Record::force_batch("k").unwrap()] {
            assert_eq!(decode_exact(&encode(&r)).unwrap(), r);
        }
    }

    #[test]
    fn test_layout_is_stable() {
        let r = Record::of("ab", "xy").unwrap();
        let frame = encode(&r);
        assert_eq!(
            frame.as_ref(),
            &[0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 2, b'x', b'y']
        );
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = encode(&Record::of("key", "value").unwrap());
        for cut in 0..frame.len() {
            assert!(decode_exact(&frame[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_negative_length_rejected() {
        let frame = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        assert!(matches!(
            decode_exact(&frame),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut frame = BytesMut::new();
        frame.put_i32((MAX_SECTION_LEN + 1) as i32);
        assert!(matches!(
            decode_exact(&frame),
            Err(Error::FrameTooLarge(_, _))
        ));
    }

    #[test]
    fn test_both_flags_rejected() {
        // key "k", flags = poison | force, no value
        let frame = [0, 0, 0, 1, b'k', 0b11, 0, 0, 0, 0];
        assert!(matches!(
            decode_exact(&frame),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_unknown_flag_bits_rejected() {
        let frame = [0, 0, 0, 1, b'k', 0b100, 0, 0, 0, 0];
        assert!(matches!(
            decode_exact(&frame),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = encode(&Record::of_key("k").unwrap()).to_vec();
        frame.push(0);
        assert!(decode_exact(&frame).is_err());
    }
}
