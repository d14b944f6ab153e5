use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::dtype::{read_err, write_err, OpbError};

/// `"OPBin1\0"`: five identifying bytes, an ASCII version digit, and a
/// terminating NUL.
pub const OPB_MAGIC: [u8; 7] = *b"OPBin1\0";
pub const OPB_HEADER_SIZE: u64 = 7;
/// First byte past the magic, format byte and the three backpatched 32-bit
/// header fields; the instrument table starts here.
pub const OPB_DATA_START: u64 = OPB_HEADER_SIZE + 13;
/// On-wire size of one instrument table entry.
pub const OPB_INSTRUMENT_SIZE: u64 = 9;

/// Number of bytes the variable-length encoding of `value` occupies.
pub fn uint7_size(value: u32) -> usize {
    if value >= 2097152 {
        4
    } else if value >= 16384 {
        3
    } else if value >= 128 {
        2
    } else {
        1
    }
}

/// Encode `value` as a little-endian base-128 integer into `buf`, returning
/// the number of bytes used. Bytes carry seven value bits with the top bit
/// marking continuation; a fourth byte carries all eight remaining bits and
/// never a continuation flag.
pub fn encode_uint7(value: u32, buf: &mut [u8; 4]) -> usize {
    let count = uint7_size(value);
    for (i, byte) in buf.iter_mut().enumerate().take(count) {
        let mut b = ((value >> (7 * i)) & 0x7F) as u8;
        if i + 1 < count {
            b |= 0x80;
        }
        *byte = b;
    }
    if count == 4 {
        buf[3] = (value >> 21) as u8;
    }
    count
}

pub fn write_uint7<W: Write>(writer: &mut W, value: u32) -> Result<usize, OpbError> {
    let mut buf = [0u8; 4];
    let count = encode_uint7(value, &mut buf);
    writer.write_all(&buf[..count]).map_err(write_err)?;
    Ok(count)
}

pub fn read_uint7<R: Read>(reader: &mut R) -> Result<u32, OpbError> {
    let mut value = 0u32;
    let mut shift = 0;
    for i in 0..4 {
        let b = reader.read_u8().map_err(read_err)?;
        if i == 3 {
            value |= u32::from(b) << shift;
        } else {
            value |= u32::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        shift += 7;
    }
    Ok(value)
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, OpbError> {
    reader.read_u8().map_err(read_err)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn round_trip(value: u32) -> (usize, u32) {
        let mut out = Vec::new();
        let written = write_uint7(&mut out, value).unwrap();
        assert_eq!(written, out.len());
        let decoded = read_uint7(&mut Cursor::new(&out)).unwrap();
        (written, decoded)
    }

    #[test]
    fn uint7_size_boundaries() {
        assert_eq!(uint7_size(0), 1);
        assert_eq!(uint7_size(127), 1);
        assert_eq!(uint7_size(128), 2);
        assert_eq!(uint7_size(16383), 2);
        assert_eq!(uint7_size(16384), 3);
        assert_eq!(uint7_size(2097151), 3);
        assert_eq!(uint7_size(2097152), 4);
        assert_eq!(uint7_size((1 << 28) - 1), 4);
    }

    #[test]
    fn uint7_round_trip() {
        for value in [
            0u32,
            1,
            127,
            128,
            129,
            300,
            16383,
            16384,
            99999,
            2097151,
            2097152,
            123456789,
            (1 << 28) - 1,
        ] {
            let (written, decoded) = round_trip(value);
            assert_eq!(written, uint7_size(value), "length for {value}");
            assert_eq!(decoded, value, "round trip for {value}");
        }
    }

    #[test]
    fn uint7_wire_layout() {
        let mut out = Vec::new();
        write_uint7(&mut out, 0).unwrap();
        assert_eq!(out, [0x00]);

        out.clear();
        write_uint7(&mut out, 300).unwrap();
        assert_eq!(out, [0xAC, 0x02]);

        out.clear();
        write_uint7(&mut out, 16384).unwrap();
        assert_eq!(out, [0x80, 0x80, 0x01]);

        // the final byte of a four-byte value has no continuation bit
        out.clear();
        write_uint7(&mut out, 2097152).unwrap();
        assert_eq!(out, [0x80, 0x80, 0x80, 0x01]);
    }

    #[test]
    fn uint7_short_read_fails() {
        let err = read_uint7(&mut Cursor::new(&[0x80u8])).unwrap_err();
        assert_eq!(err, OpbError::Read);
    }
}
