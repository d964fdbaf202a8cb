use super::{Endianness, PointerSize, Result};
use std::io::Read;

/// Decoding of the primitive types named by the type catalog. Every decode
/// happens from an exactly-sized buffer the caller just read, so the slice
/// accessors here treat a too-short buffer as a programming error.
pub(crate) trait BlendPrimitive: Sized {
    fn parse(data: &[u8], endianness: Endianness) -> Self;
    /// Catalog type names this Rust type can decode. `char` is matched by both
    /// signed and unsigned readers since its C signedness is unspecified.
    fn matches(type_name: &str) -> bool;
}

impl BlendPrimitive for u8 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_u8(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "uchar" || type_name == "char"
    }
}

impl BlendPrimitive for i8 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_i8(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "char"
    }
}

impl BlendPrimitive for u16 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_u16(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "ushort"
    }
}

impl BlendPrimitive for i16 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_i16(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "short"
    }
}

impl BlendPrimitive for i32 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_i32(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "int"
    }
}

impl BlendPrimitive for i64 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_i64(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "int64_t"
    }
}

impl BlendPrimitive for u64 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_u64(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "uint64_t"
    }
}

impl BlendPrimitive for f32 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_f32(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "float"
    }
}

impl BlendPrimitive for f64 {
    fn parse(data: &[u8], endianness: Endianness) -> Self {
        parse_f64(data, endianness)
    }
    fn matches(type_name: &str) -> bool {
        type_name == "double"
    }
}

pub fn parse_u8(data: &[u8], _endianness: Endianness) -> u8 {
    data[0]
}

pub fn parse_i8(data: &[u8], _endianness: Endianness) -> i8 {
    data[0] as i8
}

pub fn parse_u16(data: &[u8], endianness: Endianness) -> u16 {
    let mut buf = [0; 2];
    buf.copy_from_slice(&data[..2]);
    match endianness {
        Endianness::Little => u16::from_le_bytes(buf),
        Endianness::Big => u16::from_be_bytes(buf),
    }
}

pub fn parse_i16(data: &[u8], endianness: Endianness) -> i16 {
    parse_u16(data, endianness) as i16
}

pub fn parse_u32(data: &[u8], endianness: Endianness) -> u32 {
    let mut buf = [0; 4];
    buf.copy_from_slice(&data[..4]);
    match endianness {
        Endianness::Little => u32::from_le_bytes(buf),
        Endianness::Big => u32::from_be_bytes(buf),
    }
}

pub fn parse_i32(data: &[u8], endianness: Endianness) -> i32 {
    parse_u32(data, endianness) as i32
}

pub fn parse_u64(data: &[u8], endianness: Endianness) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&data[..8]);
    match endianness {
        Endianness::Little => u64::from_le_bytes(buf),
        Endianness::Big => u64::from_be_bytes(buf),
    }
}

pub fn parse_i64(data: &[u8], endianness: Endianness) -> i64 {
    parse_u64(data, endianness) as i64
}

pub fn parse_f32(data: &[u8], endianness: Endianness) -> f32 {
    f32::from_bits(parse_u32(data, endianness))
}

pub fn parse_f64(data: &[u8], endianness: Endianness) -> f64 {
    f64::from_bits(parse_u64(data, endianness))
}

/// A stored pointer is an unsigned integer whose width comes from the file
/// header, widened to u64 so both widths share one representation.
pub fn parse_pointer(data: &[u8], endianness: Endianness, pointer_size: PointerSize) -> u64 {
    match pointer_size {
        PointerSize::Bits32 => u64::from(parse_u32(data, endianness)),
        PointerSize::Bits64 => parse_u64(data, endianness),
    }
}

/// Reads exactly `len` bytes from the current stream position. A short read
/// surfaces as `BlendError::TruncatedRead`, never as partial data.
pub fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_from<R: Read>(reader: &mut R, endianness: Endianness) -> Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(parse_u32(&buf, endianness))
}

pub fn read_pointer_from<R: Read>(
    reader: &mut R,
    endianness: Endianness,
    pointer_size: PointerSize,
) -> Result<u64> {
    let mut buf = [0; 8];
    let len = pointer_size.bytes_num();
    reader.read_exact(&mut buf[..len])?;
    Ok(parse_pointer(&buf[..len], endianness, pointer_size))
}
