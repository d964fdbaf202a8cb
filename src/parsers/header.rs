use super::{BlendError, Endianness, PointerSize, Result as BlendResult};
use log::warn;
use nom::{
    branch::alt,
    bytes::complete::{tag, take},
    sequence::tuple,
    Err, IResult,
};

type Parse<'a, T> = IResult<&'a [u8], T, BlendError>;

/// The 12-byte preamble every .blend file starts with. Immutable once read; it
/// decides the width of every stored pointer and the byte order of every
/// integer in the rest of the file.
#[derive(Debug, Clone)]
pub struct Header {
    pub pointer_size: PointerSize,
    pub endianness: Endianness,
    /// Version of Blender used to save the file, e.g. 280. A value outside
    /// the known range is a warning at parse time, never an error.
    pub version: u32,
}

impl Header {
    pub const SIZE: usize = 12;

    /// Length of a full block header record under this file's pointer width:
    /// code (4) + length (4) + address (4 or 8) + sdna index (4) + count (4).
    pub fn block_header_len(&self) -> usize {
        16 + self.pointer_size.bytes_num()
    }

    /// Very old writers emitted a bare trailing terminal record carrying only
    /// a code and a length.
    pub const BARE_BLOCK_HEADER_LEN: usize = 8;

    /// Parses the preamble out of an exactly 12-byte buffer. Any magic or
    /// sentinel mismatch is a `Format` error.
    pub fn parse(input: &[u8]) -> BlendResult<Header> {
        match header(input) {
            Ok((_, header)) => Ok(header),
            Err(Err::Error(_)) | Err(Err::Failure(_)) => Err(BlendError::Format),
            Err(Err::Incomplete(..)) => Err(BlendError::TruncatedRead),
        }
    }
}

fn pointer_size_bits32(input: &[u8]) -> Parse<PointerSize> {
    let (input, _) = tag("_")(input)?;
    Ok((input, PointerSize::Bits32))
}

fn pointer_size_bits64(input: &[u8]) -> Parse<PointerSize> {
    let (input, _) = tag("-")(input)?;
    Ok((input, PointerSize::Bits64))
}

fn pointer_size(input: &[u8]) -> Parse<PointerSize> {
    alt((pointer_size_bits32, pointer_size_bits64))(input)
}

fn endianness_little(input: &[u8]) -> Parse<Endianness> {
    let (input, _) = tag("v")(input)?;
    Ok((input, Endianness::Little))
}

fn endianness_big(input: &[u8]) -> Parse<Endianness> {
    let (input, _) = tag("V")(input)?;
    Ok((input, Endianness::Big))
}

fn endianness(input: &[u8]) -> Parse<Endianness> {
    alt((endianness_little, endianness_big))(input)
}

fn version(input: &[u8]) -> Parse<u32> {
    let (input, digits) = take(3_usize)(input)?;
    let version = match std::str::from_utf8(digits).ok().and_then(|s| s.parse().ok()) {
        Some(version) => {
            if version < 100 {
                warn!("implausible blender version {} in header", version);
            }
            version
        }
        None => {
            warn!("non-numeric version bytes {:?} in header", digits);
            0
        }
    };
    Ok((input, version))
}

fn header(input: &[u8]) -> Parse<Header> {
    let (input, _) = tag("BLENDER")(input)?;
    let (input, (pointer_size, endianness, version)) =
        tuple((pointer_size, endianness, version))(input)?;

    Ok((
        input,
        Header {
            pointer_size,
            endianness,
            version,
        },
    ))
}
