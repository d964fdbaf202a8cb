pub mod block;
pub mod dna;
pub mod field;
pub mod header;
pub mod primitive;

use nom::error::{ErrorKind, ParseError};
use std::{fmt, io};

pub type Result<T> = std::result::Result<T, BlendError>;

/// Size of a pointer on the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerSize {
    Bits32,
    Bits64,
}

impl PointerSize {
    /// Returns the pointer size in bytes.
    pub fn bytes_num(self) -> usize {
        match self {
            PointerSize::Bits32 => 4,
            PointerSize::Bits64 => 8,
        }
    }
}

/// Endianness of the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Errors that can happen while parsing or querying a .blend file. Parse-time
/// errors abort opening entirely; per-query errors are scoped to that query and
/// leave the already-built block index and type catalog intact.
#[derive(Debug)]
pub enum BlendError {
    /// Wrapper for errors produced inside the nom parsers.
    NomError {
        kind: ErrorKind,
        other: Option<Box<BlendError>>,
    },
    Io(io::Error),
    /// The file doesn't start with `b"BLENDER"`, or the pointer-size/endianness
    /// sentinel bytes in the header are not one of the known values.
    Format,
    /// No DNA1 block was found anywhere in the file. Without the embedded type
    /// catalog none of the other blocks can be interpreted.
    MissingSchema,
    /// A read ended before the requested number of bytes. The block scan
    /// downgrades this to a soft end-of-stream; everywhere else it propagates.
    TruncatedRead,
    /// The named field doesn't exist in the struct being accessed. Callers can
    /// recover by supplying a default, see `Instance::get_or`.
    FieldNotFound(String),
    /// A path expression is malformed, indexes past an array's length, or
    /// tries to descend through a field that isn't a struct.
    InvalidPath(String),
    /// A block header declared a struct index past the end of the catalog.
    InvalidSdnaIndex(usize),
    /// `refine_type` was asked to narrow a block to a smaller struct, which
    /// would allow reads past the block's allocation.
    TypeRefinement { from: String, to: String },
    /// The requested type name has no struct definition in the catalog.
    UnknownType(String),
    /// `set` is only implemented for fixed-width char/uchar buffers; writing
    /// any other field kind fails instead of silently corrupting the file.
    UnsupportedWrite(String),
}

impl fmt::Display for BlendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendError::NomError { kind, .. } => write!(f, "parse error: {:?}", kind),
            BlendError::Io(err) => write!(f, "i/o error: {}", err),
            BlendError::Format => write!(f, "not a .blend file: bad magic or header sentinel"),
            BlendError::MissingSchema => write!(f, "no DNA1 block in file"),
            BlendError::TruncatedRead => write!(f, "file ended in the middle of a record"),
            BlendError::FieldNotFound(name) => write!(f, "no field named '{}'", name),
            BlendError::InvalidPath(msg) => write!(f, "invalid path: {}", msg),
            BlendError::InvalidSdnaIndex(index) => {
                write!(f, "sdna index {} is out of range", index)
            }
            BlendError::TypeRefinement { from, to } => {
                write!(f, "cannot refine '{}' to smaller type '{}'", from, to)
            }
            BlendError::UnknownType(name) => write!(f, "no struct named '{}' in catalog", name),
            BlendError::UnsupportedWrite(name) => {
                write!(f, "field '{}' is not a writable char buffer", name)
            }
        }
    }
}

impl std::error::Error for BlendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlendError::Io(err) => Some(err),
            BlendError::NomError {
                other: Some(other), ..
            } => Some(other),
            _ => None,
        }
    }
}

impl From<io::Error> for BlendError {
    fn from(err: io::Error) -> BlendError {
        // Short reads are their own condition, the scan loop needs to tell
        // them apart from real i/o failures.
        if err.kind() == io::ErrorKind::UnexpectedEof {
            BlendError::TruncatedRead
        } else {
            BlendError::Io(err)
        }
    }
}

impl ParseError<&[u8]> for BlendError {
    fn from_error_kind(_input: &[u8], kind: ErrorKind) -> Self {
        BlendError::NomError { kind, other: None }
    }

    fn append(_input: &[u8], kind: ErrorKind, other: Self) -> Self {
        BlendError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

impl ParseError<&str> for BlendError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        BlendError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        BlendError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}
