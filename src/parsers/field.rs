use super::{BlendError, Result as BlendResult};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_till1, take_until},
    combinator::complete,
    multi::{many0, many1, separated_list},
    sequence::delimited,
    Err, IResult,
};

type Parse<'a, T> = IResult<&'a str, T, BlendError>;

/// Shape of a field as declared by its catalog name: `"len"` is a plain value,
/// `"*next"` a pointer, `"mat[4][4]"` a value array, `"(*free)()"` a function
/// pointer and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInfo {
    Value,
    ValueArray {
        len: usize,
        dimensions: Vec<usize>,
    },
    Pointer {
        indirection_count: usize,
    },
    PointerArray {
        indirection_count: usize,
        len: usize,
        dimensions: Vec<usize>,
    },
    FnPointer,
}

impl FieldInfo {
    /// Product of every bracketed dimension in the declaration, 1 for scalars.
    pub fn array_len(&self) -> usize {
        match self {
            FieldInfo::Value | FieldInfo::Pointer { .. } | FieldInfo::FnPointer => 1,
            FieldInfo::ValueArray { len, .. } | FieldInfo::PointerArray { len, .. } => *len,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            FieldInfo::Pointer { .. } | FieldInfo::PointerArray { .. } | FieldInfo::FnPointer
        )
    }
}

fn fn_pointer(input: &str) -> Parse<(&str, FieldInfo)> {
    let (input, name) = delimited(tag("(*"), take_until(")"), tag(")"))(input)?;
    let (input, _) = delimited(tag("("), take_until(")"), tag(")"))(input)?;

    Ok((input, (name, FieldInfo::FnPointer)))
}

fn array_dimensions(input: &str) -> Parse<Vec<usize>> {
    let (input, dimension_strs) =
        many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let mut dimensions = Vec::new();
    for dimension_str in dimension_strs {
        dimensions.push(dimension_str.parse::<usize>().map_err(|_| {
            Err::Failure(BlendError::InvalidPath(format!(
                "bad array size '{}'",
                dimension_str
            )))
        })?);
    }

    Ok((input, dimensions))
}

fn pointer(input: &str) -> Parse<(&str, FieldInfo)> {
    let (input, asterisks) = many1(tag("*"))(input)?;
    let (input, name) = take_till(|c| c == '[')(input)?;

    if !input.is_empty() {
        let (input, dimensions) = array_dimensions(input)?;
        let len = dimensions.iter().product();
        Ok((
            input,
            (
                name,
                FieldInfo::PointerArray {
                    indirection_count: asterisks.len(),
                    len,
                    dimensions,
                },
            ),
        ))
    } else {
        Ok((
            input,
            (
                name,
                FieldInfo::Pointer {
                    indirection_count: asterisks.len(),
                },
            ),
        ))
    }
}

fn value(input: &str) -> Parse<(&str, FieldInfo)> {
    let (input, name) = take_till(|c| c == '[')(input)?;
    if !input.is_empty() {
        let (input, dimensions) = array_dimensions(input)?;
        let len = dimensions.iter().product();
        Ok((input, (name, FieldInfo::ValueArray { len, dimensions })))
    } else {
        Ok((input, (name, FieldInfo::Value)))
    }
}

/// Parses one catalog field declaration into its stripped base name and shape.
pub fn parse_field(input: &str) -> Parse<(&str, FieldInfo)> {
    alt((fn_pointer, pointer, value))(input)
}

/// One step of a field path: a struct member by name, or an element of the
/// array reached so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

fn path_component(input: &str) -> Parse<Vec<PathSegment>> {
    let (input, name) = take_till1(|c| c == '.' || c == '[')(input)?;
    let (input, index_strs) =
        many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let mut segments = vec![PathSegment::Field(name.to_string())];
    for index_str in index_strs {
        segments.push(PathSegment::Index(index_str.parse::<usize>().map_err(
            |_| {
                Err::Failure(BlendError::InvalidPath(format!(
                    "bad array index '{}'",
                    index_str
                )))
            },
        )?));
    }

    Ok((input, segments))
}

/// Parses a dotted/bracketed path expression like `"id.name"` or `"data[4]"`
/// into its segments.
pub fn parse_path(path: &str) -> BlendResult<Vec<PathSegment>> {
    let components = match separated_list(tag("."), path_component)(path) {
        Ok(("", components)) if !components.is_empty() => components,
        Ok((rest, _)) => {
            return Err(BlendError::InvalidPath(format!(
                "could not parse '{}' at '{}'",
                path, rest
            )))
        }
        Err(Err::Error(e)) | Err(Err::Failure(e)) => return Err(e),
        Err(Err::Incomplete(..)) => {
            return Err(BlendError::InvalidPath(format!("incomplete path '{}'", path)))
        }
    };

    Ok(components.into_iter().flatten().collect())
}
