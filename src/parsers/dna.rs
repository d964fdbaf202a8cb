use super::{
    field::{parse_field, FieldInfo},
    BlendError, Endianness, PointerSize, Result as BlendResult,
};
use linked_hash_map::LinkedHashMap;
use log::{debug, warn};
use nom::{
    bytes::complete::{tag, take, take_while},
    combinator::map,
    multi::count,
    number::complete::{be_u16, be_u32, le_u16, le_u32},
    sequence::terminated,
    Err, IResult,
};
use std::collections::HashMap;

type Parse<'a, T> = IResult<&'a [u8], T, BlendError>;

/// One entry of the catalog's type table: a type name and its size in bytes.
/// Primitives and structs share this table; struct entries additionally appear
/// in `Dna::structs`.
#[derive(Debug)]
pub struct DnaType {
    pub name: String,
    pub bytes_len: usize,
}

/// A field of a catalog struct with its layout fully computed: offsets are
/// assigned by linear accumulation in declaration order, the format stores
/// structures pre-packed so no padding is modeled.
#[derive(Debug, Clone)]
pub struct DnaField {
    /// Base name with `*`, `()` and `[..]` decorations stripped.
    pub name: String,
    pub info: FieldInfo,
    /// Index into `Dna::types`.
    pub type_index: usize,
    /// Byte offset of this field from the start of its struct.
    pub data_start: usize,
    /// Total width of this field: element size times array length.
    pub data_len: usize,
}

/// A struct definition from the catalog. The position of a `DnaStruct` in
/// `Dna::structs` is the "sdna index" every block header refers to.
#[derive(Debug)]
pub struct DnaStruct {
    /// Index into `Dna::types` for this struct's name and size.
    pub type_index: usize,
    pub bytes_len: usize,
    /// Fields in declaration order, addressable by base name.
    pub fields: LinkedHashMap<String, DnaField>,
}

/// The type catalog decoded from the DNA1 block: the names, types and struct
/// layouts used to interpret every other block in the file.
#[derive(Debug)]
pub struct Dna {
    pub names: Vec<String>,
    pub types: Vec<DnaType>,
    pub structs: Vec<DnaStruct>,
    struct_by_type: HashMap<String, usize>,
}

impl Dna {
    /// Looks up the sdna index registered for a struct type name.
    pub fn struct_index_of(&self, type_name: &str) -> Option<usize> {
        self.struct_by_type.get(type_name).copied()
    }

    pub fn type_name(&self, type_index: usize) -> &str {
        &self.types[type_index].name
    }
}

struct RawStruct {
    type_index: usize,
    /// (type index, name index) per field, as stored.
    fields: Vec<(usize, usize)>,
}

#[derive(Debug)]
pub struct DnaParseContext {
    endianness: Endianness,
    pointer_size: PointerSize,
}

fn pad_to_4(consumed: usize) -> usize {
    (4 - consumed % 4) % 4
}

impl DnaParseContext {
    pub fn new(endianness: Endianness, pointer_size: PointerSize) -> Self {
        Self {
            endianness,
            pointer_size,
        }
    }

    fn u32<'a>(&self, input: &'a [u8]) -> Parse<'a, u32> {
        match self.endianness {
            Endianness::Little => le_u32(input),
            Endianness::Big => be_u32(input),
        }
    }

    fn u16<'a>(&self, input: &'a [u8]) -> Parse<'a, u16> {
        match self.endianness {
            Endianness::Little => le_u16(input),
            Endianness::Big => be_u16(input),
        }
    }

    /// Reads a tagged list of nul-terminated strings, then skips the padding
    /// that realigns the cursor to a 4-byte boundary. The list start is always
    /// 4-aligned relative to the payload, so aligning the consumed length is
    /// equivalent to aligning the absolute position.
    fn string_table<'a>(&self, section: &'static str, input: &'a [u8]) -> Parse<'a, Vec<String>> {
        let (input, _) = tag(section)(input)?;
        let (input, len) = self.u32(input)?;

        let before = input.len();
        let (input, names) = count(
            terminated(
                map(take_while(|b: u8| b != 0), |b: &[u8]| {
                    String::from_utf8_lossy(b).into_owned()
                }),
                tag("\0"),
            ),
            len as usize,
        )(input)?;
        let consumed = before - input.len();
        let (input, _) = take(pad_to_4(consumed))(input)?;

        Ok((input, names))
    }

    fn types<'a>(&self, input: &'a [u8]) -> Parse<'a, Vec<DnaType>> {
        let (input, type_names) = self.string_table("TYPE", input)?;

        let (input, _) = tag("TLEN")(input)?;
        let (input, type_lengths) = count(
            match self.endianness {
                Endianness::Little => le_u16,
                Endianness::Big => be_u16,
            },
            type_names.len(),
        )(input)?;
        let (input, _) = take(pad_to_4(type_names.len() * 2))(input)?;

        Ok((
            input,
            type_names
                .into_iter()
                .zip(type_lengths)
                .map(|(name, length)| DnaType {
                    name,
                    bytes_len: usize::from(length),
                })
                .collect(),
        ))
    }

    fn structs<'a>(&self, input: &'a [u8]) -> Parse<'a, Vec<RawStruct>> {
        let (input, _) = tag("STRC")(input)?;
        let (input, structs_len) = self.u32(input)?;

        let mut structs = Vec::with_capacity(structs_len as usize);
        let mut rest = input;
        for _ in 0..structs_len {
            let (input, type_index) = self.u16(rest)?;
            let (input, fields_len) = self.u16(input)?;

            let mut fields = Vec::with_capacity(usize::from(fields_len));
            let mut next = input;
            for _ in 0..fields_len {
                let (input, field_type_index) = self.u16(next)?;
                let (input, field_name_index) = self.u16(input)?;
                next = input;

                fields.push((usize::from(field_type_index), usize::from(field_name_index)));
            }
            rest = next;

            structs.push(RawStruct {
                type_index: usize::from(type_index),
                fields,
            });
        }

        Ok((rest, structs))
    }

    pub fn dna<'a>(&self, input: &'a [u8]) -> Parse<'a, Dna> {
        let (input, _) = tag("SDNA")(input)?;
        let (input, names) = self.string_table("NAME", input)?;
        let (input, types) = self.types(input)?;
        let (input, raw_structs) = self.structs(input)?;

        let dna = match self.link(names, types, raw_structs) {
            Ok(dna) => dna,
            Err(e) => return Err(Err::Failure(e)),
        };

        Ok((input, dna))
    }

    /// Turns the three parallel tables into fully laid-out structs: parses
    /// every declaration name once, computes field widths (pointer width for
    /// pointer names, type size otherwise, times the array length), assigns
    /// cumulative offsets, and registers each struct under its type name at
    /// its catalog position.
    fn link(
        &self,
        names: Vec<String>,
        types: Vec<DnaType>,
        raw_structs: Vec<RawStruct>,
    ) -> BlendResult<Dna> {
        let mut parsed_names = Vec::with_capacity(names.len());
        for name in &names {
            match parse_field(name) {
                Ok((_, (base, info))) => parsed_names.push((base.to_string(), info)),
                Err(Err::Error(e)) | Err(Err::Failure(e)) => return Err(e),
                Err(Err::Incomplete(..)) => {
                    return Err(BlendError::InvalidPath(format!(
                        "unparseable field declaration '{}'",
                        name
                    )))
                }
            }
        }

        let mut structs = Vec::with_capacity(raw_structs.len());
        let mut struct_by_type = HashMap::with_capacity(raw_structs.len());
        for raw in raw_structs {
            let mut fields = LinkedHashMap::with_capacity(raw.fields.len());
            let mut data_start = 0;
            for (type_index, name_index) in raw.fields {
                let (base, info) = parsed_names[name_index].clone();
                let data_len = match &info {
                    FieldInfo::Pointer { .. } | FieldInfo::FnPointer => {
                        self.pointer_size.bytes_num()
                    }
                    FieldInfo::PointerArray { len, .. } => self.pointer_size.bytes_num() * len,
                    FieldInfo::Value => types[type_index].bytes_len,
                    FieldInfo::ValueArray { len, .. } => types[type_index].bytes_len * len,
                };

                fields.insert(
                    base.clone(),
                    DnaField {
                        name: base,
                        info,
                        type_index,
                        data_start,
                        data_len,
                    },
                );
                data_start += data_len;
            }

            let bytes_len = types[raw.type_index].bytes_len;
            if data_start != bytes_len {
                warn!(
                    "struct '{}' declares {} bytes but its fields span {}",
                    types[raw.type_index].name, bytes_len, data_start
                );
            }

            struct_by_type.insert(types[raw.type_index].name.clone(), structs.len());
            structs.push(DnaStruct {
                type_index: raw.type_index,
                bytes_len,
                fields,
            });
        }

        debug!(
            "catalog: {} names, {} types, {} structs",
            names.len(),
            types.len(),
            structs.len()
        );

        Ok(Dna {
            names,
            types,
            structs,
            struct_by_type,
        })
    }
}

/// Decodes a DNA1 block payload into the type catalog.
pub fn parse_dna(
    payload: &[u8],
    endianness: Endianness,
    pointer_size: PointerSize,
) -> BlendResult<Dna> {
    let context = DnaParseContext::new(endianness, pointer_size);
    match context.dna(payload) {
        Ok((_, dna)) => Ok(dna),
        Err(Err::Error(e)) | Err(Err::Failure(e)) => Err(e),
        Err(Err::Incomplete(..)) => Err(BlendError::TruncatedRead),
    }
}
