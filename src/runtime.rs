use crate::parsers::{
    block::{self, Block},
    dna::{Dna, DnaField, DnaStruct},
    field::{parse_path, PathSegment},
    header::Header,
    primitive::{self, BlendPrimitive},
    BlendError, Endianness, Result,
};
use crate::source::Source;
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

/// A decoded field value. Pointer fields always decode to the stored address,
/// never to the pointed-at data; dereference through `Instance::get_pointer`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Pointer(u64),
    String(String),
    Bytes(Vec<u8>),
    Vector(Vec<Value>),
}

impl Value {
    /// Widens any integer-like value, including stored pointers, to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            Value::Pointer(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt8(v) => Some(u64::from(*v)),
            Value::UInt16(v) => Some(u64::from(*v)),
            Value::UInt32(v) => Some(u64::from(*v)),
            Value::UInt64(v) | Value::Pointer(v) => Some(*v),
            other => other.as_i64().and_then(|v| {
                if v >= 0 {
                    Some(v as u64)
                } else {
                    None
                }
            }),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for a stored null pointer.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Pointer(0))
    }
}

fn decode_scalar(type_name: &str, bytes_len: usize, data: &[u8], endianness: Endianness) -> Value {
    match type_name {
        "char" => Value::Int8(primitive::parse_i8(data, endianness)),
        "uchar" => Value::UInt8(primitive::parse_u8(data, endianness)),
        "short" => Value::Int16(primitive::parse_i16(data, endianness)),
        "ushort" => Value::UInt16(primitive::parse_u16(data, endianness)),
        "int" => Value::Int32(primitive::parse_i32(data, endianness)),
        "float" => Value::Float(primitive::parse_f32(data, endianness)),
        "double" => Value::Double(primitive::parse_f64(data, endianness)),
        "int64_t" => Value::Int64(primitive::parse_i64(data, endianness)),
        "uint64_t" => Value::UInt64(primitive::parse_u64(data, endianness)),
        // `long`/`ulong` vary by writer platform, the catalog size decides.
        "long" if bytes_len == 8 => Value::Int64(primitive::parse_i64(data, endianness)),
        "long" => Value::Int32(primitive::parse_i32(data, endianness)),
        "ulong" if bytes_len == 8 => Value::UInt64(primitive::parse_u64(data, endianness)),
        "ulong" => Value::UInt32(primitive::parse_u32(data, endianness)),
        _ => Value::Bytes(data.to_vec()),
    }
}

/// An open .blend file: the eagerly-built header, type catalog and block index
/// plus the single shared byte source every query seeks against. Queries are
/// lazy; nothing of a block's payload is read until a field is accessed.
pub struct Blend {
    source: RefCell<Source>,
    path: PathBuf,
    compressed: bool,
    dirty: Cell<bool>,
    pub header: Header,
    dna: Dna,
    blocks: Vec<Block>,
    by_code: HashMap<[u8; 4], Vec<usize>>,
    by_address: HashMap<NonZeroU64, usize>,
}

impl Blend {
    /// Opens a .blend file, plain or gzip-framed. The header, catalog and
    /// block index are built eagerly; any fatal condition aborts here and no
    /// partially-constructed handle escapes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Blend> {
        let path = path.as_ref().to_path_buf();
        let (mut source, compressed) = Source::open(&path)?;

        let mut preamble = [0u8; Header::SIZE];
        source.read_exact(&mut preamble)?;
        let header = Header::parse(&preamble)?;

        let (blocks, dna) = block::scan(&mut source, &header)?;

        let mut by_code: HashMap<[u8; 4], Vec<usize>> = HashMap::new();
        let mut by_address: HashMap<NonZeroU64, usize> = HashMap::new();
        for (i, block) in blocks.iter().enumerate() {
            by_code.entry(block.code).or_insert_with(Vec::new).push(i);
            if let Some(address) = block.address {
                if let Some(previous) = by_address.insert(address, i) {
                    // Last one in file order wins, matching what writers
                    // actually produce.
                    warn!(
                        "blocks #{} and #{} share address {:#x}",
                        previous,
                        i,
                        address.get()
                    );
                }
            }
        }

        debug!(
            "opened {}: version {}, {} blocks, {} structs",
            path.display(),
            header.version,
            blocks.len(),
            dna.structs.len()
        );

        Ok(Blend {
            source: RefCell::new(source),
            path,
            compressed,
            dirty: Cell::new(false),
            header,
            dna,
            blocks,
            by_code,
            by_address,
        })
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn dna(&self) -> &Dna {
        &self.dna
    }

    /// Every data block in file order.
    pub fn blocks(&self) -> impl Iterator<Item = Instance<'_>> {
        self.blocks.iter().map(move |block| self.instance(block))
    }

    /// All blocks sharing a 4-byte code, in file order.
    pub fn blocks_of_code(&self, code: [u8; 4]) -> Vec<Instance<'_>> {
        self.by_code
            .get(&code)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| self.instance(&self.blocks[i]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves a stored address back to its block. Zero and dangling
    /// addresses resolve to `None`; both are ordinary conditions in this
    /// format, not errors.
    pub fn block_at_address(&self, address: u64) -> Option<Instance<'_>> {
        NonZeroU64::new(address)
            .and_then(|address| self.by_address.get(&address))
            .map(|&i| self.instance(&self.blocks[i]))
    }

    /// Flushes any writes and closes the file. If the source was gzip-framed
    /// and was written to, the whole stream is recompressed over the original
    /// path in one pass. Without writes the on-disk bytes are left untouched.
    pub fn close(self) -> Result<()> {
        if self.dirty.get() {
            let mut source = self.source.into_inner();
            if self.compressed {
                source.recompress_to(&self.path)?;
            } else {
                source.flush()?;
            }
        }
        Ok(())
    }

    fn instance<'a>(&'a self, block: &'a Block) -> Instance<'a> {
        Instance {
            blend: self,
            block,
            sdna_index: block.sdna_index,
        }
    }

    fn struct_at(&self, sdna_index: usize) -> Result<&DnaStruct> {
        self.dna
            .structs
            .get(sdna_index)
            .ok_or(BlendError::InvalidSdnaIndex(sdna_index))
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; len];
        source.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(offset))?;
        source.write_all(data)?;
        self.dirty.set(true);
        Ok(())
    }
}

impl fmt::Debug for Blend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blend")
            .field("path", &self.path)
            .field("version", &self.header.version)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

/// A resolved path: the field it ends on, the absolute file offset of the
/// value, and how many array elements remain to decode (1 after indexing).
struct ResolvedField<'a> {
    field: &'a DnaField,
    offset: u64,
    array_len: usize,
}

/// A view of one block under a struct type. Created from the block's declared
/// type and optionally refined to a wider one; refinement is local to the
/// handle, the shared index never changes after open.
#[derive(Clone)]
pub struct Instance<'a> {
    blend: &'a Blend,
    block: &'a Block,
    sdna_index: usize,
}

impl<'a> Instance<'a> {
    pub fn code(&self) -> [u8; 4] {
        self.block.code
    }

    pub fn address(&self) -> Option<NonZeroU64> {
        self.block.address
    }

    /// Number of consecutive struct instances in this block.
    pub fn count(&self) -> usize {
        self.block.count
    }

    pub fn type_name(&self) -> &'a str {
        let strct = &self.blend.dna.structs[self.sdna_index];
        self.blend.dna.type_name(strct.type_index)
    }

    /// Reinterprets this handle under another struct type. Only widening (or
    /// equal-size) refinements are legal; narrowing could read past the
    /// block's allocation.
    pub fn refine_type(&mut self, type_name: &str) -> Result<()> {
        let dna = &self.blend.dna;
        let new_index = dna
            .struct_index_of(type_name)
            .ok_or_else(|| BlendError::UnknownType(type_name.to_string()))?;
        let current = &dna.structs[self.sdna_index];
        if dna.structs[new_index].bytes_len < current.bytes_len {
            return Err(BlendError::TypeRefinement {
                from: dna.type_name(current.type_index).to_string(),
                to: type_name.to_string(),
            });
        }
        self.sdna_index = new_index;
        Ok(())
    }

    /// Top-level field names of this instance's struct, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blend.dna.structs[self.sdna_index]
            .fields
            .keys()
            .map(|name| name.as_str())
    }

    /// `(name, value)` for every top-level field that decodes to a plain
    /// value. Embedded struct fields are skipped here; `items_recursive`
    /// walks into them.
    pub fn items(&self) -> Vec<(String, Value)> {
        let strct = &self.blend.dna.structs[self.sdna_index];
        strct
            .fields
            .keys()
            .filter_map(|name| self.get(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }

    /// Decodes the field at `path` in the first struct of the block.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.get_at(0, path)
    }

    /// Like `get`, but returns `default` when the path's head field doesn't
    /// exist in this struct. Fields come and go across file versions, so
    /// callers are expected to pass defaults for the optional ones.
    pub fn get_or(&self, path: &str, default: Value) -> Result<Value> {
        match self.get(path) {
            Err(BlendError::FieldNotFound(_)) => Ok(default),
            other => other,
        }
    }

    /// Decodes the field at `path` in the `element`-th struct of the block.
    pub fn get_at(&self, element: usize, path: &str) -> Result<Value> {
        let segments = parse_path(path)?;
        let resolved = self.resolve(self.element_offset(element)?, &segments)?;
        self.decode(&resolved)
    }

    /// Raw, full-width contents of a fixed-size byte buffer field, including
    /// any nul padding.
    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let segments = parse_path(path)?;
        let resolved = self.resolve(self.element_offset(0)?, &segments)?;
        let field = resolved.field;
        let element_len = self.blend.dna.types[field.type_index].bytes_len;
        if field.info.is_pointer() || element_len != 1 {
            return Err(BlendError::InvalidPath(format!(
                "field '{}' is not a byte buffer",
                field.name
            )));
        }
        self.blend
            .read_at(resolved.offset, resolved.array_len * element_len)
    }

    /// Follows a pointer field to the block it refers to. A stored null or an
    /// address no block claims both yield `None`.
    pub fn get_pointer(&self, path: &str) -> Result<Option<Instance<'a>>> {
        let segments = parse_path(path)?;
        let resolved = self.resolve(self.element_offset(0)?, &segments)?;
        if !resolved.field.info.is_pointer() {
            return Err(BlendError::InvalidPath(format!(
                "field '{}' is not a pointer",
                resolved.field.name
            )));
        }
        let width = self.blend.header.pointer_size.bytes_num();
        let data = self.blend.read_at(resolved.offset, width)?;
        let address = primitive::parse_pointer(
            &data,
            self.blend.header.endianness,
            self.blend.header.pointer_size,
        );
        Ok(self.blend.block_at_address(address))
    }

    /// `(full_path, value)` for every primitive leaf reachable from this
    /// instance, expanding embedded structs depth-first. Pointer and function
    /// pointer leaves are skipped: stored addresses change between saves even
    /// when content doesn't, and this iteration exists to fingerprint content.
    pub fn items_recursive(&self) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        self.collect_leaves(
            self.element_offset(0)?,
            self.sdna_index,
            String::new(),
            &mut out,
        )?;
        Ok(out)
    }

    /// Overwrites a fixed-width char buffer with `value`, truncated to the
    /// field width minus one and nul-padded to exactly the field width.
    pub fn set_string(&self, path: &str, value: &str) -> Result<()> {
        self.set_fixed_bytes(path, value.as_bytes())
    }

    /// Same policy as `set_string` for raw bytes.
    pub fn set_bytes(&self, path: &str, value: &[u8]) -> Result<()> {
        self.set_fixed_bytes(path, value)
    }

    pub fn get_i8(&self, path: &str) -> Result<i8> {
        self.get_primitive(path)
    }

    pub fn get_u8(&self, path: &str) -> Result<u8> {
        self.get_primitive(path)
    }

    pub fn get_i16(&self, path: &str) -> Result<i16> {
        self.get_primitive(path)
    }

    pub fn get_u16(&self, path: &str) -> Result<u16> {
        self.get_primitive(path)
    }

    pub fn get_i32(&self, path: &str) -> Result<i32> {
        self.get_primitive(path)
    }

    pub fn get_i64(&self, path: &str) -> Result<i64> {
        self.get_primitive(path)
    }

    pub fn get_u64(&self, path: &str) -> Result<u64> {
        self.get_primitive(path)
    }

    pub fn get_f32(&self, path: &str) -> Result<f32> {
        self.get_primitive(path)
    }

    pub fn get_f64(&self, path: &str) -> Result<f64> {
        self.get_primitive(path)
    }

    /// Nul-truncated text of a char buffer field.
    pub fn get_string(&self, path: &str) -> Result<String> {
        match self.get(path)? {
            Value::String(s) => Ok(s),
            Value::Bytes(bytes) => Ok(bytes
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect()),
            other => Err(BlendError::InvalidPath(format!(
                "field '{}' is not a string (got {:?})",
                path, other
            ))),
        }
    }

    fn element_offset(&self, element: usize) -> Result<u64> {
        let count = self.block.count.max(1);
        if element >= count {
            return Err(BlendError::InvalidPath(format!(
                "element {} out of range for a block of {}",
                element, count
            )));
        }
        let element_size = self.block.len / count;
        Ok(self.block.data_offset + (element * element_size) as u64)
    }

    /// Walks a parsed path from a struct base offset down to a single field,
    /// accumulating byte offsets from the catalog. No bytes are read here;
    /// resolution is pure layout arithmetic.
    fn resolve(&self, base: u64, segments: &[PathSegment]) -> Result<ResolvedField<'a>> {
        let dna = &self.blend.dna;
        let mut strct: &DnaStruct = self.blend.struct_at(self.sdna_index)?;
        let mut base = base;
        let mut i = 0;

        loop {
            let name = match &segments[i] {
                PathSegment::Field(name) => name,
                PathSegment::Index(_) => {
                    return Err(BlendError::InvalidPath(
                        "path must start with a field name".to_string(),
                    ))
                }
            };
            let field = strct
                .fields
                .get(name.as_str())
                .ok_or_else(|| BlendError::FieldNotFound(name.clone()))?;

            let mut offset = base + field.data_start as u64;
            let mut array_len = field.info.array_len();
            i += 1;

            while i < segments.len() {
                if let PathSegment::Index(index) = segments[i] {
                    if index >= array_len {
                        return Err(BlendError::InvalidPath(format!(
                            "index {} out of range for '{}' (len {})",
                            index, field.name, array_len
                        )));
                    }
                    let element_len = field.data_len / field.info.array_len();
                    offset += (index * element_len) as u64;
                    array_len = 1;
                    i += 1;
                } else {
                    break;
                }
            }

            if i == segments.len() {
                return Ok(ResolvedField {
                    field,
                    offset,
                    array_len,
                });
            }

            // More path left: the field so far must be an embedded struct.
            if field.info.is_pointer() {
                return Err(BlendError::InvalidPath(format!(
                    "cannot descend through pointer field '{}', dereference it first",
                    field.name
                )));
            }
            let type_name = dna.type_name(field.type_index);
            let child = dna.struct_index_of(type_name).ok_or_else(|| {
                BlendError::InvalidPath(format!(
                    "'{}' is a {}, not a struct",
                    field.name, type_name
                ))
            })?;
            strct = &dna.structs[child];
            base = offset;
        }
    }

    fn decode(&self, resolved: &ResolvedField<'_>) -> Result<Value> {
        let field = resolved.field;
        let dna = &self.blend.dna;
        let header = &self.blend.header;
        let ty = &dna.types[field.type_index];

        if field.info.is_pointer() {
            let width = header.pointer_size.bytes_num();
            let data = self
                .blend
                .read_at(resolved.offset, resolved.array_len * width)?;
            let mut pointers = data
                .chunks(width)
                .map(|chunk| {
                    Value::Pointer(primitive::parse_pointer(
                        chunk,
                        header.endianness,
                        header.pointer_size,
                    ))
                })
                .collect::<Vec<_>>();
            return Ok(if resolved.array_len == 1 {
                pointers.remove(0)
            } else {
                Value::Vector(pointers)
            });
        }

        if dna.struct_index_of(&ty.name).is_some() {
            return Err(BlendError::InvalidPath(format!(
                "field '{}' is a {} struct, access its members instead",
                field.name, ty.name
            )));
        }

        if resolved.array_len == 1 {
            let data = self.blend.read_at(resolved.offset, ty.bytes_len)?;
            return Ok(decode_scalar(
                &ty.name,
                ty.bytes_len,
                &data,
                header.endianness,
            ));
        }

        let data = self
            .blend
            .read_at(resolved.offset, resolved.array_len * ty.bytes_len)?;

        // Single-byte arrays are text buffers more often than not; `char`
        // decodes as nul-truncated text, `uchar` stays raw.
        if ty.name == "char" {
            return Ok(Value::String(
                data.iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect(),
            ));
        }
        if ty.bytes_len == 1 {
            return Ok(Value::Bytes(data));
        }

        Ok(Value::Vector(
            data.chunks(ty.bytes_len)
                .map(|chunk| decode_scalar(&ty.name, ty.bytes_len, chunk, header.endianness))
                .collect(),
        ))
    }

    fn get_primitive<U: BlendPrimitive>(&self, path: &str) -> Result<U> {
        let segments = parse_path(path)?;
        let resolved = self.resolve(self.element_offset(0)?, &segments)?;
        let ty = &self.blend.dna.types[resolved.field.type_index];

        if resolved.field.info.is_pointer() || resolved.array_len != 1 || !U::matches(&ty.name) {
            return Err(BlendError::InvalidPath(format!(
                "field '{}' is not a scalar {}",
                resolved.field.name, ty.name
            )));
        }

        let data = self.blend.read_at(resolved.offset, ty.bytes_len)?;
        Ok(U::parse(&data, self.blend.header.endianness))
    }

    fn set_fixed_bytes(&self, path: &str, value: &[u8]) -> Result<()> {
        let segments = parse_path(path)?;
        let resolved = self.resolve(self.element_offset(0)?, &segments)?;
        let field = resolved.field;
        let ty = &self.blend.dna.types[field.type_index];

        let is_char_buffer = !field.info.is_pointer()
            && ty.bytes_len == 1
            && self.blend.dna.struct_index_of(&ty.name).is_none();
        if !is_char_buffer {
            return Err(BlendError::UnsupportedWrite(field.name.clone()));
        }

        let width = resolved.array_len;
        let mut buf = vec![0; width];
        let copied = value.len().min(width.saturating_sub(1));
        buf[..copied].copy_from_slice(&value[..copied]);
        self.blend.write_at(resolved.offset, &buf)
    }

    fn collect_leaves(
        &self,
        base: u64,
        sdna_index: usize,
        prefix: String,
        out: &mut Vec<(String, Value)>,
    ) -> Result<()> {
        let dna = &self.blend.dna;
        let strct = self.blend.struct_at(sdna_index)?;

        for (name, field) in strct.fields.iter() {
            if field.info.is_pointer() {
                continue;
            }

            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            let ty = &dna.types[field.type_index];

            match dna.struct_index_of(&ty.name) {
                Some(child) => {
                    let len = field.info.array_len();
                    if len == 1 {
                        self.collect_leaves(base + field.data_start as u64, child, path, out)?;
                    } else {
                        for i in 0..len {
                            self.collect_leaves(
                                base + (field.data_start + i * ty.bytes_len) as u64,
                                child,
                                format!("{}[{}]", path, i),
                                out,
                            )?;
                        }
                    }
                }
                None => {
                    let resolved = ResolvedField {
                        field,
                        offset: base + field.data_start as u64,
                        array_len: field.info.array_len(),
                    };
                    out.push((path, self.decode(&resolved)?));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Instance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name())
            .field("code", &String::from_utf8_lossy(&self.block.code))
            .field("address", &self.block.address)
            .field("count", &self.block.count)
            .finish()
    }
}
