//! Test-only builders for synthetic .blend streams: a catalog describing
//! `Foo { int a; char name[8]; }` and `Bar { Foo foo; float f; Foo *link; }`,
//! plus block/file assembly for both byte orders and pointer widths.

use crate::parsers::{Endianness, PointerSize};

fn push_u16(data: &mut Vec<u8>, endianness: Endianness, value: u16) {
    match endianness {
        Endianness::Little => data.extend_from_slice(&value.to_le_bytes()),
        Endianness::Big => data.extend_from_slice(&value.to_be_bytes()),
    }
}

fn push_u32(data: &mut Vec<u8>, endianness: Endianness, value: u32) {
    match endianness {
        Endianness::Little => data.extend_from_slice(&value.to_le_bytes()),
        Endianness::Big => data.extend_from_slice(&value.to_be_bytes()),
    }
}

fn push_pointer(data: &mut Vec<u8>, endianness: Endianness, size: PointerSize, value: u64) {
    match (endianness, size) {
        (Endianness::Little, PointerSize::Bits32) => {
            data.extend_from_slice(&(value as u32).to_le_bytes())
        }
        (Endianness::Big, PointerSize::Bits32) => {
            data.extend_from_slice(&(value as u32).to_be_bytes())
        }
        (Endianness::Little, PointerSize::Bits64) => data.extend_from_slice(&value.to_le_bytes()),
        (Endianness::Big, PointerSize::Bits64) => data.extend_from_slice(&value.to_be_bytes()),
    }
}

fn push_strings(data: &mut Vec<u8>, strings: &[&str]) {
    let before = data.len();
    for s in strings {
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    while (data.len() - before) % 4 != 0 {
        data.push(0);
    }
}

/// Encodes the test catalog as a DNA1 payload.
pub fn dna_payload(endianness: Endianness, pointer_size: PointerSize) -> Vec<u8> {
    let bar_size = 12 + 4 + pointer_size.bytes_num() as u16;

    let mut data = Vec::new();
    data.extend_from_slice(b"SDNA");

    data.extend_from_slice(b"NAME");
    push_u32(&mut data, endianness, 5);
    push_strings(&mut data, &["a", "name[8]", "foo", "f", "*link"]);

    data.extend_from_slice(b"TYPE");
    push_u32(&mut data, endianness, 5);
    push_strings(&mut data, &["int", "char", "float", "Foo", "Bar"]);

    data.extend_from_slice(b"TLEN");
    let before = data.len();
    for size in [4u16, 1, 4, 12, bar_size].iter() {
        push_u16(&mut data, endianness, *size);
    }
    while (data.len() - before) % 4 != 0 {
        data.push(0);
    }

    data.extend_from_slice(b"STRC");
    push_u32(&mut data, endianness, 2);
    // Foo
    push_u16(&mut data, endianness, 3);
    push_u16(&mut data, endianness, 2);
    push_u16(&mut data, endianness, 0); // int
    push_u16(&mut data, endianness, 0); // a
    push_u16(&mut data, endianness, 1); // char
    push_u16(&mut data, endianness, 1); // name[8]
    // Bar
    push_u16(&mut data, endianness, 4);
    push_u16(&mut data, endianness, 3);
    push_u16(&mut data, endianness, 3); // Foo
    push_u16(&mut data, endianness, 2); // foo
    push_u16(&mut data, endianness, 2); // float
    push_u16(&mut data, endianness, 3); // f
    push_u16(&mut data, endianness, 3); // Foo
    push_u16(&mut data, endianness, 4); // *link

    data
}

/// One `Foo` instance: a 4-byte int and an 8-byte nul-padded name.
pub fn foo_payload(endianness: Endianness, a: i32, name: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    push_u32(&mut data, endianness, a as u32);
    let mut buf = [0u8; 8];
    buf[..name.len()].copy_from_slice(name);
    data.extend_from_slice(&buf);
    data
}

pub fn foo_payload_le(a: i32, name: &[u8]) -> Vec<u8> {
    foo_payload(Endianness::Little, a, name)
}

pub fn foo_payload_be(a: i32, name: &[u8]) -> Vec<u8> {
    foo_payload(Endianness::Big, a, name)
}

/// One `Bar` instance: an embedded `Foo`, a float, and a stored pointer.
pub fn bar_payload(
    endianness: Endianness,
    pointer_size: PointerSize,
    a: i32,
    name: &[u8],
    f: f32,
    link: u64,
) -> Vec<u8> {
    let mut data = foo_payload(endianness, a, name);
    push_u32(&mut data, endianness, f.to_bits());
    push_pointer(&mut data, endianness, pointer_size, link);
    data
}

pub const FOO_SDNA: u32 = 0;
pub const BAR_SDNA: u32 = 1;

pub struct FileBuilder {
    endianness: Endianness,
    pointer_size: PointerSize,
    data: Vec<u8>,
}

impl FileBuilder {
    pub fn new(endianness: Endianness, pointer_size: PointerSize) -> Self {
        let mut data = b"BLENDER".to_vec();
        data.push(match pointer_size {
            PointerSize::Bits32 => b'_',
            PointerSize::Bits64 => b'-',
        });
        data.push(match endianness {
            Endianness::Little => b'v',
            Endianness::Big => b'V',
        });
        data.extend_from_slice(b"280");
        Self {
            endianness,
            pointer_size,
            data,
        }
    }

    pub fn block(
        &mut self,
        code: [u8; 4],
        address: u64,
        sdna_index: u32,
        count: u32,
        payload: &[u8],
    ) -> &mut Self {
        self.data.extend_from_slice(&code);
        push_u32(&mut self.data, self.endianness, payload.len() as u32);
        push_pointer(&mut self.data, self.endianness, self.pointer_size, address);
        push_u32(&mut self.data, self.endianness, sdna_index);
        push_u32(&mut self.data, self.endianness, count);
        self.data.extend_from_slice(payload);
        self
    }

    pub fn dna(&mut self) -> &mut Self {
        let payload = dna_payload(self.endianness, self.pointer_size);
        self.block(*b"DNA1", 0xD7A000, 0, 1, &payload)
    }

    /// Finishes the file with a full-width terminal block.
    pub fn end(&mut self) -> Vec<u8> {
        self.block(*b"ENDB", 0, 0, 0, &[]);
        self.data.clone()
    }

    /// The bytes so far, without any terminal block.
    pub fn bytes(&self) -> Vec<u8> {
        self.data.clone()
    }
}

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
    encoder.write_all(data).unwrap();
    encoder.finish().into_result().unwrap()
}
