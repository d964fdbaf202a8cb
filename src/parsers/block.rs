use super::{
    dna::{self, Dna},
    header::Header,
    primitive::{read_bytes, read_pointer_from, read_u32_from},
    BlendError, Result,
};
use log::warn;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroU64;

pub const CODE_DNA: [u8; 4] = *b"DNA1";
pub const CODE_END: [u8; 4] = *b"ENDB";

/// One block record: header facts plus the file offset of its payload. The
/// payload itself is never cached, queries seek to `data_offset` on demand.
/// A block is a homogeneous array of `count` structs of the catalog entry at
/// `sdna_index`, each `len / count` bytes wide.
#[derive(Debug, Clone)]
pub struct Block {
    pub code: [u8; 4],
    /// Payload length in bytes.
    pub len: usize,
    /// The address this data occupied when the file was written; the only
    /// identity pointers refer to. Zero means the block is unaddressable.
    pub address: Option<NonZeroU64>,
    /// Position of this block's struct in the catalog.
    pub sdna_index: usize,
    /// Number of consecutive struct instances in the payload.
    pub count: usize,
    pub data_offset: u64,
}

enum ScanStep {
    Block {
        code: [u8; 4],
        len: usize,
        address: Option<NonZeroU64>,
        sdna_index: usize,
        count: usize,
    },
    End,
    Truncated,
}

fn soft<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(BlendError::TruncatedRead) => Ok(None),
        Err(e) => Err(e),
    }
}

fn next_header<R: Read + Seek>(reader: &mut R, header: &Header) -> Result<ScanStep> {
    let mut code = [0u8; 4];
    match soft(reader.read_exact(&mut code).map_err(BlendError::from))? {
        Some(()) => {}
        None => return Ok(ScanStep::Truncated),
    }

    let len = match soft(read_u32_from(reader, header.endianness))? {
        Some(len) => len as usize,
        None => return Ok(ScanStep::Truncated),
    };

    // The terminal block carries no data; stopping here also covers the
    // legacy bare form that has no fields past the length.
    if code == CODE_END {
        return Ok(ScanStep::End);
    }

    let address = match soft(read_pointer_from(
        reader,
        header.endianness,
        header.pointer_size,
    ))? {
        Some(address) => NonZeroU64::new(address),
        None => return Ok(ScanStep::Truncated),
    };
    let sdna_index = match soft(read_u32_from(reader, header.endianness))? {
        Some(index) => index as usize,
        None => return Ok(ScanStep::Truncated),
    };
    let count = match soft(read_u32_from(reader, header.endianness))? {
        Some(count) => count as usize,
        None => return Ok(ScanStep::Truncated),
    };

    Ok(ScanStep::Block {
        code,
        len,
        address,
        sdna_index,
        count,
    })
}

/// Single forward pass over the file after the preamble: collects one `Block`
/// per header, skipping payloads, and decodes the DNA1 payload in-line so the
/// scan and the catalog agree on bytes consumed. A read underflow anywhere is
/// downgraded to a soft end-of-stream; a missing catalog is fatal.
pub fn scan<R: Read + Seek>(reader: &mut R, header: &Header) -> Result<(Vec<Block>, Dna)> {
    let mut blocks = Vec::new();
    let mut catalog = None;

    loop {
        match next_header(reader, header)? {
            ScanStep::End => break,
            ScanStep::Truncated => {
                warn!("file ends without a terminal block, treating as end of stream");
                break;
            }
            ScanStep::Block {
                code,
                len,
                address,
                sdna_index,
                count,
            } => {
                let data_offset = reader.seek(SeekFrom::Current(0))?;
                if code == CODE_DNA {
                    let payload = match soft(read_bytes(reader, len))? {
                        Some(payload) => payload,
                        None => {
                            warn!("catalog block is truncated, treating as end of stream");
                            break;
                        }
                    };
                    catalog = Some(dna::parse_dna(
                        &payload,
                        header.endianness,
                        header.pointer_size,
                    )?);
                } else {
                    blocks.push(Block {
                        code,
                        len,
                        address,
                        sdna_index,
                        count,
                        data_offset,
                    });
                    reader.seek(SeekFrom::Start(data_offset + len as u64))?;
                }
            }
        }
    }

    match catalog {
        Some(dna) => Ok((blocks, dna)),
        None => Err(BlendError::MissingSchema),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, FileBuilder};
    use crate::parsers::{Endianness, PointerSize};
    use std::io::Cursor;

    fn scan_bytes(data: Vec<u8>) -> Result<(Vec<Block>, Dna)> {
        let mut cursor = Cursor::new(data);
        let header = {
            let mut preamble = [0u8; Header::SIZE];
            cursor.read_exact(&mut preamble).unwrap();
            Header::parse(&preamble).unwrap()
        };
        scan(&mut cursor, &header)
    }

    #[test]
    fn collects_blocks_and_stops_at_endb() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder
            .block(*b"DATA", 0x1000, 0, 1, &fixtures::foo_payload_le(42, b"hi"))
            .dna();
        let (blocks, dna) = scan_bytes(builder.end()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, *b"DATA");
        assert_eq!(blocks[0].len, 12);
        assert_eq!(blocks[0].address.unwrap().get(), 0x1000);
        assert_eq!(blocks[0].count, 1);
        // code + len + address + sdna + count after the 12-byte preamble
        assert_eq!(blocks[0].data_offset, 12 + 24);
        assert!(dna.struct_index_of("Foo").is_some());
    }

    #[test]
    fn dna_block_is_consumed_not_indexed() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder
            .dna()
            .block(*b"DATA", 0x1000, 0, 1, &fixtures::foo_payload_le(1, b"x"));
        let (blocks, _) = scan_bytes(builder.end()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, *b"DATA");
    }

    #[test]
    fn truncated_stream_is_a_soft_stop() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder
            .dna()
            .block(*b"DATA", 0x1000, 0, 1, &fixtures::foo_payload_le(7, b"ok"));
        // No terminal block at all; the scan must still surface the blocks.
        let (blocks, _) = scan_bytes(builder.bytes()).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn legacy_bare_terminal_block() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder.dna();
        let mut data = builder.bytes();
        data.extend_from_slice(b"ENDB");
        data.extend_from_slice(&0u32.to_le_bytes());
        let (blocks, _) = scan_bytes(data).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn missing_catalog_is_fatal() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder.block(*b"DATA", 0x1000, 0, 1, &fixtures::foo_payload_le(1, b"x"));
        match scan_bytes(builder.end()) {
            Err(BlendError::MissingSchema) => {}
            other => panic!("expected MissingSchema, got {:?}", other),
        }
    }

    #[test]
    fn zero_addresses_are_kept_but_unaddressable() {
        let mut builder = FileBuilder::new(Endianness::Little, PointerSize::Bits64);
        builder
            .dna()
            .block(*b"DATA", 0, 0, 1, &fixtures::foo_payload_le(5, b"z"));
        let (blocks, _) = scan_bytes(builder.end()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].address.is_none());
    }

    #[test]
    fn scans_32bit_big_endian_files() {
        let mut builder = FileBuilder::new(Endianness::Big, PointerSize::Bits32);
        builder
            .dna()
            .block(*b"DATA", 0xBEEF, 0, 1, &fixtures::foo_payload_be(9, b"be"));
        let (blocks, dna) = scan_bytes(builder.end()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].address.unwrap().get(), 0xBEEF);
        let bar = &dna.structs[dna.struct_index_of("Bar").unwrap()];
        assert_eq!(bar.fields["link"].data_len, 4);
    }
}
