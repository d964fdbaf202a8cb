//! # Blendfile - a lazy parser for .blend files from Blender
//!
//! ## Example
//!
//! ```ignore
//! use blendfile::Blend;
//!
//! /// Prints the name and location of every object.
//! fn main() -> blendfile::Result<()> {
//!     let blend = Blend::open("file.blend")?;
//!
//!     for obj in blend.blocks_of_code(*b"OB\0\0") {
//!         let name = obj.get_string("id.name")?;
//!         let loc = obj.get("loc")?;
//!
//!         println!("\"{}\" at {:?}", name, loc);
//!     }
//!
//!     blend.close()
//! }
//! ```
//!
//! ## The .blend file
//!
//! Blender saves by dumping its memory to disk: a .blend file is a list of
//! C-like structs which can contain primitives, arrays, pointers and other
//! structs. Because struct layouts change between versions, the file carries
//! its own type catalog (the "DNA") in a dedicated block, and every other
//! block names its struct by an index into that catalog. Cross-references
//! between blocks are the heap addresses the data had when it was written;
//! this crate resolves them back through an address index built at open time.
//!
//! ## This crate
//!
//! Opening a file eagerly reads the header, decodes the catalog and scans the
//! block headers, but none of the block payloads: every field access seeks to
//! the exact bytes it needs and decodes them on the spot. Access is by path
//! expression, so `obj.get("id.name")` and `obj.get("data[4]")` walk nested
//! structs and arrays without decoding anything else. Pointer fields decode to
//! their stored address; `get_pointer` turns an address back into a block.
//!
//! Fields may be absent in files written by other Blender versions, which is
//! why `get_or` takes a default, and why integer widths are best read through
//! the `Value` coercion helpers rather than matched exactly.
//!
//! There is one narrow write path: fixed-width char buffers (names and paths
//! inside the file) can be overwritten in place with `set_string`/`set_bytes`.
//! Compressed files are detected by their gzip magic, inflated into memory up
//! front, and recompressed over the original path on close when written to.
//!
//! ## Warnings
//!
//! This crate is meant to be used with trusted .blend files. Malformed files
//! are rejected or opened degraded where the format allows it, but no attempt
//! is made to validate that decoded values make semantic sense.

pub mod parsers;
pub mod runtime;
pub mod source;

#[cfg(test)]
pub(crate) mod fixtures;

pub use parsers::{
    block::Block,
    dna::{Dna, DnaField, DnaStruct, DnaType},
    field::{FieldInfo, PathSegment},
    header::Header,
    BlendError, Endianness, PointerSize, Result,
};
pub use runtime::{Blend, Instance, Value};
