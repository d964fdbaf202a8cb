use crate::parsers::Result;
use libflate::gzip;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Uniform seekable byte source over either a plain .blend file or the fully
/// decompressed contents of a gzip-framed one. Decompression is not streamed,
/// the whole stream is inflated into a random-access buffer up front so every
/// later query can seek freely.
pub enum Source {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

impl Source {
    /// Opens `path` and sniffs the gzip magic. Plain files keep their handle
    /// (read+write when the filesystem permits, read-only otherwise, in which
    /// case a later write simply fails with the OS error); gzip files are
    /// inflated into memory. Returns the source and whether it was compressed.
    pub fn open(path: &Path) -> Result<(Source, bool)> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(_) => File::open(path)?,
        };

        let mut magic = [0u8; 2];
        let is_gzip = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(0))?;

        if is_gzip {
            let mut decoder = gzip::Decoder::new(file)?;
            let mut data = Vec::new();
            decoder.read_to_end(&mut data)?;
            debug!("inflated gzip source to {} bytes", data.len());
            Ok((Source::Memory(Cursor::new(data)), true))
        } else {
            Ok((Source::File(file), false))
        }
    }

    /// Re-encodes the whole (modified) stream over `path` in one pass. Used at
    /// close time when a gzip-framed file was written to.
    pub fn recompress_to(&mut self, path: &Path) -> Result<()> {
        self.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.read_to_end(&mut data)?;

        let file = File::create(path)?;
        let mut encoder = gzip::Encoder::new(file)?;
        encoder.write_all(&data)?;
        encoder.finish().into_result()?;
        debug!("recompressed {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(file) => file.read(buf),
            Source::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for Source {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Source::File(file) => file.seek(pos),
            Source::Memory(cursor) => cursor.seek(pos),
        }
    }
}

impl Write for Source {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Source::File(file) => file.write(buf),
            Source::Memory(cursor) => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Source::File(file) => file.flush(),
            Source::Memory(cursor) => cursor.flush(),
        }
    }
}
