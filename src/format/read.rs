use std::io::{Read, Seek};

use flate2::read::DeflateDecoder;

use crate::error::ZipFormatError;

use super::entry::{Compression, RawZipEntry};
use super::parse::entry_data_offset;

/// Read and decompress one entry into memory.
///
/// Used for nested-archive buffering and the in-memory sources, where the
/// whole payload is needed anyway.
pub fn read_entry<R: Read + Seek>(
    reader: &mut R,
    entry: &RawZipEntry,
) -> Result<Vec<u8>, ZipFormatError> {
    let offset = entry_data_offset(reader, entry)?;
    reader.seek(std::io::SeekFrom::Start(offset))?;

    let mut compressed = vec![0u8; entry.compressed_size as usize];
    reader.read_exact(&mut compressed)?;
    decompress(entry, &compressed)
}

fn decompress(entry: &RawZipEntry, compressed: &[u8]) -> Result<Vec<u8>, ZipFormatError> {
    match entry.compression {
        Compression::Stored => Ok(compressed.to_vec()),
        Compression::Deflate => {
            let mut out = Vec::with_capacity(entry.size as usize);
            let mut decoder = DeflateDecoder::new(compressed);
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Unknown(id) => Err(ZipFormatError::UnsupportedCompression(id)),
    }
}

/// Wrap a reader positioned at an entry's compressed payload with the
/// decoder its compression method requires.
pub fn decoder_for<R: Read>(
    entry: &RawZipEntry,
    compressed: R,
) -> Result<EntryDecoder<R>, ZipFormatError> {
    match entry.compression {
        Compression::Stored => Ok(EntryDecoder::Stored(compressed)),
        Compression::Deflate => Ok(EntryDecoder::Deflate(DeflateDecoder::new(compressed))),
        Compression::Unknown(id) => Err(ZipFormatError::UnsupportedCompression(id)),
    }
}

/// Streaming decoder over an entry payload.
pub enum EntryDecoder<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> Read for EntryDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            EntryDecoder::Stored(r) => r.read(buf),
            EntryDecoder::Deflate(r) => r.read(buf),
        }
    }
}
