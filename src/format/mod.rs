//! Zip-format layer: entry metadata, central-directory parsing, entry
//! decompression. Nothing here knows about contexts or handlers.

mod entry;
mod parse;
mod read;

pub use entry::{Compression, RawZipEntry, dos_to_system_time, is_archive_name};
pub use parse::{entry_data_offset, parse_central_directory};
pub use read::{EntryDecoder, decoder_for, read_entry};
