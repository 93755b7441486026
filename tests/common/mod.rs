//! Fixture archives for the end-to-end tests, authored with the `zip`
//! crate so the engine is checked against an independent implementation.
#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Build an archive in memory. Names ending in `/` become directory
/// entries; everything else is a deflated file entry.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        if let Some(dir) = name.strip_suffix('/') {
            writer.add_directory(dir, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

/// An `outer.jar` holding `lib/inner.jar`, which holds `a/b.txt` = "hi".
pub fn write_nested_fixture(path: &Path) {
    let inner = zip_bytes(&[("a/b.txt", b"hi")]);
    write_zip(path, &[("lib/inner.jar", &inner)]);
}

pub fn read_all(mut stream: Box<dyn std::io::Read + Send>) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}
