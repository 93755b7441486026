//! Central-directory parsing.
//!
//! Archives are read from the end: the end-of-central-directory record is
//! located first (scanning past an optional comment), ZIP64 records are
//! consulted when the 32-bit fields are saturated, and the central
//! directory is then read in one pass.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::ZipFormatError;

use super::entry::{Compression, RawZipEntry};

const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
const EOCD_SIZE: u64 = 22;
const ZIP64_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";
const ZIP64_LOCATOR_SIZE: u64 = 20;
const ZIP64_EOCD_SIGNATURE: &[u8] = b"PK\x06\x06";
const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
const LFH_SIZE: u64 = 30;

/// Longest comment the format allows; bounds the EOCD back-scan.
const MAX_COMMENT: u64 = 65_535;

struct Eocd {
    total_entries: u64,
    cd_size: u64,
    cd_offset: u64,
}

/// Parse every entry of the archive's central directory, in directory order.
pub fn parse_central_directory<R: Read + Seek>(
    reader: &mut R,
) -> Result<Vec<RawZipEntry>, ZipFormatError> {
    let len = reader.seek(SeekFrom::End(0))?;
    let eocd = find_eocd(reader, len)?;

    if eocd.cd_offset.checked_add(eocd.cd_size).is_none_or(|end| end > len) {
        return Err(ZipFormatError::Truncated(format!(
            "central directory at {} + {} exceeds archive of {} bytes",
            eocd.cd_offset, eocd.cd_size, len
        )));
    }

    reader.seek(SeekFrom::Start(eocd.cd_offset))?;
    let mut cd = vec![0u8; eocd.cd_size as usize];
    reader.read_exact(&mut cd)?;

    let mut cursor = Cursor::new(cd.as_slice());
    let mut entries = Vec::with_capacity(eocd.total_entries as usize);
    for _ in 0..eocd.total_entries {
        entries.push(parse_cdfh(&mut cursor)?);
    }
    Ok(entries)
}

fn find_eocd<R: Read + Seek>(reader: &mut R, len: u64) -> Result<Eocd, ZipFormatError> {
    if len < EOCD_SIZE {
        return Err(ZipFormatError::MissingEocd);
    }

    // Common case: no archive comment, EOCD is the last 22 bytes.
    reader.seek(SeekFrom::Start(len - EOCD_SIZE))?;
    let mut tail = [0u8; EOCD_SIZE as usize];
    reader.read_exact(&mut tail)?;
    if &tail[..4] == EOCD_SIGNATURE && tail[20..22] == [0, 0] {
        return read_eocd(reader, &tail, len - EOCD_SIZE);
    }

    // Otherwise scan backwards through the comment window.
    let window = (MAX_COMMENT + EOCD_SIZE).min(len);
    let start = len - window;
    reader.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; window as usize];
    reader.read_exact(&mut buf)?;

    for i in (0..buf.len().saturating_sub(EOCD_SIZE as usize)).rev() {
        if &buf[i..i + 4] == EOCD_SIGNATURE {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EOCD_SIZE as usize {
                let record: [u8; EOCD_SIZE as usize] =
                    buf[i..i + EOCD_SIZE as usize].try_into().unwrap();
                return read_eocd(reader, &record, start + i as u64);
            }
        }
    }

    Err(ZipFormatError::MissingEocd)
}

fn read_eocd<R: Read + Seek>(
    reader: &mut R,
    record: &[u8; EOCD_SIZE as usize],
    eocd_offset: u64,
) -> Result<Eocd, ZipFormatError> {
    let mut cursor = Cursor::new(&record[4..]);
    let _disk_number = cursor.read_u16::<LittleEndian>()?;
    let _disk_with_cd = cursor.read_u16::<LittleEndian>()?;
    let _disk_entries = cursor.read_u16::<LittleEndian>()?;
    let total_entries = cursor.read_u16::<LittleEndian>()?;
    let cd_size = cursor.read_u32::<LittleEndian>()?;
    let cd_offset = cursor.read_u32::<LittleEndian>()?;

    let needs_zip64 =
        total_entries == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF;
    if !needs_zip64 {
        return Ok(Eocd {
            total_entries: total_entries as u64,
            cd_size: cd_size as u64,
            cd_offset: cd_offset as u64,
        });
    }

    read_zip64_eocd(reader, eocd_offset)
}

fn read_zip64_eocd<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<Eocd, ZipFormatError> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_LOCATOR_SIZE)
        .ok_or(ZipFormatError::InvalidRecord("zip64 locator"))?;
    reader.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; ZIP64_LOCATOR_SIZE as usize];
    reader.read_exact(&mut locator)?;
    if &locator[..4] != ZIP64_LOCATOR_SIGNATURE {
        return Err(ZipFormatError::InvalidRecord("zip64 locator"));
    }
    let eocd64_offset = u64::from_le_bytes(locator[8..16].try_into().unwrap());

    reader.seek(SeekFrom::Start(eocd64_offset))?;
    let mut rec = [0u8; 56];
    reader.read_exact(&mut rec)?;
    if &rec[..4] != ZIP64_EOCD_SIGNATURE {
        return Err(ZipFormatError::InvalidRecord("zip64 end of central directory"));
    }

    let mut cursor = Cursor::new(&rec[4..]);
    let _eocd64_size = cursor.read_u64::<LittleEndian>()?;
    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _disk_number = cursor.read_u32::<LittleEndian>()?;
    let _disk_with_cd = cursor.read_u32::<LittleEndian>()?;
    let _disk_entries = cursor.read_u64::<LittleEndian>()?;
    let total_entries = cursor.read_u64::<LittleEndian>()?;
    let cd_size = cursor.read_u64::<LittleEndian>()?;
    let cd_offset = cursor.read_u64::<LittleEndian>()?;

    Ok(Eocd {
        total_entries,
        cd_size,
        cd_offset,
    })
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<RawZipEntry, ZipFormatError> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(ZipFormatError::InvalidRecord("central directory file header"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression = cursor.read_u16::<LittleEndian>()?;
    let dos_time = cursor.read_u16::<LittleEndian>()?;
    let dos_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as u64;
    let comment_len = cursor.read_u16::<LittleEndian>()? as u64;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name_bytes = vec![0u8; name_len];
    cursor.read_exact(&mut name_bytes)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();
    let is_directory = name.ends_with('/');

    // ZIP64 extended information lives in extra field 0x0001 and only
    // carries the fields whose 32-bit forms are saturated.
    let extra_end = cursor.position() + extra_len;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        if header_id == 0x0001 {
            if size == 0xFFFF_FFFF && cursor.position() + 8 <= extra_end {
                size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= extra_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if header_offset == 0xFFFF_FFFF && cursor.position() + 8 <= extra_end {
                header_offset = cursor.read_u64::<LittleEndian>()?;
            }
            break;
        }
        cursor.set_position(cursor.position() + field_size);
    }
    cursor.set_position(extra_end + comment_len);

    Ok(RawZipEntry {
        name,
        compression: Compression::from_u16(compression),
        compressed_size,
        size,
        crc32,
        header_offset,
        dos_time,
        dos_date,
        is_directory,
    })
}

/// Locate the payload of `entry` by reading its local file header.
///
/// The local header repeats the name and extra fields with lengths that may
/// differ from the central directory, so the data offset cannot be computed
/// from the central record alone.
pub fn entry_data_offset<R: Read + Seek>(
    reader: &mut R,
    entry: &RawZipEntry,
) -> Result<u64, ZipFormatError> {
    reader.seek(SeekFrom::Start(entry.header_offset))?;
    let mut lfh = [0u8; LFH_SIZE as usize];
    reader.read_exact(&mut lfh)?;
    if &lfh[..4] != LFH_SIGNATURE {
        return Err(ZipFormatError::InvalidRecord("local file header"));
    }

    let name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as u64;
    let extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as u64;
    Ok(entry.header_offset + LFH_SIZE + name_len + extra_len)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::testutil::zip_bytes;

    #[test]
    fn central_directory_roundtrip() {
        let bytes = zip_bytes(&[
            ("dir/", b""),
            ("dir/a.txt", b"alpha"),
            ("b.bin", &[7u8; 1024]),
        ]);
        let entries = parse_central_directory(&mut Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(entries.len(), 3);

        let dir = entries.iter().find(|e| e.name == "dir/").unwrap();
        assert!(dir.is_directory);

        let a = entries.iter().find(|e| e.name == "dir/a.txt").unwrap();
        assert!(!a.is_directory);
        assert_eq!(a.size, 5);

        let b = entries.iter().find(|e| e.name == "b.bin").unwrap();
        assert_eq!(b.size, 1024);
    }

    #[test]
    fn archive_with_comment() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment("fixture comment, long enough to move the record");
        writer
            .start_file("x.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let entries = parse_central_directory(&mut Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x.txt");
    }

    #[test]
    fn rejects_non_archives() {
        let err = parse_central_directory(&mut Cursor::new(&b"plain text"[..])).unwrap_err();
        assert!(matches!(err, ZipFormatError::MissingEocd));

        let mut junk = vec![0u8; 4096];
        junk[0] = b'P';
        let err = parse_central_directory(&mut Cursor::new(junk.as_slice())).unwrap_err();
        assert!(matches!(err, ZipFormatError::MissingEocd));
    }

    #[test]
    fn data_offset_skips_local_header() {
        let bytes = zip_bytes(&[("f.txt", b"payload")]);
        let entries = parse_central_directory(&mut Cursor::new(bytes.as_slice())).unwrap();
        let offset = entry_data_offset(&mut Cursor::new(bytes.as_slice()), &entries[0]).unwrap();
        // 30-byte local header plus the 5-byte name, no extra field is
        // guaranteed, so just check the payload lands inside the file.
        assert!(offset >= 35);
        assert!(offset + entries[0].compressed_size <= bytes.len() as u64);
    }
}
