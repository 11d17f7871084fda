//! Minimal ISO9660 reader for extracting boot artifacts.
//!
//! Supports the primary volume descriptor, nested directories, `;1` version
//! suffixes, and case-insensitive lookups: enough to pull a kernel and
//! initrd out of an installer image. Joliet and Rock Ridge extensions are
//! not interpreted; lookups match the primary identifiers.

use crate::error::IsoError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SECTOR: u64 = 2048;

#[derive(Debug, Clone, Copy)]
struct DirRecord {
    extent: u64,
    size: u64,
    is_dir: bool,
}

/// Extracts one file from an ISO image into `dest`. Returns the byte count.
///
/// Runs the blocking parser on the blocking thread pool.
pub async fn extract_file(iso: PathBuf, inner_path: String, dest: PathBuf) -> Result<u64, IsoError> {
    tokio::task::spawn_blocking(move || extract_file_blocking(&iso, &inner_path, &dest))
        .await
        .map_err(|e| IsoError::Io(std::io::Error::other(e)))?
}

/// Synchronous extraction; see [`extract_file`].
pub fn extract_file_blocking(iso: &Path, inner_path: &str, dest: &Path) -> Result<u64, IsoError> {
    let mut image = File::open(iso)?;
    let root = find_root_directory(&mut image)?;

    let components: Vec<&str> = inner_path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(IsoError::NotFound(inner_path.to_string()));
    }

    let mut current = root;
    for (index, component) in components.iter().enumerate() {
        let is_last = index + 1 == components.len();
        current = lookup(&mut image, &current, component)?
            .ok_or_else(|| IsoError::NotFound(inner_path.to_string()))?;
        if current.is_dir == is_last {
            // found a directory where a file was expected, or vice versa
            return Err(IsoError::NotFound(inner_path.to_string()));
        }
    }

    let mut out = File::create(dest)?;
    copy_extent(&mut image, current.extent, current.size, &mut out)?;
    Ok(current.size)
}

fn find_root_directory(image: &mut File) -> Result<DirRecord, IsoError> {
    // volume descriptors start at sector 16; type 1 is the primary, 255 terminates
    let mut buf = [0u8; SECTOR as usize];
    for sector in 16..32 {
        read_sector(image, sector, &mut buf)?;
        if &buf[1..6] != b"CD001" {
            return Err(IsoError::NotIso("missing CD001 signature"));
        }
        match buf[0] {
            1 => {
                return parse_record(&buf[156..190])
                    .ok_or(IsoError::NotIso("malformed root directory record"));
            }
            255 => break,
            _ => {}
        }
    }
    Err(IsoError::NotIso("no primary volume descriptor"))
}

fn lookup(image: &mut File, dir: &DirRecord, name: &str) -> Result<Option<DirRecord>, IsoError> {
    let mut buf = [0u8; SECTOR as usize];
    let mut lba = dir.extent;
    let mut remaining = dir.size;
    while remaining > 0 {
        read_sector(image, lba, &mut buf)?;
        let mut offset = 0usize;
        while offset < buf.len() {
            let len = buf[offset] as usize;
            if len == 0 {
                // zero-length record pads to the end of the sector
                break;
            }
            if len < 34 || offset + len > buf.len() {
                return Err(IsoError::NotIso("malformed directory record"));
            }
            let record = &buf[offset..offset + len];
            if let Some(found) = match_record(record, name) {
                return Ok(Some(found));
            }
            offset += len;
        }
        lba += 1;
        remaining = remaining.saturating_sub(SECTOR);
    }
    Ok(None)
}

fn match_record(record: &[u8], name: &str) -> Option<DirRecord> {
    let id_len = record[32] as usize;
    if 33 + id_len > record.len() {
        return None;
    }
    let id = &record[33..33 + id_len];
    // 0x00 and 0x01 are the "." and ".." entries
    if id_len == 1 && (id[0] == 0x00 || id[0] == 0x01) {
        return None;
    }
    let id = String::from_utf8_lossy(id);
    let bare = id.split(';').next().unwrap_or("");
    let bare = bare.strip_suffix('.').unwrap_or(bare);
    if bare.eq_ignore_ascii_case(name) {
        parse_record(record)
    } else {
        None
    }
}

fn parse_record(record: &[u8]) -> Option<DirRecord> {
    if record.len() < 34 {
        return None;
    }
    Some(DirRecord {
        extent: u64::from(le_u32(&record[2..6])),
        size: u64::from(le_u32(&record[10..14])),
        is_dir: record[25] & 0x02 != 0,
    })
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_sector(image: &mut File, lba: u64, buf: &mut [u8; SECTOR as usize]) -> Result<(), IsoError> {
    image.seek(SeekFrom::Start(lba * SECTOR))?;
    image.read_exact(buf)?;
    Ok(())
}

fn copy_extent(image: &mut File, extent: u64, size: u64, out: &mut File) -> Result<(), IsoError> {
    image.seek(SeekFrom::Start(extent * SECTOR))?;
    let mut remaining = size;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = std::cmp::min(buf.len() as u64, remaining) as usize;
        let n = image.read(&mut buf[..want])?;
        if n == 0 {
            return Err(IsoError::NotIso("file extent truncated"));
        }
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(extent: u32, size: u32, flags: u8, id: &[u8]) -> Vec<u8> {
        let mut len = 33 + id.len();
        if len % 2 == 1 {
            len += 1;
        }
        let mut rec = vec![0u8; len];
        rec[0] = len as u8;
        rec[2..6].copy_from_slice(&extent.to_le_bytes());
        rec[6..10].copy_from_slice(&extent.to_be_bytes());
        rec[10..14].copy_from_slice(&size.to_le_bytes());
        rec[14..18].copy_from_slice(&size.to_be_bytes());
        rec[25] = flags;
        rec[32] = id.len() as u8;
        rec[33..33 + id.len()].copy_from_slice(id);
        rec
    }

    fn put_sector(image: &mut Vec<u8>, lba: usize, content: &[u8]) {
        let start = lba * SECTOR as usize;
        if image.len() < start + SECTOR as usize {
            image.resize(start + SECTOR as usize, 0);
        }
        image[start..start + content.len()].copy_from_slice(content);
    }

    /// Layout: PVD@16, terminator@17, root dir@18, BOOT dir@19, files@20/21.
    fn build_iso(kernel: &[u8], initrd: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();

        let mut pvd = vec![0u8; SECTOR as usize];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        let root = make_record(18, 2048, 0x02, &[0x00]);
        pvd[156..156 + root.len()].copy_from_slice(&root);
        put_sector(&mut image, 16, &pvd);

        let mut term = vec![0u8; SECTOR as usize];
        term[0] = 255;
        term[1..6].copy_from_slice(b"CD001");
        put_sector(&mut image, 17, &term);

        let mut root_dir = Vec::new();
        root_dir.extend(make_record(18, 2048, 0x02, &[0x00]));
        root_dir.extend(make_record(18, 2048, 0x02, &[0x01]));
        root_dir.extend(make_record(19, 2048, 0x02, b"BOOT"));
        put_sector(&mut image, 18, &root_dir);

        let mut boot_dir = Vec::new();
        boot_dir.extend(make_record(19, 2048, 0x02, &[0x00]));
        boot_dir.extend(make_record(18, 2048, 0x02, &[0x01]));
        boot_dir.extend(make_record(20, kernel.len() as u32, 0, b"VMLINUZ.;1"));
        boot_dir.extend(make_record(21, initrd.len() as u32, 0, b"INITRD.IMG;1"));
        put_sector(&mut image, 19, &boot_dir);

        put_sector(&mut image, 20, kernel);
        put_sector(&mut image, 21, initrd);
        image
    }

    #[test]
    fn extracts_nested_files_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("image.iso");
        std::fs::write(&iso_path, build_iso(b"kernel bytes", b"initrd bytes")).unwrap();

        let dest = dir.path().join("vmlinuz");
        let size = extract_file_blocking(&iso_path, "/boot/vmlinuz", &dest).unwrap();
        assert_eq!(size, 12);
        assert_eq!(std::fs::read(&dest).unwrap(), b"kernel bytes");

        let dest = dir.path().join("initrd");
        extract_file_blocking(&iso_path, "/BOOT/INITRD.IMG", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"initrd bytes");
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("image.iso");
        std::fs::write(&iso_path, build_iso(b"k", b"i")).unwrap();

        let dest = dir.path().join("out");
        let err = extract_file_blocking(&iso_path, "/boot/missing", &dest).unwrap_err();
        assert!(matches!(err, IsoError::NotFound(_)));

        // a directory where a file is expected is also not-found
        let err = extract_file_blocking(&iso_path, "/boot", &dest).unwrap_err();
        assert!(matches!(err, IsoError::NotFound(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("image.iso");
        std::fs::write(&iso_path, vec![0u8; 40 * SECTOR as usize]).unwrap();

        let dest = dir.path().join("out");
        let err = extract_file_blocking(&iso_path, "/boot/vmlinuz", &dest).unwrap_err();
        assert!(matches!(err, IsoError::NotIso(_)));
    }
}
