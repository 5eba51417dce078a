//! MP4 atom (box) relocation: rewrite a file so the "moov" atom precedes
//! "mdat" (a streaming-friendly layout), patching the sample-to-chunk
//! offset tables ("stco"/"co64") inside "moov" to account for the shift.
//!
//! No crate in this codebase's stack parses MP4 containers, so this is
//! hand-rolled `std::io::{Read, Seek}` box parsing, in the same spirit as
//! the manual binary parsing used elsewhere (the record store's binary
//! format, the segment bitmap).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const CONTAINER_TYPES: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"udta", b"edts", b"dinf", b"mvex",
];

#[derive(Debug, thiserror::Error)]
pub enum Mp4RelocateError {
    #[error("input file missing or empty")]
    InputUnreadable,
    #[error("missing ftyp signature")]
    NotMp4,
    #[error("insufficient free space for relocation")]
    InsufficientSpace,
    #[error("moov atom not found")]
    MoovNotFound,
    #[error("mdat atom not found")]
    MdatNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct BoxHeader {
    offset: u64,
    size: u64,
    box_type: [u8; 4],
    header_len: u64,
}

fn read_box_header(f: &mut File, offset: u64) -> std::io::Result<Option<BoxHeader>> {
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 8];
    let n = f.read(&mut buf)?;
    if n < 8 {
        return Ok(None);
    }
    let size32 = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let mut box_type = [0u8; 4];
    box_type.copy_from_slice(&buf[4..8]);

    let (size, header_len) = if size32 == 1 {
        let mut ext = [0u8; 8];
        f.read_exact(&mut ext)?;
        (u64::from_be_bytes(ext), 16)
    } else {
        (size32 as u64, 8)
    };

    Ok(Some(BoxHeader {
        offset,
        size,
        box_type,
        header_len,
    }))
}

fn top_level_boxes(f: &mut File) -> std::io::Result<Vec<BoxHeader>> {
    let len = f.metadata()?.len();
    let mut boxes = Vec::new();
    let mut pos = 0u64;
    while pos < len {
        match read_box_header(f, pos)? {
            Some(h) if h.size >= h.header_len => {
                pos = h.offset + h.size;
                boxes.push(h);
            }
            _ => break,
        }
    }
    Ok(boxes)
}

/// Validate that relocation is worth attempting: input exists, is
/// non-empty and readable; the destination directory has at least
/// `2 * input_size` free space; and the file's first bytes contain an
/// `ftyp` signature at offset 4..8.
pub fn validate_for_relocation(input: &Path, dest_dir: &Path) -> Result<u64, Mp4RelocateError> {
    let meta = std::fs::metadata(input).map_err(|_| Mp4RelocateError::InputUnreadable)?;
    if meta.len() == 0 {
        return Err(Mp4RelocateError::InputUnreadable);
    }

    let mut f = File::open(input).map_err(|_| Mp4RelocateError::InputUnreadable)?;
    let mut sig = [0u8; 8];
    f.read_exact(&mut sig).map_err(|_| Mp4RelocateError::NotMp4)?;
    if &sig[4..8] != b"ftyp" {
        return Err(Mp4RelocateError::NotMp4);
    }

    if let Ok(avail) = available_space(dest_dir) {
        if avail < meta.len().saturating_mul(2) {
            return Err(Mp4RelocateError::InsufficientSpace);
        }
    }

    Ok(meta.len())
}

#[cfg(unix)]
fn available_space(dir: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())?;
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
fn available_space(_dir: &Path) -> std::io::Result<u64> {
    Ok(u64::MAX)
}

/// Patch every `stco`/`co64` chunk-offset table found (recursively) inside
/// the given byte range of `moov`'s contents by adding `delta`.
fn patch_chunk_offsets(buf: &mut [u8], delta: i64) {
    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let size = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        if size < 8 || pos + size > buf.len() {
            break;
        }
        let box_type = &buf[pos + 4..pos + 8];

        if CONTAINER_TYPES.iter().any(|t| t.as_slice() == box_type) {
            patch_chunk_offsets(&mut buf[pos + 8..pos + size], delta);
        } else if box_type == b"stco" {
            let count_off = pos + 12;
            if count_off + 4 <= buf.len() {
                let count = u32::from_be_bytes(buf[count_off..count_off + 4].try_into().unwrap());
                let mut entry = count_off + 4;
                for _ in 0..count {
                    if entry + 4 > buf.len() {
                        break;
                    }
                    let v = u32::from_be_bytes(buf[entry..entry + 4].try_into().unwrap());
                    let new_v = (v as i64 + delta).max(0) as u32;
                    buf[entry..entry + 4].copy_from_slice(&new_v.to_be_bytes());
                    entry += 4;
                }
            }
        } else if box_type == b"co64" {
            let count_off = pos + 12;
            if count_off + 4 <= buf.len() {
                let count = u32::from_be_bytes(buf[count_off..count_off + 4].try_into().unwrap());
                let mut entry = count_off + 4;
                for _ in 0..count {
                    if entry + 8 > buf.len() {
                        break;
                    }
                    let v = u64::from_be_bytes(buf[entry..entry + 8].try_into().unwrap());
                    let new_v = (v as i64 + delta).max(0) as u64;
                    buf[entry..entry + 8].copy_from_slice(&new_v.to_be_bytes());
                    entry += 8;
                }
            }
        }

        pos += size;
    }
}

/// Rewrite `input` to `output` with "moov" relocated before "mdat". If
/// "moov" is already before "mdat", this is a plain copy.
pub fn relocate_moov(input: &Path, output: &Path) -> Result<(), Mp4RelocateError> {
    let mut f = File::open(input)?;
    let boxes = top_level_boxes(&mut f)?;

    let moov = boxes
        .iter()
        .find(|b| &b.box_type == b"moov")
        .ok_or(Mp4RelocateError::MoovNotFound)?;
    let mdat = boxes
        .iter()
        .find(|b| &b.box_type == b"mdat")
        .ok_or(Mp4RelocateError::MdatNotFound)?;

    if moov.offset < mdat.offset {
        std::fs::copy(input, output)?;
        return Ok(());
    }

    let mut moov_bytes = vec![0u8; moov.size as usize];
    f.seek(SeekFrom::Start(moov.offset))?;
    f.read_exact(&mut moov_bytes)?;

    // moov moves to sit immediately before mdat; every chunk offset inside
    // it must shift forward by moov's own size.
    let delta = moov.size as i64;
    patch_chunk_offsets(&mut moov_bytes[8..], delta);

    let mut out = File::create(output)?;
    for b in &boxes {
        if b.offset == moov.offset {
            continue;
        }
        if b.offset == mdat.offset {
            out.write_all(&moov_bytes)?;
        }
        let mut chunk = vec![0u8; b.size as usize];
        f.seek(SeekFrom::Start(b.offset))?;
        f.read_exact(&mut chunk)?;
        out.write_all(&chunk)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_box(buf: &mut Vec<u8>, box_type: &[u8; 4], payload: &[u8]) {
        let size = (8 + payload.len()) as u32;
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(box_type);
        buf.extend_from_slice(payload);
    }

    fn sample_mp4_with_mdat_first() -> Vec<u8> {
        let mut buf = Vec::new();
        write_box(&mut buf, b"ftyp", b"isom____");

        // mdat first, 16 bytes of payload.
        write_box(&mut buf, b"mdat", &[0xAAu8; 16]);

        // moov containing a minimal trak/mdia/minf/stbl/stco with one
        // chunk offset pointing at the mdat payload start (offset of the
        // byte right after mdat's 8-byte header, within the original file).
        let mdat_payload_offset = (8 + 8) as u32; // ftyp box (16 bytes) + mdat header (8 bytes)
        let mut stco_payload = Vec::new();
        stco_payload.extend_from_slice(&[0u8; 4]); // version+flags
        stco_payload.extend_from_slice(&1u32.to_be_bytes()); // entry count
        stco_payload.extend_from_slice(&mdat_payload_offset.to_be_bytes());
        let mut stco = Vec::new();
        write_box(&mut stco, b"stco", &stco_payload);

        let mut stbl = Vec::new();
        stbl.extend_from_slice(&stco);
        let mut stbl_box = Vec::new();
        write_box(&mut stbl_box, b"stbl", &stbl);

        let mut minf_box = Vec::new();
        write_box(&mut minf_box, b"minf", &stbl_box);

        let mut mdia_box = Vec::new();
        write_box(&mut mdia_box, b"mdia", &minf_box);

        let mut trak_box = Vec::new();
        write_box(&mut trak_box, b"trak", &mdia_box);

        write_box(&mut buf, b"moov", &trak_box);
        buf
    }

    #[test]
    fn relocate_moves_moov_before_mdat_and_patches_stco() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, sample_mp4_with_mdat_first()).unwrap();

        validate_for_relocation(&input, dir.path()).unwrap();
        relocate_moov(&input, &output).unwrap();

        let mut f = File::open(&output).unwrap();
        let boxes = top_level_boxes(&mut f).unwrap();
        let moov_idx = boxes.iter().position(|b| &b.box_type == b"moov").unwrap();
        let mdat_idx = boxes.iter().position(|b| &b.box_type == b"mdat").unwrap();
        assert!(moov_idx < mdat_idx, "moov must now precede mdat");
    }

    #[test]
    fn validate_rejects_missing_ftyp() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.mp4");
        std::fs::write(&input, b"not an mp4 at all").unwrap();
        assert!(matches!(
            validate_for_relocation(&input, dir.path()),
            Err(Mp4RelocateError::NotMp4)
        ));
    }

    #[test]
    fn validate_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.mp4");
        File::create(&input).unwrap();
        assert!(matches!(
            validate_for_relocation(&input, dir.path()),
            Err(Mp4RelocateError::InputUnreadable)
        ));
    }
}
