//! Unreal Tournament `.umod` packages
//!
//! Stored uncompressed: file data, then a directory, then a 20 byte footer.
//! Directory counts and string lengths use Unreal's compact index encoding.

use super::{Decoder, Entry, Flow, Visit};

use anyhow::{bail, Context, Result};
use binrw::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Footer magic, little endian
const MAGIC: u32 = 0x9FE3_C5A3;

const FOOTER_LEN: u64 = 20;

#[binrw::binread]
#[derive(Debug)]
#[br(little)]
struct Footer {
    #[br(temp, assert(magic == MAGIC, "bad umod magic {:#x}", magic))]
    magic: u32,
    dir_offset: u32,
    /// Total package size
    file_size: u32,
    version: u32,
    _crc: u32,
}

/// Sign bit and 6 bits in the first byte, then 7 bits per byte.
#[binrw::parser(reader)]
fn compact_index() -> BinResult<i32> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;

    let negative = byte[0] & 0x80 != 0;
    let mut more = byte[0] & 0x40 != 0;
    let mut value = (byte[0] & 0x3f) as i32;
    let mut shift = 6;

    while more && shift < 32 {
        reader.read_exact(&mut byte)?;
        value |= ((byte[0] & 0x7f) as i32) << shift;
        more = byte[0] & 0x80 != 0;
        shift += 7;
    }

    Ok(if negative { -value } else { value })
}

#[binrw::binread]
#[derive(Debug)]
#[br(little)]
struct DirEntry {
    #[br(temp, parse_with = compact_index)]
    name_len: i32,
    #[br(count = name_len.max(0) as usize)]
    name: Vec<u8>,
    offset: u32,
    size: u32,
    _flags: u32,
}

#[binrw::binread]
#[derive(Debug)]
#[br(little)]
struct Directory {
    #[br(temp, parse_with = compact_index)]
    count: i32,
    #[br(count = count.max(0) as usize)]
    entries: Vec<DirEntry>,
}

impl DirEntry {
    fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        // Latin-1
        self.name[..end]
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .replace('\\', "/")
    }
}

pub struct UmodDecoder {
    path: PathBuf,
    file: File,
    version: u32,
    entries: Vec<DirEntry>,
}

impl UmodDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open umod: {}", path.display()))?;
        let len = file.metadata()?.len();
        if len < FOOTER_LEN {
            bail!("{} is too short to be a umod package", path.display());
        }

        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        let footer = Footer::read(&mut BufReader::new(&mut file))
            .with_context(|| format!("Missing umod footer (magic {:#x}) in {}", MAGIC, path.display()))?;

        if u64::from(footer.file_size) != len {
            bail!(
                "{} is truncated: footer says {} bytes, file has {}",
                path.display(),
                footer.file_size,
                len
            );
        }

        file.seek(SeekFrom::Start(footer.dir_offset.into()))?;
        let directory = Directory::read(&mut BufReader::new(&mut file))
            .with_context(|| format!("Corrupt umod directory in {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            version: footer.version,
            entries: directory.entries,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Decoder for UmodDecoder {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        for dir_entry in &self.entries {
            let entry = Entry::file(dir_entry.name(), Some(dir_entry.size.into()));

            self.file
                .seek(SeekFrom::Start(dir_entry.offset.into()))
                .with_context(|| format!("Failed to seek to {} in {}", entry.name, self.path.display()))?;
            let mut reader = (&self.file).take(dir_entry.size.into());

            if visit(&entry, &mut reader)? == Flow::Stop {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Build a package from (name, data) pairs; names shorter than 63 bytes.
    fn build_umod(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        for (_, data) in files {
            offsets.push(out.len() as u32);
            out.extend_from_slice(data);
        }

        let dir_offset = out.len() as u32;
        out.push(files.len() as u8);
        for ((name, data), offset) in files.iter().zip(offsets) {
            out.push(name.len() as u8 + 1);
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
        }

        let total = out.len() as u32 + FOOTER_LEN as u32;
        for value in [MAGIC, dir_offset, total, 1, 0] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_compact_index() {
        let mut cursor = std::io::Cursor::new(vec![0x05u8]);
        assert_eq!(compact_index(&mut cursor, binrw::Endian::Little, ()).unwrap(), 5);

        // 200 = 0b11_001000: low six bits 8 with continuation, then 3
        let mut cursor = std::io::Cursor::new(vec![0x48u8, 0x03]);
        assert_eq!(compact_index(&mut cursor, binrw::Endian::Little, ()).unwrap(), 200);

        let mut cursor = std::io::Cursor::new(vec![0x85u8]);
        assert_eq!(compact_index(&mut cursor, binrw::Endian::Little, ()).unwrap(), -5);
    }

    #[test]
    fn test_walk_umod() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bonus.umod");
        std::fs::write(
            &path,
            build_umod(&[("Maps\\DM-Bonus.unr", b"UNREALMAP"), ("System\\Manifest.ini", b"[Setup]")]),
        )?;

        let mut decoder = UmodDecoder::open(&path)?;
        assert_eq!(decoder.version(), 1);

        let mut seen = Vec::new();
        decoder.walk(&mut |entry, reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            seen.push((entry.name.clone(), entry.size, data));
            Ok(Flow::Continue)
        })?;

        assert_eq!(seen[0], ("Maps/DM-Bonus.unr".to_string(), Some(9), b"UNREALMAP".to_vec()));
        assert_eq!(seen[1].0, "System/Manifest.ini");
        assert_eq!(seen[1].2, b"[Setup]");
        Ok(())
    }

    #[test]
    fn test_rejects_truncated_package() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bonus.umod");
        let mut bytes = build_umod(&[("a.txt", b"abc")]);
        bytes.insert(0, b'x');
        std::fs::write(&path, bytes)?;

        assert!(UmodDecoder::open(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_magic() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bonus.umod");
        let mut bytes = build_umod(&[("a.txt", b"abc")]);
        let footer = bytes.len() - FOOTER_LEN as usize;
        bytes[footer] ^= 0xff;
        std::fs::write(&path, bytes)?;

        let err = UmodDecoder::open(&path).err().map(|e| format!("{:#}", e));
        assert!(err.is_some_and(|msg| msg.contains("Missing umod footer")));
        Ok(())
    }
}
