//! ZIP decoding via the zip crate.

use super::{Decoder, Entry, Flow, OffsetFile, Visit};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

pub struct ZipDecoder {
    path: PathBuf,
    archive: ZipArchive<BufReader<OffsetFile>>,
}

impl ZipDecoder {
    /// Open a ZIP, optionally located `skip` bytes into the file.
    pub fn open(path: &Path, skip: u64) -> Result<Self> {
        let file = OffsetFile::open(path, skip)?;
        let archive = ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("Failed to read ZIP: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }
}

fn unix_time(dt: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())?
        .and_hms_opt(dt.hour().into(), dt.minute().into(), dt.second().into())
        .map(|t| t.and_utc().timestamp())
}

impl Decoder for ZipDecoder {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        for i in 0..self.archive.len() {
            let mut member = self
                .archive
                .by_index(i)
                .with_context(|| format!("Failed to read entry {} of {}", i, self.path.display()))?;

            // Windows ZIPs have backslashes
            let entry = Entry {
                name: member.name().replace('\\', "/"),
                size: Some(member.size()),
                is_regular: member.is_file(),
                extractable: true,
                mtime: member.last_modified().and_then(unix_time),
            };

            if visit(&entry, &mut member)? == Flow::Stop {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Cursor, Read, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, stub: &[u8]) -> Result<()> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory("Data/", options)?;
        zip.start_file("Data\\Level1.dat", options)?;
        zip.write_all(b"level one")?;
        zip.start_file("readme.txt", options)?;
        zip.write_all(b"hi")?;
        let bytes = zip.finish()?.into_inner();

        let mut file = File::create(path)?;
        file.write_all(stub)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    #[test]
    fn test_walk_entries_and_content() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bundle.zip");
        write_zip(&path, b"")?;

        let mut decoder = ZipDecoder::open(&path, 0)?;
        let mut seen = Vec::new();
        decoder.walk(&mut |entry, reader| {
            let mut data = String::new();
            if entry.is_regular {
                reader.read_to_string(&mut data)?;
            }
            seen.push((entry.name.clone(), entry.is_regular, data));
            Ok(Flow::Continue)
        })?;

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, "Data/");
        assert!(!seen[0].1);
        assert_eq!(seen[1], ("Data/Level1.dat".to_string(), true, "level one".to_string()));
        Ok(())
    }

    #[test]
    fn test_stop_ends_walk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bundle.zip");
        write_zip(&path, b"")?;

        let mut decoder = ZipDecoder::open(&path, 0)?;
        let mut count = 0;
        decoder.walk(&mut |_, _| {
            count += 1;
            Ok(Flow::Stop)
        })?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_self_extracting_stub() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("setup.sh");
        let stub = b"#!/bin/sh\necho installing\nexit 0\n";
        write_zip(&path, stub)?;

        let mut decoder = ZipDecoder::open(&path, stub.len() as u64)?;
        let entries = decoder.entries()?;
        assert_eq!(entries[2].name, "readme.txt");
        assert_eq!(entries[2].size, Some(2));
        Ok(())
    }
}
