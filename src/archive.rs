use crate::event::{Entry, EventId};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Compress `data` and append it as a new zstd frame to the archive.
/// Creates the archive if it doesn't exist.
pub fn append_frame(archive_path: &Path, data: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(archive_path)?;
    let mut encoder = zstd::Encoder::new(file, 3)?;
    encoder.write_all(data)?;
    let file = encoder.finish()?;
    file.sync_data()?;
    Ok(())
}

/// Streaming reader over all concatenated frames as one byte stream.
/// Returns `Ok(None)` if the archive doesn't exist.
pub fn open_reader(archive_path: &Path) -> io::Result<Option<Box<dyn BufRead>>> {
    if !archive_path.exists() {
        return Ok(None);
    }
    let file = File::open(archive_path)?;
    let decoder = zstd::Decoder::new(file)?;
    Ok(Some(Box::new(BufReader::new(decoder))))
}

/// Count archived entries and find the highest identifier among them.
pub fn scan(archive_path: &Path) -> io::Result<(u64, EventId)> {
    let Some(reader) = open_reader(archive_path)? else {
        return Ok((0, 0));
    };
    let mut count = 0u64;
    let mut max_id = 0;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let entry: Entry = serde_json::from_str(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        max_id = max_id.max(entry.max_id());
        count += 1;
    }
    Ok((count, max_id))
}
