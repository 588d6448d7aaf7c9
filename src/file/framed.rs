//! Checksummed, append-only record files.
//!
//! Layout: a 4-byte magic and a version byte, then frames of
//! `len: u32 LE | crc32: u32 LE | MessagePack body`.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

const FILE_HEADER_SIZE: u64 = 5;

const FRAME_HEADER_SIZE: u64 = 8;

/// An append-only file of framed records.
pub(crate) struct FramedLog {
    path: PathBuf,
    file: File,
    /// Offset where the next frame goes.
    end: u64,
    writes_since_sync: u64,
    /// Sync every N appends (0 and 1 both mean every append).
    sync_interval: u64,
    /// A failed write left bytes past `end` that could not be cut off yet.
    truncate_pending: bool,
}

impl FramedLog {
    /// Open or create the file at `path` and read back every complete record,
    /// with the offset of its frame.
    ///
    /// A trailing frame cut short by a crash is truncated away. A complete
    /// frame whose checksum does not match is an error.
    pub fn open<T: DeserializeOwned>(
        path: impl AsRef<Path>,
        magic: &[u8; 4],
        sync_interval: u64,
    ) -> Result<(Self, Vec<(u64, T)>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        let mut records = Vec::new();
        let end = if len < FILE_HEADER_SIZE {
            // New file, or a header that never made it to disk.
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(magic)?;
            file.write_all(&[FORMAT_VERSION])?;
            file.sync_all()?;
            FILE_HEADER_SIZE
        } else {
            let mut reader = BufReader::new(&file);
            verify_header(&mut reader, magic, &path)?;
            let valid_end = read_frames(&mut reader, len, &mut records)?;
            drop(reader);

            if valid_end < len {
                warn!(
                    path = %path.display(),
                    dropped = len - valid_end,
                    "truncating torn record at end of file"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
            valid_end
        };

        Ok((
            Self {
                path,
                file,
                end,
                writes_since_sync: 0,
                sync_interval: sync_interval.max(1),
                truncate_pending: false,
            },
            records,
        ))
    }

    /// Append `record`, returning the offset of its frame.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<u64> {
        let mut frames = Vec::new();
        encode_frame(&mut frames, record)?;
        self.write_frames(&frames)
    }

    /// Append `records` in a single write, returning the offset of the first
    /// frame. Either every record is in the file or none is.
    pub fn append_all<T: Serialize>(&mut self, records: &[T]) -> Result<u64> {
        let mut frames = Vec::new();
        for record in records {
            encode_frame(&mut frames, record)?;
        }
        self.write_frames(&frames)
    }

    /// Write `frames` at the end of the file. On failure nothing past `end`
    /// survives, so a later append cannot leave stale bytes behind it.
    fn write_frames(&mut self, frames: &[u8]) -> Result<u64> {
        if self.truncate_pending {
            self.file.set_len(self.end)?;
            self.truncate_pending = false;
        }
        let offset = self.end;

        let written = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(frames));
        if let Err(err) = written {
            self.discard_from(offset);
            return Err(err.into());
        }
        self.end += frames.len() as u64;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            if let Err(err) = self.sync() {
                self.discard_from(offset);
                return Err(err);
            }
        }
        Ok(offset)
    }

    fn discard_from(&mut self, offset: u64) {
        self.end = offset;
        if let Err(err) = self.file.set_len(offset) {
            warn!(
                path = %self.path.display(),
                error = %err,
                "could not drop a failed write, retrying on next append"
            );
            self.truncate_pending = true;
        }
    }

    /// Read back the record whose frame starts at `offset`.
    pub fn read_at<T: DeserializeOwned>(&mut self, offset: u64) -> Result<T> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        let (len, crc) = split_header(&header);

        let mut body = vec![0u8; len as usize];
        self.file.read_exact(&mut body)?;
        check_crc(&body, crc)?;
        Ok(rmp_serde::from_slice(&body)?)
    }

    /// Force buffered writes to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file.
    pub fn size(&self) -> u64 {
        self.end
    }

    /// Swap the handle for a read-only one, or back, to make writes fail.
    #[cfg(test)]
    pub(crate) fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&self.path)?;
        Ok(())
    }
}

fn encode_frame<T: Serialize>(frames: &mut Vec<u8>, record: &T) -> Result<()> {
    let body = rmp_serde::to_vec_named(record)?;
    frames.reserve(FRAME_HEADER_SIZE as usize + body.len());
    frames.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frames.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    frames.extend_from_slice(&body);
    Ok(())
}

fn verify_header(reader: &mut impl Read, magic: &[u8; 4], path: &Path) -> Result<()> {
    let mut header = [0u8; FILE_HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;
    if &header[..4] != magic {
        return Err(StoreError::InvalidFormat(format!(
            "bad magic in {}",
            path.display()
        )));
    }
    if header[4] != FORMAT_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "unsupported version {} in {}",
            header[4],
            path.display()
        )));
    }
    Ok(())
}

/// Decode frames until the first incomplete one. Returns the offset just past
/// the last complete frame.
fn read_frames<T: DeserializeOwned>(
    reader: &mut impl Read,
    len: u64,
    records: &mut Vec<(u64, T)>,
) -> Result<u64> {
    let mut pos = FILE_HEADER_SIZE;
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    while len - pos >= FRAME_HEADER_SIZE {
        reader.read_exact(&mut header)?;
        let (body_len, crc) = split_header(&header);
        if len - pos - FRAME_HEADER_SIZE < body_len as u64 {
            break;
        }
        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;
        check_crc(&body, crc)?;

        records.push((pos, rmp_serde::from_slice(&body)?));
        pos += FRAME_HEADER_SIZE + body_len as u64;
    }
    Ok(pos)
}

fn split_header(header: &[u8; FRAME_HEADER_SIZE as usize]) -> (u32, u32) {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (len, crc)
}

fn check_crc(body: &[u8], expected: u32) -> Result<()> {
    let got = crc32fast::hash(body);
    if got != expected {
        return Err(StoreError::ChecksumMismatch { expected, got });
    }
    Ok(())
}

/// Replace the file at `path` with a single framed `record`.
///
/// The new content goes to a temporary file first and is renamed over the
/// old one, so readers see either version whole.
pub(crate) fn write_single<T: Serialize>(path: &Path, magic: &[u8; 4], record: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let body = rmp_serde::to_vec_named(record)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(magic)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the record written by [`write_single`], `None` if there is no file.
pub(crate) fn read_single<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    verify_header(&mut reader, magic, path)?;

    let mut records = Vec::new();
    read_frames(&mut reader, len, &mut records)?;
    match records.pop() {
        Some((_, record)) => Ok(Some(record)),
        None => Err(StoreError::Corruption(format!(
            "no record in {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    const MAGIC: &[u8; 4] = b"TST\0";

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Entry {
        Put { key: String, value: u64 },
        Drop(String),
    }

    fn put(key: &str, value: u64) -> Entry {
        Entry::Put {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");

        let (mut log, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert!(records.is_empty());
        let first = log.append(&put("a", 1)).unwrap();
        let second = log.append(&Entry::Drop("a".into())).unwrap();
        assert_eq!(first, FILE_HEADER_SIZE);
        assert_eq!(log.read_at::<Entry>(second).unwrap(), Entry::Drop("a".into()));
        drop(log);

        let (_, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert_eq!(
            records,
            vec![(first, put("a", 1)), (second, Entry::Drop("a".into()))]
        );
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");

        let (mut log, _) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        log.append(&put("a", 1)).unwrap();
        log.append(&put("b", 2)).unwrap();
        let full = log.size();
        drop(log);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        let (mut log, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert!(log.size() < full - 3);
        assert_eq!(fs::metadata(&path).unwrap().len(), log.size());

        // Appends land right after the last good frame.
        log.append(&put("c", 3)).unwrap();
        drop(log);
        let (_, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert_eq!(records[1].1, put("c", 3));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");

        let (mut log, _) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        log.append(&put("a", 1)).unwrap();
        let size = log.size();
        drop(log);

        let mut bytes = fs::read(&path).unwrap();
        let last = (size - 1) as usize;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let result = FramedLog::open::<Entry>(&path, MAGIC, 1);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_failed_append_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");

        let (mut log, _) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        let first = log.append(&put("a", 1)).unwrap();
        let end = log.size();

        // Bytes of an earlier partial write, shaped so that whatever the next
        // frame does not overwrite reads as a complete frame with a bad CRC.
        let next = Entry::Drop("b".into());
        let next_len = FRAME_HEADER_SIZE as usize + rmp_serde::to_vec_named(&next).unwrap().len();
        let mut stale = vec![0u8; next_len];
        stale.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0x2a]);
        let mut raw = OpenOptions::new().write(true).open(&path).unwrap();
        raw.seek(SeekFrom::Start(end)).unwrap();
        raw.write_all(&stale).unwrap();
        drop(raw);

        log.set_read_only(true).unwrap();
        assert!(log.append(&put("lost", 2)).is_err());
        assert!(log.append_all(&[put("x", 3), put("y", 4)]).is_err());
        assert_eq!(log.size(), end);

        log.set_read_only(false).unwrap();
        let second = log.append(&next).unwrap();
        assert_eq!(second, end);
        assert_eq!(fs::metadata(&path).unwrap().len(), log.size());
        drop(log);

        let (_, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert_eq!(records, vec![(first, put("a", 1)), (second, next)]);
    }

    #[test]
    fn test_append_all() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");

        let (mut log, _) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        let first = log.append_all(&[put("a", 1), put("b", 2)]).unwrap();
        assert_eq!(log.read_at::<Entry>(first).unwrap(), put("a", 1));
        drop(log);

        let (_, records) = FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, first);
        assert_eq!(records[1].1, put("b", 2));
    }

    #[test]
    fn test_wrong_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.dat");
        FramedLog::open::<Entry>(&path, MAGIC, 1).unwrap();

        let result = FramedLog::open::<Entry>(&path, b"OTH\0", 1);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_single_record_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.dat");
        assert!(read_single::<Entry>(&path, MAGIC).unwrap().is_none());

        write_single(&path, MAGIC, &put("x", 1)).unwrap();
        write_single(&path, MAGIC, &put("x", 2)).unwrap();
        assert_eq!(read_single::<Entry>(&path, MAGIC).unwrap(), Some(put("x", 2)));
        assert!(!path.with_extension("tmp").exists());
    }
}
