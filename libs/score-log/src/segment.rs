//! On-disk partition file.
//!
//! Entry layout: `u32 BE key_len | key | u32 BE payload_len | payload`.
//! Entries are only ever appended; offsets are entry indexes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::OpenError;

const LEN_BYTES: usize = 4;

pub(crate) struct Segment {
    file: File,
    path: PathBuf,
    len: u64,
    fsync: bool,
}

impl Segment {
    /// Open (or create) a partition file and replay its entries.
    ///
    /// A torn trailing entry (crash mid-append) is truncated away.
    pub(crate) fn open(path: &Path, fsync: bool) -> Result<(Self, Vec<(Bytes, Bytes)>), OpenError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| OpenError::io(path, e))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| OpenError::io(path, e))?;

        let (entries, good_len) = parse_entries(&data);
        if good_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = data.len() - good_len,
                "truncating torn entry at end of partition file"
            );
            file.set_len(good_len as u64).map_err(|e| OpenError::io(path, e))?;
        }

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                len: good_len as u64,
                fsync,
            },
            entries,
        ))
    }

    /// Replay the complete entries of an existing partition file without
    /// writing to it. A torn tail is skipped, not truncated. `None` when the
    /// file does not exist.
    pub(crate) fn replay(path: &Path) -> Result<Option<Vec<(Bytes, Bytes)>>, OpenError> {
        let mut file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OpenError::io(path, e)),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| OpenError::io(path, e))?;

        let (entries, good_len) = parse_entries(&data);
        if good_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = data.len() - good_len,
                "skipping incomplete entry at end of partition file"
            );
        }
        Ok(Some(entries))
    }

    /// Append one entry. On failure the file is cut back to its previous length.
    pub(crate) fn append(&mut self, key: &[u8], payload: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(2 * LEN_BYTES + key.len() + payload.len());
        encode_entry(key, payload, &mut buf)?;

        let written = self.file.write_all(&buf).and_then(|()| {
            if self.fsync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            if let Err(trunc) = self.file.set_len(self.len) {
                tracing::error!(path = %self.path.display(), error = %trunc, "truncate after failed append");
            }
            return Err(e);
        }

        self.len += buf.len() as u64;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

fn encode_entry(key: &[u8], payload: &[u8], buf: &mut Vec<u8>) -> io::Result<()> {
    for part in [key, payload] {
        let len = u32::try_from(part.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry part exceeds u32"))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(part);
    }
    Ok(())
}

/// Parse complete entries; returns them plus the byte length they cover.
fn parse_entries(data: &[u8]) -> (Vec<(Bytes, Bytes)>, usize) {
    let mut entries = Vec::new();
    let mut pos = 0;

    loop {
        let Some((key, after_key)) = read_part(data, pos) else { break };
        let Some((payload, after_payload)) = read_part(data, after_key) else { break };
        entries.push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(payload)));
        pos = after_payload;
    }

    (entries, pos)
}

fn read_part(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let header = data.get(pos..pos + LEN_BYTES)?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let start = pos + LEN_BYTES;
    let part = data.get(start..start + len)?;
    Some((part, start + len))
}
