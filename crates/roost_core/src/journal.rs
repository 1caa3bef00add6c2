//! Append-only journal framing.
//!
//! Each table persists its committed mutations as a sequence of frames:
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers every byte before it.
//! A crash can only tear the last frame, so replay stops at the first frame
//! that is short or fails its checksum and truncates the log there.

use crate::error::{CoreError, CoreResult};
use roost_storage::StorageBackend;
use tracing::{debug, error, warn};

/// Frame magic.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"RSTJ";

/// Current frame format version.
pub(crate) const FRAME_VERSION: u16 = 1;

/// Header size: magic + version + kind + len.
const HEADER_LEN: usize = 4 + 2 + 1 + 4;

const CRC_LEN: usize = 4;

/// Kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FrameKind {
    /// A CBOR-encoded table mutation.
    Mutation = 1,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Mutation),
            _ => None,
        }
    }
}

/// Encodes one frame.
pub(crate) fn encode_frame(kind: FrameKind, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_format("journal entry larger than 4 GiB"))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    buf.push(kind as u8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Outcome of decoding the frame at the start of a buffer.
#[derive(Debug, PartialEq, Eq)]
enum Decoded<'a> {
    Frame {
        kind: FrameKind,
        payload: &'a [u8],
        len: usize,
    },
    Torn(&'static str),
}

fn decode_frame(buf: &[u8]) -> CoreResult<Decoded<'_>> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::Torn("short header"));
    }
    if buf[0..4] != FRAME_MAGIC {
        return Ok(Decoded::Torn("bad magic"));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    let payload_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
    let total = HEADER_LEN + payload_len + CRC_LEN;
    if buf.len() < total {
        return Ok(Decoded::Torn("short payload"));
    }
    let body_end = HEADER_LEN + payload_len;
    let stored = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    if compute_crc32(&buf[..body_end]) != stored {
        return Ok(Decoded::Torn("checksum mismatch"));
    }
    // A checksummed frame from a newer format is not a torn write.
    if version != FRAME_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported journal version {version}"
        )));
    }
    let kind = FrameKind::from_byte(buf[6]).ok_or_else(|| {
        CoreError::invalid_format(format!("unknown journal frame kind {}", buf[6]))
    })?;
    Ok(Decoded::Frame {
        kind,
        payload: &buf[HEADER_LEN..body_end],
        len: total,
    })
}

/// A table's journal on top of a storage backend.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl Journal {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
            failed: false,
        }
    }

    /// Reads every intact frame, truncating a torn tail.
    pub(crate) fn replay(&mut self, table: &str) -> CoreResult<Vec<(FrameKind, Vec<u8>)>> {
        let bytes = self.backend.read_all()?;
        let mut frames = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match decode_frame(&bytes[offset..])? {
                Decoded::Frame { kind, payload, len } => {
                    frames.push((kind, payload.to_vec()));
                    offset += len;
                }
                Decoded::Torn(reason) => {
                    warn!(
                        table,
                        offset,
                        discarded = bytes.len() - offset,
                        reason,
                        "truncating torn journal tail"
                    );
                    self.backend.truncate(offset as u64)?;
                    self.backend.sync()?;
                    break;
                }
            }
        }
        debug!(table, frames = frames.len(), "journal replayed");
        Ok(frames)
    }

    /// Appends frames as one write.
    ///
    /// A failed append is cut back to the previous end of the journal so
    /// later frames never land behind a partial one. If that fails too the
    /// journal refuses every further write until the table is reopened.
    pub(crate) fn append(&mut self, frames: &[u8]) -> CoreResult<()> {
        if self.failed {
            return Err(CoreError::JournalFailed);
        }
        let end = self.backend.size()?;
        let Err(err) = self.write_frames(frames) else {
            return Ok(());
        };
        match self.backend.truncate(end).and_then(|()| self.backend.flush()) {
            Ok(()) => warn!(end, error = %err, "journal append failed, rolled back"),
            Err(rollback) => {
                self.failed = true;
                error!(end, error = %err, %rollback, "journal append failed and could not be rolled back");
            }
        }
        Err(err)
    }

    fn write_frames(&mut self, frames: &[u8]) -> CoreResult<()> {
        self.backend.append(frames)?;
        if self.sync_on_write {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(())
    }

    /// Replaces the whole journal.
    pub(crate) fn rewrite(&mut self, image: &[u8]) -> CoreResult<()> {
        if self.failed {
            return Err(CoreError::JournalFailed);
        }
        self.backend.replace(image)?;
        Ok(())
    }

    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
