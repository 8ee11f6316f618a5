//! WAL segment record framing used by [`crate::engine::loader::CacheLoader`].
//!
//! The wire format here is this crate's own, for the loader's tests and
//! corruption-tolerance contract — it makes no claim about any production
//! WAL format. Framing is `[u32 len LE][kind: u8][payload][u32 crc32 LE]`,
//! where `payload` is bincode-free and hand-packed to keep the loader
//! dependency-light: a key count, then per key a length-prefixed byte string
//! and a record-specific body.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::digest::compute_checksum;
use crate::engine::value::{Value, ValueKind, Values};
use crate::error::CacheError;

const KIND_WRITE: u8 = 1;
const KIND_DELETE_RANGE: u8 = 2;
const KIND_DELETE: u8 = 3;

/// One decoded WAL entry, replayed into a [`crate::engine::cache::Cache`] by
/// the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Write(HashMap<Vec<u8>, Values>),
    DeleteRange { keys: Vec<Vec<u8>>, min: i64, max: i64 },
    Delete { keys: Vec<Vec<u8>> },
}

/// Sequential reader over a WAL segment's records, abstracting the concrete
/// file format away from [`crate::engine::loader::CacheLoader`].
pub trait SegmentReader {
    /// Advances to the next record and reports whether one is available.
    /// Must be called before each [`SegmentReader::read`].
    fn next(&mut self) -> bool;
    fn read(&mut self) -> Result<WalRecord, CacheError>;
    /// Byte offset of the last successfully parsed record's end. Used by the
    /// loader to truncate a file after a torn trailing record.
    fn count(&self) -> i64;
}

fn classify_io_err(e: io::Error) -> CacheError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CacheError::TornRecord { offset: -1 }
    } else {
        CacheError::Io(e)
    }
}

/// Reads length-prefixed, CRC32-checked records from a file-backed segment.
pub struct WalSegmentReader<F> {
    file: F,
    last_good_offset: i64,
    pending_len: Option<u32>,
}

impl<F: Read + Seek> WalSegmentReader<F> {
    pub fn new(file: F) -> Self {
        Self {
            file,
            last_good_offset: 0,
            pending_len: None,
        }
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)
    }
}

impl<F: Read + Seek> SegmentReader for WalSegmentReader<F> {
    fn next(&mut self) -> bool {
        let mut len_buf = [0u8; 4];
        match self.read_exact_or_eof(&mut len_buf) {
            Ok(()) => {
                self.pending_len = Some(u32::from_le_bytes(len_buf));
                true
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(_) => false,
        }
    }

    fn read(&mut self) -> Result<WalRecord, CacheError> {
        let offset_before = self
            .file
            .stream_position()
            .map_err(CacheError::Io)?
            .saturating_sub(4) as i64;

        let len = self.pending_len.take().unwrap_or(0) as usize;
        let mut body = vec![0u8; len];
        self.read_exact_or_eof(&mut body)
            .map_err(classify_io_err)?;

        let mut crc_buf = [0u8; 4];
        self.read_exact_or_eof(&mut crc_buf)
            .map_err(classify_io_err)?;
        if compute_checksum(&body) != crc_buf {
            return Err(CacheError::TornRecord {
                offset: offset_before,
            });
        }

        let record = decode_record(&body).map_err(|_| CacheError::TornRecord {
            offset: offset_before,
        })?;

        self.last_good_offset = self.file.stream_position().map_err(CacheError::Io)? as i64;
        Ok(record)
    }

    fn count(&self) -> i64 {
        self.last_good_offset
    }
}

fn decode_record(body: &[u8]) -> Result<WalRecord, ()> {
    let mut cur = Cursor::new(body);
    let kind = cur.read_u8()?;
    match kind {
        KIND_WRITE => {
            let n = cur.read_u32()?;
            let mut map = HashMap::with_capacity(n as usize);
            for _ in 0..n {
                let key = cur.read_bytes()?;
                let values = cur.read_values()?;
                map.insert(key, values);
            }
            Ok(WalRecord::Write(map))
        }
        KIND_DELETE_RANGE => {
            let min = cur.read_i64()?;
            let max = cur.read_i64()?;
            let keys = cur.read_keys()?;
            Ok(WalRecord::DeleteRange { keys, min, max })
        }
        KIND_DELETE => {
            let keys = cur.read_keys()?;
            Ok(WalRecord::Delete { keys })
        }
        _ => Err(()),
    }
}

fn encode_record(record: &WalRecord) -> Vec<u8> {
    let mut out = Vec::new();
    match record {
        WalRecord::Write(map) => {
            out.push(KIND_WRITE);
            out.extend((map.len() as u32).to_le_bytes());
            for (key, values) in map {
                write_bytes(&mut out, key);
                write_values(&mut out, values);
            }
        }
        WalRecord::DeleteRange { keys, min, max } => {
            out.push(KIND_DELETE_RANGE);
            out.extend(min.to_le_bytes());
            out.extend(max.to_le_bytes());
            write_keys(&mut out, keys);
        }
        WalRecord::Delete { keys } => {
            out.push(KIND_DELETE);
            write_keys(&mut out, keys);
        }
    }
    out
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend((bytes.len() as u32).to_le_bytes());
    out.extend(bytes);
}

fn write_keys(out: &mut Vec<u8>, keys: &[Vec<u8>]) {
    out.extend((keys.len() as u32).to_le_bytes());
    for k in keys {
        write_bytes(out, k);
    }
}

fn write_values(out: &mut Vec<u8>, values: &Values) {
    out.extend((values.len() as u32).to_le_bytes());
    for v in values.iter() {
        out.push(v.kind() as u8);
        out.extend(v.timestamp().to_le_bytes());
        match v {
            Value::Float { value, .. } => out.extend(value.to_le_bytes()),
            Value::Integer { value, .. } => out.extend(value.to_le_bytes()),
            Value::Unsigned { value, .. } => out.extend(value.to_le_bytes()),
            Value::Boolean { value, .. } => out.push(*value as u8),
            Value::String { value, .. } => write_bytes(out, value.as_bytes()),
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ()> {
        if self.pos + n > self.buf.len() {
            return Err(());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ()> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ()> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, ()> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, ()> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_keys(&mut self) -> Result<Vec<Vec<u8>>, ()> {
        let n = self.read_u32()?;
        (0..n).map(|_| self.read_bytes()).collect()
    }

    fn read_values(&mut self) -> Result<Values, ()> {
        let n = self.read_u32()?;
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let kind = ValueKind::from_u8(self.read_u8()?);
            let timestamp = self.take(8).map(|b| i64::from_le_bytes(b.try_into().unwrap()))?;
            let value = match kind {
                ValueKind::Float => Value::Float {
                    timestamp,
                    value: f64::from_le_bytes(self.take(8)?.try_into().unwrap()),
                },
                ValueKind::Integer => Value::Integer {
                    timestamp,
                    value: i64::from_le_bytes(self.take(8)?.try_into().unwrap()),
                },
                ValueKind::Unsigned => Value::Unsigned {
                    timestamp,
                    value: u64::from_le_bytes(self.take(8)?.try_into().unwrap()),
                },
                ValueKind::Boolean => Value::Boolean {
                    timestamp,
                    value: self.read_u8()? != 0,
                },
                ValueKind::String => Value::String {
                    timestamp,
                    value: String::from_utf8(self.read_bytes()?).map_err(|_| ())?,
                },
                ValueKind::Unknown => return Err(()),
            };
            out.push(value);
        }
        Ok(Values::new(out))
    }
}

/// Writes WAL records in this module's framing. Only needed to build test
/// fixtures for [`crate::engine::loader::CacheLoader`] — the real WAL writer
/// is external to this crate, per the design notes.
#[cfg(any(test, debug_assertions))]
pub struct WalSegmentWriter<F> {
    file: F,
}

#[cfg(any(test, debug_assertions))]
impl<F: Write> WalSegmentWriter<F> {
    pub fn new(file: F) -> Self {
        Self { file }
    }

    pub fn append(&mut self, record: &WalRecord) -> io::Result<()> {
        let body = encode_record(record);
        self.file.write_all(&(body.len() as u32).to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.write_all(&compute_checksum(&body))?;
        Ok(())
    }

    /// Writes a truncated record with no trailing checksum, to exercise the
    /// loader's torn-record tolerance.
    pub fn append_torn(&mut self, record: &WalRecord) -> io::Result<()> {
        let body = encode_record(record);
        let torn_len = body.len() / 2;
        self.file
            .write_all(&(body.len() as u32).to_le_bytes())?;
        self.file.write_all(&body[..torn_len])?;
        Ok(())
    }
}
