// src/stream/journal.rs

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::{error, warn};

/// 无 key 的标记长度
const NO_KEY: u32 = u32::MAX;

/// 从日志中恢复出的一条消息
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JournalEntry {
    pub key: Option<String>,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
}

/// **分区日志文件**
///
/// 帧格式：`[u32 body_len][u32 crc32][i64 timestamp_ms][u32 key_len][key][u32 payload_len][payload]`，
/// 全部小端。每次追加后 `fdatasync`，失败时截断回追加前的长度。
/// 打开时遇到半帧或校验失败，从该位置截断，之后的内容丢弃（offset 按位置计算，不能跳过中间的帧）。
pub(crate) struct Journal {
    file: File,
    path: PathBuf,
    len: u64,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let (entries, valid_len) = decode_all(&raw);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if valid_len < raw.len() as u64 {
            warn!(
                path = %path.display(),
                dropped_bytes = raw.len() as u64 - valid_len,
                recovered = entries.len(),
                "partial or corrupt journal tail, truncating"
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        Ok((
            Self {
                file,
                path,
                len: valid_len,
            },
            entries,
        ))
    }

    pub fn append(
        &mut self,
        key: Option<&str>,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> io::Result<()> {
        let frame = encode(key, payload, timestamp);
        let written = self
            .file
            .write_all(&frame)
            .and_then(|()| self.file.sync_data());

        if let Err(e) = written {
            if let Err(truncate) = self.file.set_len(self.len) {
                error!(
                    path = %self.path.display(),
                    error = %truncate,
                    "failed to roll back partial journal frame"
                );
            }
            return Err(e);
        }

        self.len += frame.len() as u64;
        Ok(())
    }
}

fn encode(key: Option<&str>, payload: &[u8], timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(20 + key.map_or(0, str::len) + payload.len());
    body.put_i64_le(timestamp.timestamp_millis());
    match key {
        Some(key) => {
            body.put_u32_le(key.len() as u32);
            body.put_slice(key.as_bytes());
        }
        None => body.put_u32_le(NO_KEY),
    }
    body.put_u32_le(payload.len() as u32);
    body.put_slice(payload);

    let mut frame = Vec::with_capacity(8 + body.len());
    frame.put_u32_le(body.len() as u32);
    frame.put_u32_le(crc32fast::hash(&body));
    frame.put_slice(&body);
    frame
}

/// 解码所有完整且校验通过的帧，返回它们以及有效前缀的字节数
fn decode_all(raw: &[u8]) -> (Vec<JournalEntry>, u64) {
    let mut entries = Vec::new();
    let mut rest = raw;
    let mut valid = 0u64;

    while rest.remaining() >= 8 {
        let mut header = &rest[..8];
        let body_len = header.get_u32_le() as usize;
        let crc = header.get_u32_le();
        if rest.len() - 8 < body_len {
            break;
        }

        let body = &rest[8..8 + body_len];
        if crc32fast::hash(body) != crc {
            break;
        }
        let Some(entry) = decode_body(body) else {
            break;
        };

        entries.push(entry);
        rest = &rest[8 + body_len..];
        valid += (8 + body_len) as u64;
    }

    (entries, valid)
}

fn decode_body(mut body: &[u8]) -> Option<JournalEntry> {
    if body.remaining() < 12 {
        return None;
    }
    let timestamp = DateTime::<Utc>::from_timestamp_millis(body.get_i64_le())?;

    let key_len = body.get_u32_le();
    let key = if key_len == NO_KEY {
        None
    } else {
        let key_len = key_len as usize;
        if body.remaining() < key_len {
            return None;
        }
        let key = String::from_utf8(body[..key_len].to_vec()).ok()?;
        body.advance(key_len);
        Some(key)
    };

    if body.remaining() < 4 {
        return None;
    }
    let payload_len = body.get_u32_le() as usize;
    if body.remaining() != payload_len {
        return None;
    }

    Some(JournalEntry {
        key,
        payload: Bytes::copy_from_slice(body),
        timestamp,
    })
}
