// src/storage/jsonl.rs

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task;
use tracing::{debug, error, info, warn};

use super::{StorageEngine, StorageError};
use crate::model::record::{BidRecord, RecordId};

#[derive(Serialize)]
struct StoredRow<'a> {
    id: RecordId,
    #[serde(flatten)]
    record: &'a BidRecord,
}

struct Writer {
    file: File,
    path: PathBuf,
    /// 已提交内容的字节数
    len: u64,
    next_id: RecordId,
}

impl Writer {
    /// 写入一行并 `fdatasync`。失败时截断回写入前的长度，ID 不前移。
    fn commit(&mut self, line: &[u8]) -> io::Result<RecordId> {
        let written = self
            .file
            .write_all(line)
            .and_then(|()| self.file.sync_data());

        if let Err(e) = written {
            if let Err(truncate) = self.file.set_len(self.len) {
                error!(
                    path = %self.path.display(),
                    error = %truncate,
                    "failed to roll back partial record line"
                );
            }
            return Err(e);
        }

        let id = self.next_id;
        self.len += line.len() as u64;
        self.next_id += 1;
        Ok(id)
    }
}

/// **追加写入的 JSON Lines 存储**
///
/// 每条记录一行，写入后 `fsync`。写入失败时截断回写入前的长度，
/// 保证文件里不会留下半条记录。
///
/// 超时只限制等待写锁的时间：一旦开始写入，就在阻塞线程池上跑完并如实返回结果，
/// 不会出现 "报告失败但已经落盘" 的情况。
pub struct JsonlStorage {
    path: PathBuf,
    writer: Arc<Mutex<Writer>>,
    timeout: Duration,
}

impl JsonlStorage {
    pub async fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let opened = path.clone();
        let writer = task::spawn_blocking(move || open_writer(opened))
            .await
            .map_err(|e| StorageError::Unavailable(format!("open task failed: {e}")))??;

        info!(path = %path.display(), existing = writer.next_id - 1, "opened bid record store");
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(writer)),
            timeout,
        })
    }

    /// 读回全部已提交的记录
    pub async fn read_all(&self) -> Result<Vec<BidRecord>, StorageError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StorageError::from))
            .collect()
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<Writer>, StorageError> {
        tokio::time::timeout(self.timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))
    }
}

/// 打开文件，截掉崩溃留下的半行，并续接已有记录的 ID
fn open_writer(path: PathBuf) -> Result<Writer, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let valid_len = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    let existing = raw[..valid_len]
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count() as RecordId;

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    if valid_len < raw.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = raw.len() - valid_len,
            "partial record line at end of store, truncating"
        );
        file.set_len(valid_len as u64)?;
        file.sync_data()?;
    }

    Ok(Writer {
        file,
        path,
        len: valid_len as u64,
        next_id: existing + 1,
    })
}

#[async_trait]
impl StorageEngine for JsonlStorage {
    async fn write_record(&self, record: &BidRecord) -> Result<RecordId, StorageError> {
        let mut writer = self.acquire().await?;

        let mut line = serde_json::to_vec(&StoredRow {
            id: writer.next_id,
            record,
        })?;
        line.push(b'\n');

        // 写锁随闭包一起移交，调用方放弃等待也不会让文件与 next_id 不一致
        let committed = task::spawn_blocking(move || writer.commit(&line))
            .await
            .map_err(|e| StorageError::Unavailable(format!("writer task failed: {e}")))??;

        debug!(id = committed, bid_request_id = %record.bid_request_id, "record committed");
        Ok(committed)
    }
}
