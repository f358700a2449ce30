//! 存储引擎边界
//!
//! `write_record` 单次调用是原子的：要么整条记录提交，要么失败。
//! 写入超时由引擎自己负责，调用方不再包一层超时。

mod flaky;
mod jsonl;
mod memory;

pub use flaky::FlakyStorage;
pub use jsonl::JsonlStorage;
pub use memory::MemoryStorage;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::record::{BidRecord, RecordId};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    /// 稳定的错误分类，写入死信记录的 `errorKind`
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "StorageUnavailable",
            StorageError::Timeout(_) => "StorageTimeout",
            StorageError::Constraint(_) => "ConstraintViolation",
            StorageError::Io(_) => "StorageIo",
            StorageError::Encoding(_) => "RecordEncoding",
        }
    }
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn write_record(&self, record: &BidRecord) -> Result<RecordId, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(StorageError::Unavailable("x".into()).kind(), "StorageUnavailable");
        assert_eq!(StorageError::Timeout(Duration::from_secs(1)).kind(), "StorageTimeout");
        assert_eq!(StorageError::Constraint("dup".into()).kind(), "ConstraintViolation");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(StorageError::from(io).kind(), "StorageIo");
    }

    #[test]
    fn error_messages_carry_detail() {
        let err = StorageError::Unavailable("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }
}
