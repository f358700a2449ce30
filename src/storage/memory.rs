use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StorageEngine, StorageError};
use crate::model::record::{BidRecord, RecordId};

#[derive(Default)]
struct Table {
    rows: Vec<(RecordId, BidRecord)>,
    request_ids: HashSet<String>,
}

/// 内存表，记录 ID 从 1 开始递增。
///
/// 开启 `unique_request_ids` 后，重复的 `bidRequestId` 会被拒绝
/// （至少一次投递下的去重）。
#[derive(Default)]
pub struct MemoryStorage {
    table: Mutex<Table>,
    unique_request_ids: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_request_ids() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            unique_request_ids: true,
        }
    }

    pub fn records(&self) -> Vec<BidRecord> {
        self.table.lock().rows.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn write_record(&self, record: &BidRecord) -> Result<RecordId, StorageError> {
        let mut table = self.table.lock();
        if self.unique_request_ids && table.request_ids.contains(&record.bid_request_id) {
            return Err(StorageError::Constraint(format!(
                "duplicate bidRequestId {}",
                record.bid_request_id
            )));
        }

        let id = table.rows.len() as RecordId + 1;
        table.request_ids.insert(record.bid_request_id.clone());
        table.rows.push((id, record.clone()));
        Ok(id)
    }
}
