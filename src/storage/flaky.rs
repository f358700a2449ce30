use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;

use super::{StorageEngine, StorageError};
use crate::model::record::{BidRecord, RecordId};

/// 模拟不稳定的存储引擎
///
/// 按 `failure_rate` 的概率让写入失败，并可附加随机延迟，
/// 用来在演示和压测中走通死信链路。
pub struct FlakyStorage<S> {
    inner: S,
    failure_rate: f64,
    max_delay: Option<Duration>,
}

impl<S: StorageEngine> FlakyStorage<S> {
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_delay: None,
        }
    }

    /// 每次写入前随机等待 0 ~ max_delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

#[async_trait]
impl<S: StorageEngine> StorageEngine for FlakyStorage<S> {
    async fn write_record(&self, record: &BidRecord) -> Result<RecordId, StorageError> {
        // ThreadRng 不是 Send，取完随机数就释放
        let (fail, delay) = {
            let mut rng = rand::thread_rng();
            let fail = rng.gen_bool(self.failure_rate);
            let delay = self
                .max_delay
                .filter(|d| !d.is_zero())
                .map(|d| Duration::from_micros(rng.gen_range(0..=d.as_micros() as u64)));
            (fail, delay)
        };

        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if fail {
            return Err(StorageError::Unavailable(format!(
                "simulated failure writing {}",
                record.bid_request_id
            )));
        }

        self.inner.write_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::request::BidRequest;
    use crate::storage::MemoryStorage;

    fn record(id: &str) -> BidRecord {
        BidRecord::now(&BidRequest {
            id: id.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn always_failing_never_reaches_inner() {
        let storage = FlakyStorage::new(MemoryStorage::new(), 1.0);
        for i in 0..10 {
            let err = storage.write_record(&record(&i.to_string())).await.unwrap_err();
            assert_eq!(err.kind(), "StorageUnavailable");
        }
        assert!(storage.inner.is_empty());
    }

    #[tokio::test]
    async fn zero_rate_passes_through() {
        let storage = FlakyStorage::new(MemoryStorage::new(), 0.0)
            .with_max_delay(Duration::from_millis(2));
        for i in 0..10 {
            storage.write_record(&record(&i.to_string())).await.unwrap();
        }
        assert_eq!(storage.inner.len(), 10);
    }
}
