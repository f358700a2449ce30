use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn, Level};

use crate::logging::RuntimeLogger;
use crate::model::failed::FailedRecord;
use crate::openrtb::request::BidRequest;
use crate::storage::StorageError;
use crate::stream::{Producer, StreamError};

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("failed to encode dead-letter record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("dead-letter publish failed: {0}")]
    Publish(#[from] StreamError),
}

/// **死信服务**
///
/// 把持久化失败的请求封装成 [`FailedRecord`] 发到死信通道（非阻塞、有界缓冲）。
/// 如果连死信也发不出去，完整记录写入本地运行日志，绝不静默丢失。
pub struct DeadLetterService {
    producer: Arc<dyn Producer>,
    topic: String,
    fallback: Arc<RuntimeLogger>,
}

impl DeadLetterService {
    pub fn new(
        producer: Arc<dyn Producer>,
        topic: impl Into<String>,
        fallback: Arc<RuntimeLogger>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            fallback,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 每次失败只发布一次，不在这里重试
    pub async fn send(
        &self,
        request: BidRequest,
        cause: &StorageError,
        operation: &str,
    ) -> Result<(), DeadLetterError> {
        let detail = cause.to_string();
        let failed = FailedRecord::new(
            request,
            cause.kind(),
            (!detail.is_empty()).then_some(detail),
            operation,
        );

        match self.publish(&failed) {
            Ok(()) => {
                warn!(
                    request_id = %failed.original_request.id,
                    error_kind = %failed.error_kind,
                    operation,
                    "sent failed bid to dead-letter channel"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    request_id = %failed.original_request.id,
                    error = %e,
                    original_error = %cause,
                    "CRITICAL: failed to send bid to dead-letter channel"
                );
                self.fallback
                    .log(
                        Level::ERROR,
                        "dead_letter_publish_failed",
                        json!({
                            "bid_request_id": failed.original_request.id,
                            "topic": self.topic,
                            "dead_letter_error": e.to_string(),
                            "failed_record": failed,
                        }),
                    )
                    .await;
                Err(e)
            }
        }
    }

    fn publish(&self, failed: &FailedRecord) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_vec(failed)?;
        self.producer.publish(
            &self.topic,
            Some(&failed.original_request.id),
            Bytes::from(payload),
        )?;
        Ok(())
    }
}
