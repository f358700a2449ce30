//! 接收链路
//!
//! 校验 → 过滤 → 非阻塞发布。每一步都是同步的，唯一可能等待的是 producer 入队。

mod filter;
mod validate;

pub use filter::{FilterPolicy, FilterReason, FilterRule};
pub use validate::{validate, ValidationError};

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::openrtb::request::BidRequest;
use crate::stats::IntakeStats;
use crate::stream::{Producer, StreamError};

/// 单次准入的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// 已放入发布缓冲区
    Accepted,
    /// 结构校验失败，请求被丢弃
    Rejected(ValidationError),
    /// 被业务规则过滤（"no bid"）
    Filtered(FilterReason),
}

/// 服务端错误，与校验/过滤结果区分开
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("publish failed: {0}")]
    Publish(#[from] StreamError),

    #[error("failed to encode bid request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AdmissionError {
    pub fn is_backpressure(&self) -> bool {
        matches!(self, AdmissionError::Publish(StreamError::BufferFull { .. }))
    }
}

/// **准入管线**
///
/// 所有请求任务共享同一个实例；发布缓冲区是唯一的共享可变状态。
pub struct Admission {
    producer: Arc<dyn Producer>,
    topic: String,
    policy: FilterPolicy,
    stats: Arc<IntakeStats>,
}

impl Admission {
    pub fn new(
        producer: Arc<dyn Producer>,
        topic: impl Into<String>,
        policy: FilterPolicy,
        stats: Arc<IntakeStats>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            policy,
            stats,
        }
    }

    /// 解析原始请求体（simd-json 会原地改写缓冲区）。无法解析时计入拒绝数。
    pub fn parse(&self, body: &mut [u8]) -> Result<BidRequest, ValidationError> {
        BidRequest::from_slice(body).map_err(|e| {
            self.stats.record_rejected();
            let rejection = ValidationError::Malformed(e.to_string());
            debug!(reason = rejection.reason(), error = %rejection, "bid request rejected");
            rejection
        })
    }

    /// 被拒绝或过滤的请求不会发布；通过的请求恰好发布一次，以请求 ID 作为消息 key。
    pub fn admit(&self, request: &BidRequest) -> Result<AdmitOutcome, AdmissionError> {
        // --- 第一阶段：结构校验 ---
        let device = match validate(request) {
            Ok(device) => device,
            Err(e) => {
                self.stats.record_rejected();
                debug!(request_id = %request.id, reason = e.reason(), "bid request rejected");
                return Ok(AdmitOutcome::Rejected(e));
            }
        };

        // --- 第二阶段：业务过滤 ---
        if let Some(reason) = self.policy.evaluate(device) {
            self.stats.record_filtered();
            debug!(request_id = %request.id, reason = reason.as_str(), "bid request filtered");
            return Ok(AdmitOutcome::Filtered(reason));
        }

        // --- 第三阶段：发布，不等待确认 ---
        let payload = serde_json::to_vec(request)?;
        match self
            .producer
            .publish(&self.topic, Some(&request.id), Bytes::from(payload))
        {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(AdmitOutcome::Accepted)
            }
            Err(e) => {
                if matches!(e, StreamError::BufferFull { .. }) {
                    self.stats.record_backpressure();
                }
                warn!(request_id = %request.id, error = %e, "bid request dropped at publish");
                Err(e.into())
            }
        }
    }
}
