// src/model/failed.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::openrtb::request::BidRequest;

/// 数据库写入步骤的操作标签
pub const DATABASE_PERSIST: &str = "DATABASE_PERSIST";

/// **死信记录**
///
/// 每次持久化失败只构造并发布一次，所有权完全交给死信通道，系统不会再读回。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    /// 完整的原始请求，供离线重放
    pub original_request: BidRequest,
    /// 稳定的错误分类
    pub error_kind: String,
    pub error_detail: Option<String>,
    pub failed_operation: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedRecord {
    pub fn new(
        original_request: BidRequest,
        error_kind: &str,
        error_detail: Option<String>,
        failed_operation: &str,
    ) -> Self {
        Self {
            original_request,
            error_kind: error_kind.to_string(),
            error_detail,
            failed_operation: failed_operation.to_string(),
            failed_at: Utc::now(),
        }
    }
}
