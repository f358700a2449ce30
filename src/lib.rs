//! OpenRTB 竞价请求接收服务
//!
//! 同一进程内两条链路：接收链路（`admission`，由 `api` 暴露为 HTTP）负责校验、
//! 过滤并把通过的请求发布到流通道；持久化 worker（`worker`）消费该通道，
//! 经存储引擎逐条写入，写入失败的转入死信通道。

use std::sync::Arc;

pub mod admission;
pub mod api;
pub mod config;
pub mod logging;
pub mod model;
pub mod openrtb;
pub mod stats;
pub mod storage;
pub mod stream;
pub mod worker;

use admission::Admission;
use stats::IntakeStats;

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<Admission>,
    pub stats: Arc<IntakeStats>,
}
