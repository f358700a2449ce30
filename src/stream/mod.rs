//! 流通道边界
//!
//! 有序、分区、至少一次投递的发布/订阅通道。准入链路只看到 [`Producer`]，
//! 持久化 worker 只看到 [`Subscriber`]。[`Broker`] 与 [`BufferedProducer`]
//! 是进程内实现，`Broker::open` 会把分区日志和已提交 offset 落盘。

mod broker;
mod journal;
mod producer;

pub use broker::Broker;
pub use producer::BufferedProducer;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// 发布缓冲区已满（背压）
    #[error("producer buffer full for topic {topic} (capacity {capacity})")]
    BufferFull { topic: String, capacity: usize },

    #[error("producer closed for topic {0}")]
    Closed(String),

    #[error("unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("stream journal io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 投递给订阅者的消息
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
}

/// 单个分区上惰性、有序的消息序列
pub type MessageStream = BoxStream<'static, Message>;

/// 生产端。
///
/// `publish` 只把消息放进有界缓冲区后立即返回，不等待落盘确认。
pub trait Producer: Send + Sync {
    fn publish(&self, topic: &str, key: Option<&str>, payload: Bytes) -> Result<(), StreamError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    fn partitions(&self, topic: &str) -> u32;

    /// 订阅单个分区，从消费组已提交的 offset 开始
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<MessageStream, StreamError>;

    /// 把 `next_offset` 记为消费组在该分区的位置
    async fn commit(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<(), StreamError>;
}
