//! 持久化 worker
//!
//! 接收主题的每个分区一个顺序循环。每条消息经历 Received → Mapped →
//! {Committed | DeadLettered}；写入失败不会中断循环，offset 总是前移。
//! 重试由死信主题的消费方另行处理。

mod dead_letter;

pub use dead_letter::{DeadLetterError, DeadLetterService};

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};

use crate::logging::RuntimeLogger;
use crate::model::failed::DATABASE_PERSIST;
use crate::model::record::{BidRecord, RecordId};
use crate::openrtb::request::BidRequest;
use crate::stats::IntakeStats;
use crate::storage::StorageEngine;
use crate::stream::{Message, StreamError, Subscriber};

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Committed(RecordId),
    DeadLettered { error_kind: &'static str },
    /// 死信也发送失败，或消息无法解码；已写入本地运行日志
    Unrecoverable { reason: String },
}

pub struct PersistenceWorker {
    subscriber: Arc<dyn Subscriber>,
    storage: Arc<dyn StorageEngine>,
    dead_letters: DeadLetterService,
    runtime_logger: Arc<RuntimeLogger>,
    stats: Arc<IntakeStats>,
    topic: String,
    group: String,
}

impl PersistenceWorker {
    pub fn new(
        subscriber: Arc<dyn Subscriber>,
        storage: Arc<dyn StorageEngine>,
        dead_letters: DeadLetterService,
        runtime_logger: Arc<RuntimeLogger>,
        stats: Arc<IntakeStats>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            subscriber,
            storage,
            dead_letters,
            runtime_logger,
            stats,
            topic: topic.into(),
            group: group.into(),
        }
    }

    /// 每个分区启动一个循环，全部循环退出后返回
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let partitions = self.subscriber.partitions(&self.topic);
        info!(
            topic = %self.topic,
            group = %self.group,
            partitions,
            dead_letter_topic = %self.dead_letters.topic(),
            "starting persistence worker"
        );

        let mut loops = JoinSet::new();
        for partition in 0..partitions {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            loops.spawn(async move { worker.run_partition(partition, shutdown).await });
        }

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "partition loop failed to start"),
                Err(e) => error!(error = %e, "partition loop panicked"),
            }
        }

        info!(topic = %self.topic, "persistence worker stopped");
    }

    /// 单分区循环：严格按到达顺序逐条处理。
    ///
    /// 取消只在等待下一条消息时生效，正在处理的消息会先处理完并提交 offset。
    pub async fn run_partition(
        &self,
        partition: u32,
        shutdown: CancellationToken,
    ) -> Result<(), StreamError> {
        let mut messages = self
            .subscriber
            .subscribe(&self.topic, &self.group, partition)
            .await?;
        info!(topic = %self.topic, partition, "partition loop started");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = messages.next() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let outcome = self.process(&message).await;
            debug!(partition, offset = message.offset, ?outcome, "message processed");

            // 无论成功还是进入死信，offset 都前移，不回退重试
            if let Err(e) = self
                .subscriber
                .commit(&self.topic, &self.group, partition, message.offset + 1)
                .await
            {
                error!(partition, offset = message.offset, error = %e, "offset commit failed");
            }
        }

        info!(topic = %self.topic, partition, "partition loop stopped");
        Ok(())
    }

    /// 处理一条消息，不会返回错误
    pub async fn process(&self, message: &Message) -> MessageOutcome {
        let request: BidRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => return self.undecodable(message, e).await,
        };
        debug!(request_id = %request.id, "processing bid request");

        let record = BidRecord::now(&request);

        match self.storage.write_record(&record).await {
            Ok(id) => {
                self.stats.record_committed();
                MessageOutcome::Committed(id)
            }
            Err(e) => {
                error!(
                    request_id = %request.id,
                    error = %e,
                    "failed to save bid to storage, sending to dead-letter channel"
                );
                match self.dead_letters.send(request, &e, DATABASE_PERSIST).await {
                    Ok(()) => {
                        self.stats.record_dead_lettered();
                        MessageOutcome::DeadLettered {
                            error_kind: e.kind(),
                        }
                    }
                    Err(dlq) => {
                        self.stats.record_unrecoverable();
                        MessageOutcome::Unrecoverable {
                            reason: dlq.to_string(),
                        }
                    }
                }
            }
        }
    }

    async fn undecodable(&self, message: &Message, e: serde_json::Error) -> MessageOutcome {
        self.stats.record_unrecoverable();
        error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %e,
            "undecodable message skipped"
        );
        self.runtime_logger
            .log(
                Level::ERROR,
                "undecodable_message",
                json!({
                    "topic": message.topic,
                    "partition": message.partition,
                    "offset": message.offset,
                    "error": e.to_string(),
                    "payload": String::from_utf8_lossy(&message.payload),
                }),
            )
            .await;
        MessageOutcome::Unrecoverable {
            reason: e.to_string(),
        }
    }
}
