use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{Broker, Producer, StreamError};

/// flusher 每次最多从缓冲区取出的条数
const FLUSH_BATCH: usize = 256;

struct PendingRecord {
    topic: String,
    key: Option<String>,
    payload: Bytes,
}

/// **带有界缓冲区的生产者**
///
/// `publish` 就是一次 `try_send`，从不等待。单个 flusher 任务按入队顺序把缓冲区
/// 成批写入 broker（在阻塞线程池上执行，落盘 IO 不占用异步运行时）。
/// 缓冲区满时返回 [`StreamError::BufferFull`]，而不是让所有调用方一起变慢。
///
/// 所有请求任务共享同一个 `Arc<BufferedProducer>`，发布路径上唯一的同步就是 channel 自身的入队。
pub struct BufferedProducer {
    sender: mpsc::Sender<PendingRecord>,
    capacity: usize,
    shutdown: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedProducer {
    /// 会启动 flusher 任务，必须在 tokio 运行时内调用
    pub fn new(broker: Arc<Broker>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let flusher = tokio::spawn(Self::flush_loop(broker, receiver, shutdown.clone()));

        Arc::new(Self {
            sender,
            capacity,
            shutdown,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// 缓冲区中等待写入的条数
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// 停止接收新消息，把缓冲区中的消息写完，并等待 flusher 退出
    pub async fn close(&self) {
        self.shutdown.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                warn!(error = %e, "producer flusher task failed");
            }
        }
    }

    async fn flush_loop(
        broker: Arc<Broker>,
        mut receiver: mpsc::Receiver<PendingRecord>,
        shutdown: CancellationToken,
    ) {
        loop {
            let mut batch = Vec::with_capacity(FLUSH_BATCH);
            tokio::select! {
                biased;
                received = receiver.recv_many(&mut batch, FLUSH_BATCH) => {
                    if received == 0 {
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
            Self::deliver(&broker, batch).await;
        }

        receiver.close();
        let mut rest = Vec::new();
        while let Ok(record) = receiver.try_recv() {
            rest.push(record);
        }
        let drained = rest.len();
        Self::deliver(&broker, rest).await;
        debug!(drained, "producer flusher stopped");
    }

    /// 批内顺序写入；单条失败只记录日志，不影响后续消息
    async fn deliver(broker: &Arc<Broker>, batch: Vec<PendingRecord>) {
        if batch.is_empty() {
            return;
        }

        let broker = broker.clone();
        let delivered = task::spawn_blocking(move || {
            for record in batch {
                let appended =
                    broker.append(&record.topic, record.key.clone(), record.payload.clone());
                if let Err(e) = appended {
                    error!(
                        topic = %record.topic,
                        key = ?record.key,
                        payload = %String::from_utf8_lossy(&record.payload),
                        error = %e,
                        "failed to append record to stream"
                    );
                }
            }
        })
        .await;

        if let Err(e) = delivered {
            error!(error = %e, "producer delivery task failed");
        }
    }
}

impl Producer for BufferedProducer {
    fn publish(&self, topic: &str, key: Option<&str>, payload: Bytes) -> Result<(), StreamError> {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::Closed(topic.to_string()));
        }

        let record = PendingRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload,
        };

        self.sender.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StreamError::BufferFull {
                topic: topic.to_string(),
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => StreamError::Closed(topic.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_buffer_rejects_without_waiting() {
        let broker = Arc::new(Broker::new(1));
        let producer = BufferedProducer::new(broker.clone(), 2);

        // 单线程运行时：flusher 在本任务让出之前不会运行
        producer.publish("bids", None, Bytes::from_static(b"a")).unwrap();
        producer.publish("bids", None, Bytes::from_static(b"b")).unwrap();
        assert_eq!(producer.pending(), 2);

        let err = producer
            .publish("bids", None, Bytes::from_static(b"c"))
            .unwrap_err();
        assert!(matches!(err, StreamError::BufferFull { capacity: 2, .. }));

        producer.close().await;
        let delivered: Vec<Bytes> = broker
            .read_topic("bids")
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(delivered, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn close_drains_and_then_rejects() {
        let broker = Arc::new(Broker::new(2));
        let producer = BufferedProducer::new(broker.clone(), 16);

        for i in 0..10 {
            producer
                .publish("bids", Some(&format!("id-{i}")), Bytes::from(format!("{i}")))
                .unwrap();
        }
        producer.close().await;

        assert_eq!(broker.read_topic("bids").len(), 10);
        assert!(matches!(
            producer.publish("bids", None, Bytes::from_static(b"late")),
            Err(StreamError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn flusher_delivers_in_enqueue_order() {
        let broker = Arc::new(Broker::new(1));
        let producer = BufferedProducer::new(broker.clone(), 100);

        for i in 0..50 {
            producer
                .publish("bids", None, Bytes::from(i.to_string()))
                .unwrap();
        }
        producer.close().await;

        let order: Vec<String> = broker
            .read_partition("bids", 0)
            .into_iter()
            .map(|m| String::from_utf8(m.payload.to_vec()).unwrap())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(order, expected);
    }
}
