use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::journal::Journal;
use super::{Message, MessageStream, StreamError, Subscriber};

/// 单个分区：只追加的消息日志，以及各消费组已提交的 offset
struct Partition {
    log: RwLock<Vec<Message>>,
    /// 每次追加后更新，唤醒等待中的订阅者
    high_water: watch::Sender<u64>,
    /// 串行化追加；持久化模式下持有分区日志文件
    writer: Mutex<Option<Journal>>,
    committed: Mutex<HashMap<String, u64>>,
    offsets_path: Option<PathBuf>,
}

impl Partition {
    fn in_memory() -> Self {
        Self::from_parts(Vec::new(), None, HashMap::new(), None)
    }

    /// 从 `<dir>/<index>.log` 与 `<dir>/<index>.offsets.json` 恢复
    fn open(dir: &Path, topic: &str, index: u32) -> Result<Self, StreamError> {
        let (journal, entries) = Journal::open(dir.join(format!("{index}.log")))?;
        let log = entries
            .into_iter()
            .enumerate()
            .map(|(offset, entry)| Message {
                topic: topic.to_string(),
                partition: index,
                offset: offset as u64,
                key: entry.key,
                payload: entry.payload,
                timestamp: entry.timestamp,
            })
            .collect();

        let offsets_path = dir.join(format!("{index}.offsets.json"));
        let committed = match fs::read(&offsets_path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(io::Error::from)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self::from_parts(log, Some(journal), committed, Some(offsets_path)))
    }

    fn from_parts(
        log: Vec<Message>,
        journal: Option<Journal>,
        committed: HashMap<String, u64>,
        offsets_path: Option<PathBuf>,
    ) -> Self {
        let (high_water, _) = watch::channel(log.len() as u64);
        Self {
            log: RwLock::new(log),
            high_water,
            writer: Mutex::new(journal),
            committed: Mutex::new(committed),
            offsets_path,
        }
    }

    fn is_durable(&self) -> bool {
        self.offsets_path.is_some()
    }

    fn len(&self) -> usize {
        self.log.read().len()
    }

    fn get(&self, offset: u64) -> Option<Message> {
        self.log.read().get(offset as usize).cloned()
    }

    /// 先落盘再进内存；落盘失败时消息不可见，offset 不前移
    fn append(
        &self,
        topic: &str,
        index: u32,
        key: Option<String>,
        payload: Bytes,
    ) -> Result<u64, StreamError> {
        let mut writer = self.writer.lock();
        let offset = self.len() as u64;
        let timestamp = Utc::now();

        if let Some(journal) = writer.as_mut() {
            journal.append(key.as_deref(), &payload, timestamp)?;
        }
        self.log.write().push(Message {
            topic: topic.to_string(),
            partition: index,
            offset,
            key,
            payload,
            timestamp,
        });
        drop(writer);

        self.high_water.send_modify(|hw| *hw = (*hw).max(offset + 1));
        Ok(offset)
    }

    /// 持久化模式下先写临时文件再 rename，成功后才更新内存
    fn commit(&self, group: &str, next_offset: u64) -> Result<(), StreamError> {
        let mut committed = self.committed.lock();
        if let Some(path) = &self.offsets_path {
            let mut next = committed.clone();
            next.insert(group.to_string(), next_offset);
            write_offsets(path, &next)?;
            *committed = next;
        } else {
            committed.insert(group.to_string(), next_offset);
        }
        Ok(())
    }
}

fn write_offsets(path: &Path, offsets: &HashMap<String, u64>) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&serde_json::to_vec(offsets)?)?;
    file.sync_data()?;
    fs::rename(&tmp, path)
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
    round_robin: AtomicU32,
}

impl Topic {
    fn open(root: Option<&Path>, name: &str, partitions: u32) -> Result<Self, StreamError> {
        let partitions = (0..partitions.max(1))
            .map(|index| match root {
                Some(root) => Partition::open(&root.join(name), name, index).map(Arc::new),
                None => Ok(Arc::new(Partition::in_memory())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            partitions,
            round_robin: AtomicU32::new(0),
        })
    }

    fn partition_for(&self, key: Option<&str>) -> u32 {
        let count = self.partitions.len() as u64;
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count) as u32
            }
            None => (self.round_robin.fetch_add(1, Ordering::Relaxed) as u64 % count) as u32,
        }
    }
}

/// **分区日志 broker**
///
/// 主题在首次使用时按默认分区数创建。同一 key 总是落在同一分区，
/// 无 key 的消息轮询分配；分区内保持顺序。
///
/// `new` 只在内存中保存；`open` 把每个分区的消息与已提交 offset 写到目录下，
/// 重启后从磁盘恢复，消费组从上次提交的位置继续。
pub struct Broker {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    default_partitions: u32,
    root: Option<PathBuf>,
}

impl Broker {
    pub fn new(default_partitions: u32) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            default_partitions: default_partitions.max(1),
            root: None,
        }
    }

    /// 持久化模式，目录结构为 `<root>/<topic>/<partition>.log`
    pub fn open(root: impl Into<PathBuf>, default_partitions: u32) -> Result<Self, StreamError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "opened durable stream broker");
        Ok(Self {
            root: Some(root),
            ..Self::new(default_partitions)
        })
    }

    /// 以指定分区数创建主题（并恢复已有数据）；已存在时不做任何事
    pub fn create_topic(&self, name: &str, partitions: u32) -> Result<(), StreamError> {
        let mut topics = self.topics.write();
        if !topics.contains_key(name) {
            let topic = Topic::open(self.root.as_deref(), name, partitions)?;
            topics.insert(name.to_string(), Arc::new(topic));
        }
        Ok(())
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, StreamError> {
        if let Some(topic) = self.topics.read().get(name) {
            return Ok(topic.clone());
        }
        self.create_topic(name, self.default_partitions)?;
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StreamError::Closed(name.to_string()))
    }

    fn partition(&self, topic: &str, partition: u32) -> Result<Arc<Partition>, StreamError> {
        self.topic(topic)?
            .partitions
            .get(partition as usize)
            .cloned()
            .ok_or_else(|| StreamError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    /// 追加一条消息，返回 `(partition, offset)`。持久化模式下会做同步文件 IO。
    pub fn append(
        &self,
        topic: &str,
        key: Option<String>,
        payload: Bytes,
    ) -> Result<(u32, u64), StreamError> {
        let handle = self.topic(topic)?;
        let partition = handle.partition_for(key.as_deref());
        let offset = handle.partitions[partition as usize].append(topic, partition, key, payload)?;
        Ok((partition, offset))
    }

    /// 某个分区当前全部消息的快照
    pub fn read_partition(&self, topic: &str, partition: u32) -> Vec<Message> {
        self.partition(topic, partition)
            .map(|p| p.log.read().clone())
            .unwrap_or_default()
    }

    /// 整个主题的快照，按分区依次排列
    pub fn read_topic(&self, topic: &str) -> Vec<Message> {
        self.topic(topic)
            .map(|t| t.partitions.iter().flat_map(|p| p.log.read().clone()).collect())
            .unwrap_or_default()
    }

    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.partition(topic, partition)
            .ok()
            .and_then(|p| p.committed.lock().get(group).copied())
    }
}

#[async_trait]
impl Subscriber for Broker {
    fn partitions(&self, topic: &str) -> u32 {
        match self.topic(topic) {
            Ok(topic) => topic.partitions.len() as u32,
            Err(e) => {
                error!(topic, error = %e, "failed to open topic");
                0
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<MessageStream, StreamError> {
        let log = self.partition(topic, partition)?;
        let start = log.committed.lock().get(group).copied().unwrap_or(0);
        let wake = log.high_water.subscribe();

        debug!(topic, group, partition, start, "subscribed to partition");

        let messages = stream::unfold((log, start, wake), |(log, offset, mut wake)| async move {
            loop {
                // 先标记已读，再检查日志，避免漏掉两者之间的追加
                let _ = wake.borrow_and_update();
                if let Some(message) = log.get(offset) {
                    return Some((message, (log, offset + 1, wake)));
                }
                if wake.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(messages.boxed())
    }

    async fn commit(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<(), StreamError> {
        let log = self.partition(topic, partition)?;
        if !log.is_durable() {
            return log.commit(group, next_offset);
        }

        let group = group.to_string();
        tokio::task::spawn_blocking(move || log.commit(&group, next_offset))
            .await
            .map_err(|e| StreamError::Io(io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_keeps_partition_and_order() {
        let broker = Broker::new(4);
        let mut seen = Vec::new();
        for i in 0..5 {
            seen.push(
                broker
                    .append("bids", Some("t1".into()), Bytes::from(format!("m{i}")))
                    .unwrap(),
            );
        }

        let partition = seen[0].0;
        assert!(seen.iter().all(|(p, _)| *p == partition));
        let offsets: Vec<u64> = seen.iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);

        let payloads: Vec<Bytes> = broker
            .read_partition("bids", partition)
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(payloads[0], Bytes::from("m0"));
        assert_eq!(payloads[4], Bytes::from("m4"));
    }

    #[tokio::test]
    async fn keyless_messages_round_robin() {
        let broker = Broker::new(3);
        let partitions: Vec<u32> = (0..6)
            .map(|_| broker.append("bids", None, Bytes::from_static(b"x")).unwrap().0)
            .collect();
        assert_eq!(partitions, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn subscriber_sees_existing_and_later_messages() {
        let broker = Arc::new(Broker::new(1));
        broker.append("bids", None, Bytes::from_static(b"first")).unwrap();

        let mut stream = broker.subscribe("bids", "g", 0).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.offset, 0);

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.append("bids", None, Bytes::from_static(b"second")).unwrap();
        });

        let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("subscriber woke up")
            .unwrap();
        assert_eq!(second.offset, 1);
        assert_eq!(second.payload, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn resubscribe_resumes_from_committed_offset() {
        let broker = Broker::new(1);
        for i in 0..3 {
            broker.append("bids", None, Bytes::from(format!("m{i}"))).unwrap();
        }

        broker.commit("bids", "sinker", 0, 2).await.unwrap();
        assert_eq!(broker.committed_offset("bids", "sinker", 0), Some(2));

        let mut stream = broker.subscribe("bids", "sinker", 0).await.unwrap();
        assert_eq!(stream.next().await.unwrap().offset, 2);

        // 其他消费组从头开始
        let mut other = broker.subscribe("bids", "audit", 0).await.unwrap();
        assert_eq!(other.next().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn unknown_partition_is_an_error() {
        let broker = Broker::new(2);
        let err = broker.subscribe("bids", "g", 7).await.err().unwrap();
        assert!(matches!(err, StreamError::UnknownPartition { partition: 7, .. }));
    }

    #[test]
    fn explicit_topic_partition_count_wins() {
        let broker = Broker::new(4);
        broker.create_topic("bids-dlq", 1).unwrap();
        assert_eq!(broker.partitions("bids-dlq"), 1);
        assert_eq!(broker.partitions("bids"), 4);
    }

    #[tokio::test]
    async fn reopened_broker_keeps_messages_and_offsets() {
        let dir = tempfile::tempdir().unwrap();

        {
            let broker = Broker::open(dir.path(), 1).unwrap();
            broker.create_topic("bids", 2).unwrap();
            for id in ["a", "b", "c"] {
                broker.append("bids", Some(id.into()), Bytes::from(id)).unwrap();
            }
            let (partition, _) = broker.append("bids", Some("a".into()), Bytes::from("a2")).unwrap();
            broker.commit("bids", "sinker", partition, 1).await.unwrap();
        }

        let broker = Broker::open(dir.path(), 1).unwrap();
        broker.create_topic("bids", 2).unwrap();
        assert_eq!(broker.read_topic("bids").len(), 4);

        let a = broker
            .read_topic("bids")
            .into_iter()
            .find(|m| m.key.as_deref() == Some("a"))
            .unwrap();
        assert_eq!(broker.committed_offset("bids", "sinker", a.partition), Some(1));

        let mut resumed = broker.subscribe("bids", "sinker", a.partition).await.unwrap();
        assert_eq!(resumed.next().await.unwrap().offset, 1);

        // 新追加的消息接在恢复出的日志后面
        let (partition, offset) = broker.append("bids", Some("a".into()), Bytes::from("a3")).unwrap();
        assert_eq!(partition, a.partition);
        assert_eq!(offset, broker.read_partition("bids", partition).len() as u64 - 1);
    }
}
