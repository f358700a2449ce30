// src/logging/runtime_logger.rs

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::{task, time};
use tracing::Level;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::MakeWriter;

const LEVELS: [Level; 5] = [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR];

/// 单条日志消息
struct LogEntry {
    level: Level,
    content: String,
}

enum LogCommand {
    Entry(LogEntry),
    Flush(oneshot::Sender<()>),
}

/// 运行日志参数
#[derive(Debug, Clone)]
pub struct RuntimeLoggerConfig {
    /// 文件前缀，最终文件名形如 runtime_error.json.2026-10-19-08
    pub file_prefix: String,
    /// mpsc 通道缓冲区大小
    pub buffer_size: usize,
    /// 每个日志级别批量写入的条数
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// 超过该时长未修改的日志文件会被清理
    pub retention: Duration,
}

impl Default for RuntimeLoggerConfig {
    fn default() -> Self {
        Self {
            file_prefix: "runtime".to_string(),
            buffer_size: 1000,
            batch_size: 100,
            flush_interval: Duration::from_millis(1000),
            retention: Duration::from_secs(72 * 3600),
        }
    }
}

/// **运行日志管理器（RuntimeLogger）**
///
/// 本地持久化的兜底日志：按级别分流到不同的按小时滚动文件。
/// 死信发布也失败时，这里是最后能留下记录的地方。
pub struct RuntimeLogger {
    sender: Sender<LogCommand>,
}

impl RuntimeLogger {
    /// 必须在 tokio 运行时内调用（会启动后台写入和清理任务）
    pub fn new(log_dir: impl AsRef<Path>, config: RuntimeLoggerConfig) -> Arc<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));

        let mut log_files = HashMap::new();
        for level in LEVELS {
            let file_name = format!("{}_{}.json", config.file_prefix, level.as_str().to_lowercase());
            log_files.insert(level, Arc::new(rolling::hourly(&log_dir, file_name)));
        }

        tokio::spawn(Self::background_log_writer(
            log_files,
            receiver,
            config.batch_size.max(1),
            config.flush_interval,
        ));

        // 定期清理过期日志文件
        {
            let prefix = config.file_prefix.clone();
            let retention = config.retention;
            tokio::spawn(async move {
                let mut tick = time::interval(Duration::from_secs(3600));
                loop {
                    tick.tick().await;
                    Self::cleanup_old_logs(&log_dir, &prefix, retention).await;
                }
            });
        }

        Arc::new(Self { sender })
    }

    /// 记录一条运行日志，`fields` 会并入日志对象
    pub async fn log(&self, level: Level, event: &str, fields: Value) {
        let mut entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "event": event,
        });
        if let (Some(target), Value::Object(extra)) = (entry.as_object_mut(), fields) {
            target.extend(extra);
        }

        let command = LogCommand::Entry(LogEntry {
            level,
            content: entry.to_string(),
        });
        if let Err(e) = self.sender.send(command).await {
            eprintln!("Failed to send runtime log message: {}", e);
        }
    }

    /// 把所有缓冲中的日志写盘，写完后返回
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(LogCommand::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    async fn background_log_writer(
        log_files: HashMap<Level, Arc<RollingFileAppender>>,
        mut receiver: Receiver<LogCommand>,
        batch_size: usize,
        flush_interval: Duration,
    ) {
        // 每个日志级别独立的缓冲区
        let mut buffers: HashMap<Level, Vec<String>> = HashMap::new();
        let mut interval = time::interval(flush_interval);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(LogCommand::Entry(entry)) => {
                        let buffer = buffers.entry(entry.level).or_default();
                        buffer.push(entry.content);
                        if buffer.len() >= batch_size {
                            let batch = std::mem::take(buffer);
                            if let Some(appender) = log_files.get(&entry.level) {
                                Self::write_logs_to_disk(appender.clone(), batch).await;
                            }
                        }
                    }
                    Some(LogCommand::Flush(done)) => {
                        Self::write_all(&log_files, &mut buffers).await;
                        let _ = done.send(());
                    }
                    None => {
                        Self::write_all(&log_files, &mut buffers).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    Self::write_all(&log_files, &mut buffers).await;
                }
            }
        }
    }

    async fn write_all(
        log_files: &HashMap<Level, Arc<RollingFileAppender>>,
        buffers: &mut HashMap<Level, Vec<String>>,
    ) {
        for (level, buffer) in buffers.iter_mut() {
            if buffer.is_empty() {
                continue;
            }
            let batch = std::mem::take(buffer);
            if let Some(appender) = log_files.get(level) {
                Self::write_logs_to_disk(appender.clone(), batch).await;
            }
        }
    }

    async fn write_logs_to_disk(file: Arc<RollingFileAppender>, batch: Vec<String>) {
        let content = batch.join("\n") + "\n";
        let written = task::spawn_blocking(move || {
            let mut writer = file.make_writer();
            writer.write_all(content.as_bytes())?;
            writer.flush()
        })
        .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Failed to write runtime logs: {}", e),
            Err(e) => eprintln!("Runtime log writer task failed: {}", e),
        }
    }

    async fn cleanup_old_logs(log_dir: &Path, prefix: &str, retention: Duration) {
        let now = SystemTime::now();
        let mut dir = match tokio::fs::read_dir(log_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Failed to read log directory {}: {}", log_dir.display(), e);
                return;
            }
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(prefix) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if now.duration_since(modified).unwrap_or_default() >= retention {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_level(dir: &Path, prefix: &str, level: &str) -> String {
        let wanted = format!("{}_{}.json", prefix, level);
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&wanted))
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn flush_writes_entries_per_level() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RuntimeLogger::new(dir.path(), RuntimeLoggerConfig::default());

        logger
            .log(Level::ERROR, "dead_letter_publish_failed", json!({"bid_request_id": "t2"}))
            .await;
        logger.log(Level::INFO, "worker_started", json!({"partition": 0})).await;
        logger.flush().await;

        let errors = read_level(dir.path(), "runtime", "error");
        let line: Value = serde_json::from_str(errors.lines().next().unwrap()).unwrap();
        assert_eq!(line["event"], "dead_letter_publish_failed");
        assert_eq!(line["bid_request_id"], "t2");
        assert_eq!(line["level"], "ERROR");

        let infos = read_level(dir.path(), "runtime", "info");
        assert!(infos.contains("worker_started"));
        assert!(!infos.contains("dead_letter_publish_failed"));
    }

    #[tokio::test]
    async fn batch_size_triggers_write_without_flush() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeLoggerConfig {
            batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let logger = RuntimeLogger::new(dir.path(), config);

        logger.log(Level::WARN, "a", Value::Null).await;
        logger.log(Level::WARN, "b", Value::Null).await;
        // 用一次 flush 作为同步点：它排在两条日志之后处理
        logger.flush().await;

        let warns = read_level(dir.path(), "runtime", "warn");
        assert_eq!(warns.lines().count(), 2);
    }

    #[tokio::test]
    async fn cleanup_only_removes_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("runtime_info.json.old"), "x").unwrap();
        std::fs::write(dir.path().join("other.txt"), "y").unwrap();

        RuntimeLogger::cleanup_old_logs(dir.path(), "runtime", Duration::ZERO).await;

        assert!(!dir.path().join("runtime_info.json.old").exists());
        assert!(dir.path().join("other.txt").exists());
    }
}
