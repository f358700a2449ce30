// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use bid_intake::admission::Admission;
use bid_intake::api;
use bid_intake::config::{ConfigManager, FilePolicyAdapter, IntakeSettings};
use bid_intake::logging::{self, RuntimeLogger, RuntimeLoggerConfig};
use bid_intake::stats::IntakeStats;
use bid_intake::storage::{FlakyStorage, JsonlStorage, StorageEngine};
use bid_intake::stream::{Broker, BufferedProducer};
use bid_intake::worker::{DeadLetterService, PersistenceWorker};
use bid_intake::AppState;

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "OpenRTB bid request intake service")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[arg(long, default_value = "static/filter_policy.json")]
    policy_file: PathBuf,
    #[arg(long, default_value = "bids")]
    bid_topic: String,
    #[arg(long, default_value = "bids-dlq")]
    dead_letter_topic: String,
    #[arg(long, default_value_t = 4)]
    partitions: u32,
    /// 接收端发布缓冲区容量
    #[arg(long, default_value_t = 5000)]
    bid_buffer: usize,
    /// 死信发布缓冲区容量
    #[arg(long, default_value_t = 1000)]
    dead_letter_buffer: usize,
    #[arg(long, default_value = "bid-sinker")]
    consumer_group: String,
    /// 流通道数据目录（分区日志与消费 offset）
    #[arg(long, default_value = "data/stream")]
    stream_dir: PathBuf,
    #[arg(long, default_value = "data/bid_records.jsonl")]
    storage_path: PathBuf,
    #[arg(long, default_value_t = 2000)]
    storage_timeout_ms: u64,
    /// 模拟存储失败概率（0.0 ~ 1.0），用于演示死信链路
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,
    /// 模拟存储延迟上限（毫秒），与 failure_rate 一起生效
    #[arg(long, default_value_t = 0)]
    failure_delay_ms: u64,
}

impl CliArgs {
    fn settings(&self) -> IntakeSettings {
        IntakeSettings {
            bid_topic: self.bid_topic.clone(),
            dead_letter_topic: self.dead_letter_topic.clone(),
            partitions: self.partitions,
            bid_buffer_capacity: self.bid_buffer,
            dead_letter_buffer_capacity: self.dead_letter_buffer,
            consumer_group: self.consumer_group.clone(),
            stream_dir: self.stream_dir.clone(),
            storage_path: self.storage_path.clone(),
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
            simulated_failure_rate: self.failure_rate,
            simulated_max_delay: Duration::from_millis(self.failure_delay_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化全局 tracing 日志，guard 必须活到进程结束
    let _guard = logging::subscriber::init(&args.log_dir, "bid_intake.json")
        .context("unable to set global tracing subscriber")?;
    info!(port = args.port, "bid intake starting");

    // 运行日志：死信双重失败等兜底记录写在这里
    let runtime_logger = RuntimeLogger::new(&args.log_dir, RuntimeLoggerConfig::default());
    runtime_logger
        .log(Level::INFO, "starting", json!({ "port": args.port }))
        .await;

    let config = ConfigManager::load(args.settings(), &FilePolicyAdapter::new(&args.policy_file))
        .context("failed to load configuration")?;
    let settings = &config.settings;
    info!(rules = config.policy.rules.len(), "filter policy loaded");

    // 流通道：接收主题与死信主题都落盘，重启后从已提交 offset 继续
    let broker = Arc::new(
        Broker::open(&settings.stream_dir, settings.partitions)
            .with_context(|| format!("failed to open {}", settings.stream_dir.display()))?,
    );
    broker
        .create_topic(&settings.bid_topic, settings.partitions)
        .context("failed to open bid topic")?;
    broker
        .create_topic(&settings.dead_letter_topic, settings.partitions)
        .context("failed to open dead-letter topic")?;
    let bid_producer = BufferedProducer::new(broker.clone(), settings.bid_buffer_capacity);
    let dead_letter_producer =
        BufferedProducer::new(broker.clone(), settings.dead_letter_buffer_capacity);

    // 存储引擎
    let jsonl = JsonlStorage::open(&settings.storage_path, settings.storage_timeout)
        .await
        .with_context(|| format!("failed to open {}", settings.storage_path.display()))?;
    let simulated = settings.simulated_failure_rate > 0.0 || !settings.simulated_max_delay.is_zero();
    let storage: Arc<dyn StorageEngine> = if simulated {
        info!(
            rate = settings.simulated_failure_rate,
            max_delay_ms = settings.simulated_max_delay.as_millis() as u64,
            "simulated storage failures enabled"
        );
        Arc::new(
            FlakyStorage::new(jsonl, settings.simulated_failure_rate)
                .with_max_delay(settings.simulated_max_delay),
        )
    } else {
        Arc::new(jsonl)
    };

    let stats = Arc::new(IntakeStats::default());

    // 持久化 worker
    let dead_letters = DeadLetterService::new(
        dead_letter_producer.clone(),
        settings.dead_letter_topic.clone(),
        runtime_logger.clone(),
    );
    let worker = Arc::new(PersistenceWorker::new(
        broker.clone(),
        storage,
        dead_letters,
        runtime_logger.clone(),
        stats.clone(),
        settings.bid_topic.clone(),
        settings.consumer_group.clone(),
    ));
    let shutdown = CancellationToken::new();
    let worker_task = tokio::spawn(worker.run(shutdown.clone()));

    // 接收链路
    let admission = Arc::new(Admission::new(
        bid_producer.clone(),
        settings.bid_topic.clone(),
        config.policy.clone(),
        stats.clone(),
    ));
    let state = Arc::new(AppState {
        admission,
        stats: stats.clone(),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "bid intake listening");
    runtime_logger
        .log(Level::INFO, "listening", json!({ "addr": addr }))
        .await;

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down gracefully");
        })
        .await
        .context("http server failed")?;

    // 先排空接收缓冲区，再停 worker，最后排空死信缓冲区
    bid_producer.close().await;
    shutdown.cancel();
    if let Err(e) = worker_task.await {
        tracing::error!(error = %e, "persistence worker panicked");
    }
    dead_letter_producer.close().await;

    let snapshot = stats.snapshot();
    info!(?snapshot, "bid intake shut down");
    runtime_logger
        .log(Level::INFO, "stopped", json!({ "stats": snapshot }))
        .await;
    runtime_logger.flush().await;

    Ok(())
}
