use std::path::PathBuf;
use std::time::Duration;

use crate::admission::FilterPolicy;
use crate::config::policy_adapter::{ConfigError, PolicyAdapter};

/// 运行参数
#[derive(Clone, Debug)]
pub struct IntakeSettings {
    pub bid_topic: String,
    pub dead_letter_topic: String,
    pub partitions: u32,
    /// 接收端发布缓冲区容量
    pub bid_buffer_capacity: usize,
    /// 死信发布缓冲区容量
    pub dead_letter_buffer_capacity: usize,
    pub consumer_group: String,
    /// 分区日志与已提交 offset 的目录
    pub stream_dir: PathBuf,
    pub storage_path: PathBuf,
    pub storage_timeout: Duration,
    /// 模拟存储失败的概率，0 表示不注入
    pub simulated_failure_rate: f64,
    /// 模拟写入延迟上限，0 表示不注入
    pub simulated_max_delay: Duration,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            bid_topic: "bids".to_string(),
            dead_letter_topic: "bids-dlq".to_string(),
            partitions: 4,
            bid_buffer_capacity: 5000,
            dead_letter_buffer_capacity: 1000,
            consumer_group: "bid-sinker".to_string(),
            stream_dir: PathBuf::from("data/stream"),
            storage_path: PathBuf::from("data/bid_records.jsonl"),
            storage_timeout: Duration::from_millis(2000),
            simulated_failure_rate: 0.0,
            simulated_max_delay: Duration::ZERO,
        }
    }
}

impl IntakeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(invalid("partitions", "must be at least 1"));
        }
        if self.bid_buffer_capacity == 0 {
            return Err(invalid("bid_buffer_capacity", "must be at least 1"));
        }
        if self.dead_letter_buffer_capacity == 0 {
            return Err(invalid("dead_letter_buffer_capacity", "must be at least 1"));
        }
        if self.bid_topic == self.dead_letter_topic {
            return Err(invalid("dead_letter_topic", "must differ from bid_topic"));
        }
        if !(0.0..=1.0).contains(&self.simulated_failure_rate) {
            return Err(invalid("simulated_failure_rate", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

/// 汇总运行参数与过滤策略
#[derive(Clone, Debug)]
pub struct ConfigManager {
    pub settings: IntakeSettings,
    pub policy: FilterPolicy,
}

impl ConfigManager {
    pub fn new(settings: IntakeSettings, policy: FilterPolicy) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { settings, policy })
    }

    pub fn load(settings: IntakeSettings, adapter: &dyn PolicyAdapter) -> Result<Self, ConfigError> {
        Self::new(settings, adapter.load_policy()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = IntakeSettings::default();
        assert_eq!(settings.bid_buffer_capacity, 5000);
        assert_eq!(settings.dead_letter_buffer_capacity, 1000);
        assert!(ConfigManager::new(settings, FilterPolicy::default()).is_ok());
    }

    #[test]
    fn rejects_zero_capacity_and_shared_topics() {
        let zero = IntakeSettings {
            bid_buffer_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Invalid { name: "bid_buffer_capacity", .. })
        ));

        let shared = IntakeSettings {
            dead_letter_topic: "bids".into(),
            ..Default::default()
        };
        assert!(shared.validate().is_err());

        let rate = IntakeSettings {
            simulated_failure_rate: 1.5,
            ..Default::default()
        };
        assert!(rate.validate().is_err());
    }
}
