// src/config/policy_adapter.rs

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::admission::FilterPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// 过滤策略来源
pub trait PolicyAdapter: Send + Sync {
    fn load_policy(&self) -> Result<FilterPolicy, ConfigError>;
}

/// 从 JSON 文件读取过滤策略。
///
/// 文件不存在时退回默认策略；文件存在但格式错误则报错，不静默忽略。
pub struct FilePolicyAdapter {
    pub policy_file: PathBuf,
}

impl FilePolicyAdapter {
    pub fn new(policy_file: impl Into<PathBuf>) -> Self {
        Self {
            policy_file: policy_file.into(),
        }
    }
}

impl PolicyAdapter for FilePolicyAdapter {
    fn load_policy(&self) -> Result<FilterPolicy, ConfigError> {
        let content = match fs::read_to_string(&self.policy_file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    path = %self.policy_file.display(),
                    "filter policy file not found, using default policy"
                );
                return Ok(FilterPolicy::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.policy_file.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.policy_file.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::FilterRule;

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilePolicyAdapter::new(dir.path().join("absent.json"));
        assert_eq!(adapter.load_policy().unwrap(), FilterPolicy::default());
    }

    #[test]
    fn reads_rules_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{"rules":[{"rule":"blocked_ip_prefix","prefixes":["192.0.2."]},{"rule":"limit_ad_tracking"}]}"#,
        )
        .unwrap();

        let policy = FilePolicyAdapter::new(&path).load_policy().unwrap();
        assert_eq!(
            policy.rules,
            vec![
                FilterRule::BlockedIpPrefix {
                    prefixes: vec!["192.0.2.".into()]
                },
                FilterRule::LimitAdTracking,
            ]
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"rules":[{"rule":"unknown"}]}"#).unwrap();

        let err = FilePolicyAdapter::new(&path).load_policy().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
