use serde::{Deserialize, Serialize};

use crate::openrtb::request::Device;

/// 业务过滤规则，按配置顺序求值，第一条命中即返回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRule {
    /// device.lmt == 1
    LimitAdTracking,
    /// device.ip 以任一前缀开头
    BlockedIpPrefix { prefixes: Vec<String> },
}

/// 过滤原因：不是错误，对交易所表现为 "no bid"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    LimitAdTracking,
    BlockedIp { prefix: String },
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::LimitAdTracking => "lmt_opt_out",
            FilterReason::BlockedIp { .. } => "blocked_ip",
        }
    }
}

impl FilterRule {
    fn check(&self, device: &Device) -> Option<FilterReason> {
        match self {
            FilterRule::LimitAdTracking => device
                .limits_ad_tracking()
                .then_some(FilterReason::LimitAdTracking),
            FilterRule::BlockedIpPrefix { prefixes } => {
                let ip = device.ip.as_deref()?;
                prefixes
                    .iter()
                    .find(|prefix| ip.starts_with(prefix.as_str()))
                    .map(|prefix| FilterReason::BlockedIp {
                        prefix: prefix.clone(),
                    })
            }
        }
    }
}

/// 过滤策略：一组有序规则，属于配置数据而非常量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub rules: Vec<FilterRule>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                FilterRule::LimitAdTracking,
                FilterRule::BlockedIpPrefix {
                    prefixes: vec!["10.10.".to_string()],
                },
            ],
        }
    }
}

impl FilterPolicy {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// 不过滤任何请求
    pub fn allow_all() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn evaluate(&self, device: &Device) -> Option<FilterReason> {
        self.rules.iter().find_map(|rule| rule.check(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ip: Option<&str>, lmt: i32) -> Device {
        Device {
            ip: ip.map(str::to_string),
            lmt,
            ..Default::default()
        }
    }

    #[test]
    fn default_policy_filters_lmt_and_blocked_prefix() {
        let policy = FilterPolicy::default();
        assert_eq!(
            policy.evaluate(&device(Some("192.168.1.1"), 1)),
            Some(FilterReason::LimitAdTracking)
        );
        assert_eq!(
            policy.evaluate(&device(Some("10.10.5.100"), 0)),
            Some(FilterReason::BlockedIp {
                prefix: "10.10.".into()
            })
        );
        assert_eq!(policy.evaluate(&device(Some("10.1.5.100"), 0)), None);
        assert_eq!(policy.evaluate(&device(None, 0)), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let blocked_and_opted_out = device(Some("10.10.0.1"), 1);

        assert_eq!(
            FilterPolicy::default().evaluate(&blocked_and_opted_out),
            Some(FilterReason::LimitAdTracking)
        );

        let reversed = FilterPolicy::new(vec![
            FilterRule::BlockedIpPrefix {
                prefixes: vec!["10.10.".into()],
            },
            FilterRule::LimitAdTracking,
        ]);
        assert_eq!(
            reversed.evaluate(&blocked_and_opted_out).map(|r| r.as_str()),
            Some("blocked_ip")
        );
    }

    #[test]
    fn empty_policy_filters_nothing() {
        assert_eq!(FilterPolicy::allow_all().evaluate(&device(Some("10.10.0.1"), 1)), None);
    }

    #[test]
    fn policy_is_read_from_json() {
        let raw = r#"{"rules":[
            {"rule":"blocked_ip_prefix","prefixes":["10.10.","172.16."]},
            {"rule":"limit_ad_tracking"}
        ]}"#;
        let policy: FilterPolicy = serde_json::from_str(raw).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(
            policy.evaluate(&device(Some("172.16.3.4"), 0)),
            Some(FilterReason::BlockedIp {
                prefix: "172.16.".into()
            })
        );
    }
}
