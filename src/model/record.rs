// src/model/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::openrtb::request::BidRequest;

/// 存储引擎分配的记录 ID
pub type RecordId = u64;

/// **BidRequest 的持久化投影**
///
/// 由持久化 worker 在写入前构造，提交后归存储引擎所有，不再修改。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub bid_request_id: String,
    pub domain: Option<String>,
    pub app_bundle: Option<String>,
    pub ip: Option<String>,
    pub os: Option<String>,
    pub limit_ad_tracking: bool,
    /// 映射时间，而不是请求最初到达的时间
    pub processed_at: DateTime<Utc>,
}

impl BidRecord {
    /// 按 site → domain、app → appBundle、device → ip/os/limitAdTracking 映射。
    /// 缺失的来源分组只留下对应字段为空，不报错。
    pub fn from_request(request: &BidRequest, processed_at: DateTime<Utc>) -> Self {
        let device = request.device.as_ref();
        Self {
            bid_request_id: request.id.clone(),
            domain: request.site.as_ref().and_then(|site| site.domain.clone()),
            app_bundle: request.app.as_ref().and_then(|app| app.bundle.clone()),
            ip: device.and_then(|d| d.ip.clone()),
            os: device.and_then(|d| d.os.clone()),
            limit_ad_tracking: device.map(|d| d.limits_ad_tracking()).unwrap_or(false),
            processed_at,
        }
    }

    pub fn now(request: &BidRequest) -> Self {
        Self::from_request(request, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::request::{App, Device, Site};
    use chrono::Duration;

    fn device(ip: &str, os: &str, lmt: i32) -> Device {
        Device {
            ip: Some(ip.to_string()),
            os: Some(os.to_string()),
            lmt,
            ..Default::default()
        }
    }

    #[test]
    fn maps_site_request() {
        let request = BidRequest {
            id: "test-123".into(),
            site: Some(Site {
                domain: Some("example.com".into()),
                ..Default::default()
            }),
            device: Some(device("192.168.1.1", "iOS", 0)),
            ..Default::default()
        };

        let before = Utc::now();
        let record = BidRecord::now(&request);

        assert_eq!(record.bid_request_id, "test-123");
        assert_eq!(record.domain.as_deref(), Some("example.com"));
        assert_eq!(record.app_bundle, None);
        assert_eq!(record.ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(record.os.as_deref(), Some("iOS"));
        assert!(!record.limit_ad_tracking);
        assert!(record.processed_at >= before);
        assert!(record.processed_at <= Utc::now() + Duration::seconds(1));
    }

    #[test]
    fn maps_app_request_with_lmt() {
        let request = BidRequest {
            id: "test-456".into(),
            app: Some(App {
                bundle: Some("com.example.app".into()),
                ..Default::default()
            }),
            device: Some(device("10.0.0.1", "Android", 1)),
            ..Default::default()
        };

        let record = BidRecord::now(&request);
        assert_eq!(record.domain, None);
        assert_eq!(record.app_bundle.as_deref(), Some("com.example.app"));
        assert_eq!(record.os.as_deref(), Some("Android"));
        assert!(record.limit_ad_tracking);
    }

    #[test]
    fn absent_groups_leave_fields_unset() {
        let request = BidRequest {
            id: "test-null-device".into(),
            site: Some(Site {
                domain: Some("test.com".into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = BidRecord::now(&request);
        assert_eq!(record.domain.as_deref(), Some("test.com"));
        assert_eq!(record.app_bundle, None);
        assert_eq!(record.ip, None);
        assert_eq!(record.os, None);
        assert!(!record.limit_ad_tracking);
    }

    #[test]
    fn mapping_twice_differs_only_in_processed_at() {
        let request = BidRequest {
            id: "t1".into(),
            site: Some(Site {
                domain: Some("x.com".into()),
                ..Default::default()
            }),
            device: Some(device("192.168.1.1", "iOS", 0)),
            ..Default::default()
        };

        let first = BidRecord::from_request(&request, Utc::now());
        let mut second = BidRecord::from_request(&request, Utc::now() + Duration::seconds(5));
        assert_ne!(first.processed_at, second.processed_at);
        second.processed_at = first.processed_at;
        assert_eq!(first, second);
    }

    #[test]
    fn serializes_camel_case() {
        let request = BidRequest {
            id: "t1".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(BidRecord::now(&request)).unwrap();
        assert_eq!(json["bidRequestId"], "t1");
        assert_eq!(json["limitAdTracking"], false);
        assert!(json.get("processedAt").is_some());
    }
}
