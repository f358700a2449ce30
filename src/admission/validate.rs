use thiserror::Error;

use crate::openrtb::request::{BidRequest, Device};

/// 结构校验失败，对调用方表现为 bad request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing request id")]
    MissingId,

    #[error("request has neither site nor app")]
    MissingSiteAndApp,

    #[error("missing device")]
    MissingDevice,

    /// 请求体无法解析
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingId => "missing_id",
            ValidationError::MissingSiteAndApp => "missing_site_and_app",
            ValidationError::MissingDevice => "missing_device",
            ValidationError::Malformed(_) => "malformed_payload",
        }
    }
}

/// 第一阶段：结构校验。只看字段是否存在，不做任何分配。
///
/// site 和 app 同时存在是允许的。通过时返回 device 供过滤阶段使用。
pub fn validate(request: &BidRequest) -> Result<&Device, ValidationError> {
    if request.id.is_empty() {
        return Err(ValidationError::MissingId);
    }
    if request.site.is_none() && request.app.is_none() {
        return Err(ValidationError::MissingSiteAndApp);
    }
    request.device.as_ref().ok_or(ValidationError::MissingDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::request::{App, Site};

    fn valid() -> BidRequest {
        BidRequest {
            id: "t1".into(),
            site: Some(Site::default()),
            device: Some(Device::default()),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_site_or_app_or_both() {
        assert!(validate(&valid()).is_ok());

        let app_only = BidRequest {
            site: None,
            app: Some(App::default()),
            ..valid()
        };
        assert!(validate(&app_only).is_ok());

        let both = BidRequest {
            app: Some(App::default()),
            ..valid()
        };
        assert!(validate(&both).is_ok());
    }

    #[test]
    fn rejects_missing_fields() {
        let no_id = BidRequest {
            id: String::new(),
            ..valid()
        };
        assert_eq!(validate(&no_id).unwrap_err(), ValidationError::MissingId);

        let no_placement = BidRequest {
            site: None,
            ..valid()
        };
        assert_eq!(
            validate(&no_placement).unwrap_err(),
            ValidationError::MissingSiteAndApp
        );

        let no_device = BidRequest {
            device: None,
            ..valid()
        };
        assert_eq!(validate(&no_device).unwrap_err(), ValidationError::MissingDevice);
    }

    #[test]
    fn missing_id_is_reported_first() {
        let empty = BidRequest::default();
        assert_eq!(validate(&empty).unwrap_err(), ValidationError::MissingId);
    }
}
