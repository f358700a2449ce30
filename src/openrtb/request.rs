use serde::{Deserialize, Deserializer, Serialize};

/// OpenRTB BidRequest 结构体（接收端精简版）。
///
/// 构造后不再修改。未知字段在反序列化时被忽略，这样下游消费者可以读取
/// 新版本生产者额外携带的字段而不会失败。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BidRequest {
    /// 请求 ID；缺失或为 null 时视为空串，由准入校验拒绝
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,

    /// 广告展示请求列表，只透传不检查
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imp: Vec<Impression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// 单个广告位描述
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Impression {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    /// 底价
    #[serde(default)]
    pub bidfloor: f64,
    #[serde(default = "default_currency")]
    pub bidfloorcur: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Banner {
    #[serde(default)]
    pub w: i32,
    #[serde(default)]
    pub h: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Video {
    #[serde(default)]
    pub mimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minduration: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxduration: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Site {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// IAB 分类
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cat: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct App {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 例如 com.rovio.angrybirds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Device {
    #[serde(rename = "ua", default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// 广告标识符（IFA）
    #[serde(rename = "ifa", default, skip_serializing_if = "Option::is_none")]
    pub advertising_id: Option<String>,
    /// Limit Ad Tracking：1 表示用户拒绝追踪
    #[serde(default)]
    pub lmt: i32,
}

impl Device {
    pub fn limits_ad_tracking(&self) -> bool {
        self.lmt == 1
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyeruid: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl BidRequest {
    /// 使用 simd-json 解析入站请求体（会原地修改缓冲区）
    pub fn from_slice(body: &mut [u8]) -> Result<Self, simd_json::Error> {
        simd_json::serde::from_slice(body)
    }
}
