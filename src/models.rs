use chrono::{ DateTime, FixedOffset };
use ipnetwork::Ipv4Network;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RecordError;

/// api.spoofer.caida.org 返回的 JSON-LD (Hydra) 分页结构
#[derive(Debug, Deserialize)]
pub struct SessionPage {
    // 成员先保留为原始 JSON，逐条解析，单条出错不影响整页
    #[serde(rename = "hydra:member", default)]
    pub members: Vec<Value>,
    #[serde(rename = "hydra:totalItems")]
    pub total_items: Option<u64>,
    #[serde(rename = "hydra:view")]
    pub view: Option<PageView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageView {
    #[serde(rename = "hydra:next")]
    pub next: Option<String>,
    #[serde(rename = "hydra:last")]
    pub last: Option<String>,
}

impl SessionPage {
    pub fn next_url(&self) -> Option<&str> {
        self.view
            .as_ref()
            .and_then(|v| v.next.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// 总页数，取自 `hydra:last` 中的 `page=N` 参数
    pub fn last_page_number(&self) -> Option<u64> {
        self.view
            .as_ref()
            .and_then(|v| v.last.as_deref())
            .and_then(page_number)
    }
}

pub fn page_number(url: &str) -> Option<u64> {
    let re = Regex::new(r"[?&]page=(\d+)").ok()?;

    re.captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// API 返回的一条 `hydra:member`，字段是否必需由 `into_entry` 判断
#[derive(Debug, Deserialize)]
pub struct RawSession {
    pub session: Option<Value>,
    pub asn4: Option<Value>,
    pub client4: Option<String>,
    pub country: Option<String>,
    pub privatespoof: Option<String>,
    pub routedspoof: Option<String>,
    pub timestamp: Option<String>,
}

/// 一条欺骗测试记录
#[derive(Debug, Clone, PartialEq)]
pub struct SpoofRecord {
    pub session: String,
    pub asn4: Option<String>,
    /// 已校验为 IPv4 CIDR，输出时保持原样
    pub client4: String,
    pub country: Option<String>,
    pub privatespoof: Option<String>,
    pub routedspoof: Option<String>,
    pub timestamp: DateTime<FixedOffset>,
    /// 原始时间字符串，输出时使用
    pub timestamp_raw: String,
}

/// 解析一条 API 记录的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Record(SpoofRecord),
    /// 没有 IPv4 客户端的会话（仅 IPv6 测试）
    NonIpv4,
}

impl Entry {
    pub fn from_json(value: Value) -> Result<Entry, RecordError> {
        let raw: RawSession = serde_json::from_value(value).map_err(|e|
            RecordError::Shape(e.to_string())
        )?;
        raw.into_entry()
    }
}

impl RawSession {
    pub fn into_entry(self) -> Result<Entry, RecordError> {
        let session = scalar_to_string(self.session, "session")?.ok_or(
            RecordError::MissingField("session")
        )?;
        let timestamp_raw = non_empty(self.timestamp).ok_or(
            RecordError::MissingField("timestamp")
        )?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw).map_err(|_|
            RecordError::InvalidTimestamp(timestamp_raw.clone())
        )?;

        let client4 = match non_empty(self.client4) {
            Some(c) => {
                let c = c.trim().to_string();
                if c.parse::<Ipv4Network>().is_err() {
                    return Err(RecordError::InvalidClient(c));
                }
                c
            }
            None => {
                return Ok(Entry::NonIpv4);
            }
        };

        Ok(
            Entry::Record(SpoofRecord {
                session,
                asn4: scalar_to_string(self.asn4, "asn4")?,
                client4,
                country: non_empty(self.country),
                privatespoof: non_empty(self.privatespoof),
                routedspoof: non_empty(self.routedspoof),
                timestamp,
                timestamp_raw,
            })
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// session 和 asn4 在 API 中可能是数字也可能是字符串
fn scalar_to_string(value: Option<Value>, field: &'static str) -> Result<Option<String>, RecordError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) => Ok(non_empty(Some(s))),
        Some(other) => Err(RecordError::Shape(format!("`{}` has unexpected value {}", field, other))),
    }
}
