use std::time::Duration;

use chrono::{ DateTime, SecondsFormat, Utc };
use reqwest::{ header::{ HeaderMap, HeaderValue, ACCEPT }, Client };

use crate::error::CollectError;
use crate::models::SessionPage;

static CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
static LD_JSON: &str = "application/ld+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 分页数据的来源，采集过程中同一时间只有一个请求
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn fetch(&mut self, url: &str) -> Result<SessionPage, CollectError>;
}

/// 第一页的地址，只请求 `after` 之后的会话（精确到秒）
pub fn sessions_url(api_base: &str, after: DateTime<Utc>) -> Result<String, CollectError> {
    let base = checked_base(api_base)?;
    let after = after.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', "%3A");
    Ok(format!("{}/sessions?timestamp%5Bafter%5D={}", base, after))
}

/// `hydra:next` 一般是相对于 API 根地址的路径
pub fn resolve_link(api_base: &str, link: &str) -> Result<String, CollectError> {
    if link.starts_with("https://") || link.starts_with("http://") {
        return Ok(link.to_string());
    }
    if link.starts_with('/') {
        return Ok(format!("{}{}", checked_base(api_base)?, link));
    }
    Err(CollectError::InvalidUrl(link.to_string()))
}

fn checked_base(api_base: &str) -> Result<&str, CollectError> {
    if api_base.starts_with("https://") || api_base.starts_with("http://") {
        Ok(api_base.trim_end_matches('/'))
    } else {
        Err(CollectError::InvalidUrl(api_base.to_string()))
    }
}

pub struct SpooferClient {
    client: Client,
}

impl SpooferClient {
    pub fn new() -> Result<Self, CollectError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(LD_JSON));

        let client = Client::builder()
            .user_agent(CLIENT_USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CollectError::ClientSetup)?;
        Ok(Self { client })
    }
}

impl PageSource for SpooferClient {
    async fn fetch(&mut self, url: &str) -> Result<SessionPage, CollectError> {
        log::debug!("GET {}", url);
        let response = self.client
            .get(url)
            .send().await
            .map_err(|source| CollectError::Request { url: url.to_string(), source })?;

        if !response.status().is_success() {
            return Err(CollectError::Status { url: url.to_string(), status: response.status() });
        }

        // 响应体无法解析为分页结构时属于格式错误，其余为传输错误
        response.json::<SessionPage>().await.map_err(|source| {
            if source.is_decode() {
                CollectError::Decode { url: url.to_string(), message: source.to_string() }
            } else {
                CollectError::Request { url: url.to_string(), source }
            }
        })
    }
}
