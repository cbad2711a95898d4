use std::path::PathBuf;

/// 退出码
pub mod codes {
    pub const SUCCESS: u8 = 0;
    pub const CONFIG_ERROR: u8 = 1;
    pub const FETCH_FAILED: u8 = 2;
    pub const BAD_RESPONSE: u8 = 3;
    pub const IO_FAILED: u8 = 4;
}

/// 致命错误，出现即终止整个采集过程
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("cannot build HTTP client: {0}")]
    ClientSetup(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request to {url} returned status {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("unexpected response shape from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("cannot write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 单条记录的问题，跳过该记录并计数，不影响后续处理
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("invalid IPv4 client prefix `{0}`")]
    InvalidClient(String),

    #[error("record is not an object of the expected shape: {0}")]
    Shape(String),
}

pub fn exit_code(err: &CollectError) -> u8 {
    match err {
        CollectError::Request { .. } | CollectError::Status { .. } => codes::FETCH_FAILED,
        CollectError::Decode { .. } => codes::BAD_RESPONSE,
        CollectError::ClientSetup(_) | CollectError::InvalidUrl(_) => codes::CONFIG_ERROR,
        CollectError::Report { .. } => codes::IO_FAILED,
    }
}
