use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    ArrowError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Data error: {0}")]
    DataError(String),

    /// 调用方请求的数据不存在（例如某代码没有任何历史行情）
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SignalError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SignalError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;

impl From<arrow::error::ArrowError> for SignalError {
    fn from(e: arrow::error::ArrowError) -> Self {
        SignalError::ArrowError(e.to_string())
    }
}
