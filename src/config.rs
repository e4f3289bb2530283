use chrono_tz::Tz;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// 运行配置，采用 builder 风格构建
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub api_base_url: String,
    pub api_key: Option<String>,
    /// 股票池的市值上限（美元）
    pub max_market_cap: f64,
    pub country: String,
    pub batch_size: usize,
    pub worker_pool_size: usize,
    /// 批次之间的间隔
    pub batch_delay: Duration,
    /// 单只股票抓取的超时时间
    pub fetch_timeout: Duration,
    /// 数据源两次请求之间的最小间隔
    pub request_interval: Duration,
    pub lookback_days: i64,
    pub market_timezone: Tz,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self {
            data_dir: "data".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            max_market_cap: 100_000_000.0,
            country: "US".to_string(),
            batch_size: 2,
            worker_pool_size: 10,
            batch_delay: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(30),
            request_interval: Duration::ZERO,
            lookback_days: 30,
            market_timezone: chrono_tz::America::New_York,
            shutdown_grace: Duration::from_secs(60),
        }
    }

    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = dir.to_string();
        self
    }

    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_max_market_cap(mut self, cap: f64) -> Self {
        self.max_market_cap = cap;
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_string();
        self
    }

    // 批次大小和线程池大小至少为 1
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    pub fn with_market_timezone(mut self, tz: Tz) -> Self {
        self.market_timezone = tz;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_refresh_pipeline() {
        let config = Config::new();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.worker_pool_size, 10);
        assert_eq!(config.batch_delay, Duration::from_millis(100));
        assert_eq!(config.lookback_days, 30);
        assert_eq!(config.country, "US");
    }

    #[test]
    fn builder_clamps_sizes() {
        let config = Config::new()
            .with_batch_size(0)
            .with_worker_pool_size(0)
            .with_api_key(Some("  ".to_string()))
            .with_api_base_url("http://localhost:8080/api/");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.worker_pool_size, 1);
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
    }
}
