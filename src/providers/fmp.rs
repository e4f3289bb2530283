use crate::config::Config;
use crate::errors::{Result, SignalError};
use crate::models::stock::{DailyBar, StockProfile};
use crate::providers::base::PriceProvider;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Financial Modeling Prep 数据源
pub struct FmpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_market_cap: f64,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    historical: Vec<HistoricalBar>,
}

#[derive(Debug, Deserialize)]
struct HistoricalBar {
    date: Option<String>,
    close: Option<f64>,
    // 部分行情返回浮点形式的成交量
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Error Message")]
    error_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenerRow {
    symbol: String,
    company_name: Option<String>,
    market_cap: Option<f64>,
    country: Option<String>,
    exchange_short_name: Option<String>,
    exchange: Option<String>,
    is_etf: Option<bool>,
    is_fund: Option<bool>,
    is_actively_trading: Option<bool>,
}

impl From<ScreenerRow> for StockProfile {
    fn from(row: ScreenerRow) -> Self {
        StockProfile {
            company_name: row.company_name.unwrap_or_else(|| row.symbol.clone()),
            symbol: row.symbol,
            market_cap: row.market_cap,
            country: row.country,
            exchange: row.exchange_short_name.or(row.exchange),
            is_etf: row.is_etf,
            is_fund: row.is_fund,
            is_actively_trading: row.is_actively_trading,
        }
    }
}

impl FmpClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(SignalError::RequestError)?;

        if config.api_key.is_none() {
            warn!("No API key configured, provider requests will likely be rejected");
        }

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
            max_market_cap: config.max_market_cap,
            request_interval: config.request_interval,
            last_request: Mutex::new(None),
        })
    }

    /// 等待请求频率限制
    async fn wait_for_rate_limit(&self) {
        if self.request_interval.is_zero() {
            return;
        }

        // 预约下一个可用时间片，并发请求依次排开
        let wait = {
            let mut last = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *last {
                Some(previous) if previous + self.request_interval > now => {
                    previous + self.request_interval
                }
                _ => now,
            };
            *last = Some(slot);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Waiting {:?} for provider rate limit", wait);
            tokio::time::sleep(wait).await;
        }
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        self.wait_for_rate_limit().await;

        let mut params: Vec<(&str, String)> = query.to_vec();
        if let Some(key) = &self.api_key {
            params.push(("apikey", key.clone()));
        }

        let response = self.client.get(url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SignalError::ProviderError(format!(
                "HTTP status {} from {}",
                status, url
            )));
        }
        Ok(response.text().await?)
    }
}

/// 鉴权失败或额度用尽时，接口以 200 状态返回 `{"Error Message": "..."}`
fn check_error_body(body: &str) -> Result<()> {
    if !body.starts_with('{') {
        return Ok(());
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => Err(SignalError::ProviderError(err.error_message)),
        Err(_) => Ok(()),
    }
}

/// 解析历史行情；缺少或无法解析日期的记录被跳过
pub fn parse_history(symbol: &str, body: &str) -> Result<Vec<DailyBar>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "{}" || trimmed == "[]" {
        return Ok(Vec::new());
    }
    check_error_body(trimmed)?;

    let response: HistoricalResponse = serde_json::from_str(trimmed)?;
    let mut bars = Vec::with_capacity(response.historical.len());
    for bar in response.historical {
        let Some(date_str) = bar.date else {
            debug!("Skipping bar without date for {}", symbol);
            continue;
        };
        // 日内数据格式为 "YYYY-MM-DD HH:MM:SS"，只取日期部分
        let date_part = date_str.get(..10).unwrap_or(&date_str);
        match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            Ok(date) => bars.push(DailyBar {
                date,
                close: bar.close,
                volume: bar.volume.map(|v| v.round() as i64),
            }),
            Err(e) => debug!("Skipping bar with invalid date {} for {}: {}", date_str, symbol, e),
        }
    }

    // 按日期降序排序
    bars.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(bars)
}

pub fn parse_screener(body: &str) -> Result<Vec<StockProfile>> {
    let trimmed = body.trim();
    check_error_body(trimmed)?;
    let rows: Vec<ScreenerRow> = serde_json::from_str(trimmed)?;
    Ok(rows.into_iter().map(StockProfile::from).collect())
}

#[async_trait]
impl PriceProvider for FmpClient {
    fn name(&self) -> &'static str {
        "FMP"
    }

    async fn fetch_profiles(&self) -> Result<Vec<StockProfile>> {
        info!("Fetching screener list with market cap below {}", self.max_market_cap);

        let url = format!("{}/stock-screener", self.base_url);
        let body = self
            .get_text(
                &url,
                &[("marketCapLowerThan", format!("{:.0}", self.max_market_cap))],
            )
            .await?;
        let profiles = parse_screener(&body)?;

        info!("Screener returned {} stocks", profiles.len());
        Ok(profiles)
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        debug!("Fetching history for {} from {} to {}", symbol, from, to);

        let url = format!("{}/historical-price-full/{}", self.base_url, symbol);
        let body = self
            .get_text(
                &url,
                &[
                    ("from", from.format("%Y-%m-%d").to_string()),
                    ("to", to.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;
        let bars = parse_history(symbol, &body)?;

        debug!("Received {} days of data for {}", bars.len(), symbol);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_historical_payload() {
        let body = r#"{
            "symbol": "ABCD",
            "historical": [
                {"date": "2025-05-01", "open": 1.0, "close": 1.25, "adjClose": 1.25, "volume": 120300.0},
                {"date": "2025-05-02", "close": 1.30, "volume": 99000},
                {"date": null, "close": 9.99, "volume": 1},
                {"date": "not-a-date", "close": 9.99, "volume": 1},
                {"date": "2025-04-30", "close": null, "volume": null}
            ]
        }"#;

        let bars = parse_history("ABCD", body).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0], DailyBar::new(NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(), 1.30, 99_000));
        assert_eq!(bars[1].volume, Some(120_300));
        assert_eq!(bars[2].close, None);
        assert_eq!(bars[2].volume, None);
    }

    #[test]
    fn unknown_symbol_payload_is_empty() {
        assert!(parse_history("NOPE", "{}").unwrap().is_empty());
        assert!(parse_history("NOPE", "  ").unwrap().is_empty());
        assert!(parse_history("NOPE", r#"{"symbol": "NOPE"}"#).unwrap().is_empty());
        assert!(parse_history("NOPE", "<html>").is_err());
    }

    #[test]
    fn error_message_body_is_a_provider_error() {
        let body = r#"{"Error Message": "Invalid API KEY. Please retry or visit our documentation."}"#;
        match parse_history("ABCD", body) {
            Err(SignalError::ProviderError(msg)) => assert!(msg.starts_with("Invalid API KEY")),
            other => panic!("expected provider error, got {:?}", other),
        }
        assert!(matches!(parse_screener(body), Err(SignalError::ProviderError(_))));
    }

    #[test]
    fn parses_screener_rows() {
        let body = r#"[
            {"symbol": "TINY", "companyName": "Tiny Inc", "marketCap": 45000000,
             "country": "US", "exchangeShortName": "NASDAQ", "isEtf": false,
             "isFund": false, "isActivelyTrading": true, "beta": 1.2},
            {"symbol": "NONAME", "marketCap": null, "country": "CA", "exchange": "Toronto"}
        ]"#;

        let profiles = parse_screener(body).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].company_name, "Tiny Inc");
        assert_eq!(profiles[0].market_cap, Some(45_000_000.0));
        assert_eq!(profiles[0].exchange.as_deref(), Some("NASDAQ"));
        assert_eq!(profiles[0].is_actively_trading, Some(true));
        assert_eq!(profiles[1].company_name, "NONAME");
        assert_eq!(profiles[1].market_cap, None);
        assert_eq!(profiles[1].exchange.as_deref(), Some("Toronto"));
    }
}
