use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 股票基础资料（来自筛选器的快照，整体替换）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockProfile {
    pub symbol: String,
    pub company_name: String,
    pub market_cap: Option<f64>,
    pub country: Option<String>,
    pub exchange: Option<String>,
    pub is_etf: Option<bool>,
    pub is_fund: Option<bool>,
    pub is_actively_trading: Option<bool>,
}

impl StockProfile {
    pub fn new(symbol: &str, company_name: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            company_name: company_name.to_string(),
            market_cap: None,
            country: None,
            exchange: None,
            is_etf: None,
            is_fund: None,
            is_actively_trading: None,
        }
    }

    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }
}

/// 数据源返回的单日收盘数据
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub volume: Option<i64>,
}

impl DailyBar {
    pub fn new(date: NaiveDate, close: f64, volume: i64) -> Self {
        Self {
            date,
            close: Some(close),
            volume: Some(volume),
        }
    }

    pub fn into_observation(self, symbol: &str, captured_at: DateTime<Utc>) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            date: self.date,
            price: self.close,
            volume: self.volume,
            last_updated: captured_at,
        }
    }
}

/// 已入库的历史行情，(symbol, date) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: Option<f64>,
    pub volume: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

/// 单只股票的历史序列，按日期降序（最新在前）
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    observations: Vec<PriceObservation>,
}

impl PriceSeries {
    /// 接受任意顺序的数据；同一日期只保留最后抓取的一条
    pub fn new(mut observations: Vec<PriceObservation>) -> Self {
        observations.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.last_updated.cmp(&a.last_updated))
        });
        observations.dedup_by_key(|o| o.date);
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn latest(&self) -> Option<&PriceObservation> {
        self.observations.first()
    }

    pub fn oldest(&self) -> Option<&PriceObservation> {
        self.observations.last()
    }

    pub fn get(&self, index: usize) -> Option<&PriceObservation> {
        self.observations.get(index)
    }

    pub fn observations(&self) -> &[PriceObservation] {
        &self.observations
    }

    pub fn into_observations(self) -> Vec<PriceObservation> {
        self.observations
    }
}

/// 分析结果，不落库，每次请求重新计算
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAnalysis {
    pub ticker: String,
    pub company_name: String,
    pub market_cap: f64,
    pub volume: i64,
    pub price_change_1d: f64,
    pub price_change_5d: f64,
    pub price_change_30d: f64,
    pub is_uptrending: bool,
    pub has_unusual_volume: bool,
    pub average_volume: f64,
}

impl StockAnalysis {
    /// 仅含基础资料、所有指标为零值的结果
    pub fn baseline(profile: &StockProfile) -> Self {
        Self {
            ticker: profile.symbol.clone(),
            company_name: profile.company_name.clone(),
            market_cap: profile.market_cap.unwrap_or(0.0),
            volume: 0,
            price_change_1d: 0.0,
            price_change_5d: 0.0,
            price_change_30d: 0.0,
            is_uptrending: false,
            has_unusual_volume: false,
            average_volume: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(day: u32, price: f64, captured_secs: i64) -> PriceObservation {
        PriceObservation {
            symbol: "ABCD".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            price: Some(price),
            volume: Some(1000),
            last_updated: Utc.timestamp_opt(captured_secs, 0).unwrap(),
        }
    }

    #[test]
    fn series_is_most_recent_first() {
        let series = PriceSeries::new(vec![obs(3, 1.0, 0), obs(7, 2.0, 0), obs(5, 3.0, 0)]);
        let days: Vec<u32> = series
            .observations()
            .iter()
            .map(|o| chrono::Datelike::day(&o.date))
            .collect();
        assert_eq!(days, vec![7, 5, 3]);
        assert_eq!(series.latest().unwrap().price, Some(2.0));
        assert_eq!(series.oldest().unwrap().price, Some(1.0));
    }

    #[test]
    fn series_keeps_one_observation_per_date() {
        let series = PriceSeries::new(vec![obs(4, 1.0, 10), obs(4, 9.0, 20), obs(3, 2.0, 0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.latest().unwrap().price, Some(9.0));
    }

    #[test]
    fn analysis_serializes_with_camel_case_keys() {
        let profile = StockProfile::new("ABCD", "Abcd Corp");
        let json = serde_json::to_value(StockAnalysis::baseline(&profile)).unwrap();
        assert_eq!(json["ticker"], "ABCD");
        assert_eq!(json["priceChange1d"], 0.0);
        assert_eq!(json["priceChange30d"], 0.0);
        assert_eq!(json["hasUnusualVolume"], false);
        assert_eq!(json["marketCap"], 0.0);
    }
}
