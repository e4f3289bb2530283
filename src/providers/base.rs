use crate::errors::Result;
use crate::models::stock::{DailyBar, StockProfile};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Base trait for upstream market data providers
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the screener universe (small-cap catalog)
    async fn fetch_profiles(&self) -> Result<Vec<StockProfile>>;

    /// Fetch daily bars for one symbol within `[from, to]`.
    /// "No data" is an empty vector, errors are reserved for transport or decoding failures.
    async fn fetch_history(&self, symbol: &str, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<DailyBar>>;
}
