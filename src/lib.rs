// 公开导出的模块，供外部使用
pub mod analysis;
pub mod config;
pub mod data_store;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;

#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use data_store::{ArrowHistoryStore, HistoryStore};
pub use errors::{Result, SignalError};
pub use models::stock::{DailyBar, PriceObservation, PriceSeries, StockAnalysis, StockProfile};
pub use providers::{FmpClient, PriceProvider};
pub use services::refresh_service::{FetchOutcome, RefreshReport, RefreshService};
pub use services::stock_service::StockService;
