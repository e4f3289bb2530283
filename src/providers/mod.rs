pub mod base;
pub mod fmp;

pub use base::PriceProvider;
pub use fmp::FmpClient;
