pub mod refresh_service;
pub mod stock_service;
pub mod worker_pool;
