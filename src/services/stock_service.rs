use crate::analysis::analyzer;
use crate::config::Config;
use crate::data_store::HistoryStore;
use crate::errors::{Result, SignalError};
use crate::models::stock::{PriceObservation, PriceSeries, StockAnalysis, StockProfile};
use crate::providers::base::PriceProvider;
use crate::services::refresh_service::{RefreshReport, RefreshService};
use log::{debug, error, info};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// 对外提供的核心操作：股票池导入、行情刷新、信号分析与历史查询
pub struct StockService {
    config: Config,
    provider: Arc<dyn PriceProvider>,
    store: Arc<dyn HistoryStore>,
    refresher: RefreshService,
}

impl StockService {
    pub fn new(config: Config, provider: Arc<dyn PriceProvider>, store: Arc<dyn HistoryStore>) -> Self {
        let refresher = RefreshService::new(&config, Arc::clone(&provider), Arc::clone(&store));
        Self {
            config,
            provider,
            store,
            refresher,
        }
    }

    /// 从筛选器拉取小盘股列表，只保留配置的国家，整体替换已有股票池
    pub async fn import_catalog(&self) -> Result<usize> {
        let profiles = self.provider.fetch_profiles().await?;
        let total = profiles.len();

        let selected: Vec<StockProfile> = profiles
            .into_iter()
            .filter(|p| p.country.as_deref() == Some(self.config.country.as_str()))
            .collect();
        let count = selected.len();

        let committed = self
            .store
            .replace_profiles(selected)
            .and_then(|_| self.store.flush());
        if let Err(e) = committed {
            self.store.rollback();
            return Err(e);
        }

        info!(
            "Imported {} of {} {} screener stocks (country {})",
            count,
            total,
            self.provider.name(),
            self.config.country
        );
        Ok(count)
    }

    pub fn list_profiles(&self) -> Result<Vec<StockProfile>> {
        self.store.list_all_profiles()
    }

    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let profiles = self.store.list_all_profiles()?;
        Ok(self.refresher.refresh_all(&profiles).await)
    }

    /// 分析所有有历史数据的股票；没有数据或读取失败的股票被跳过
    pub fn analyze_all(&self) -> Result<Vec<StockAnalysis>> {
        let profiles = self.store.list_all_profiles()?;
        let mut analyses = Vec::with_capacity(profiles.len());

        for profile in &profiles {
            let observations = match self.store.find_observations(&profile.symbol) {
                Ok(observations) => observations,
                Err(e) => {
                    error!("Error analyzing stock: {} - {}", profile.symbol, e);
                    continue;
                }
            };
            if observations.is_empty() {
                debug!("Skipping {} without history", profile.symbol);
                continue;
            }

            analyses.push(analyzer::analyze(profile, &PriceSeries::new(observations)));
        }

        info!("Analyzed {} of {} stocks", analyses.len(), profiles.len());
        Ok(analyses)
    }

    /// 按日期降序返回历史行情；无数据时返回 `NotFound`
    pub fn get_history(&self, symbol: &str) -> Result<Vec<PriceObservation>> {
        let observations = self.store.find_observations(symbol)?;
        if observations.is_empty() {
            return Err(SignalError::NotFound(format!(
                "No historical data found for symbol: {}",
                symbol
            )));
        }
        Ok(observations)
    }

    pub fn get_observation_count(&self) -> Result<usize> {
        self.store.count_observations()
    }

    pub fn cancel_refresh(&self) {
        self.refresher.cancel();
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.refresher.cancellation_token()
    }

    /// 释放抓取线程池；返回是否在宽限期内正常结束
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.refresher.shutdown(grace).await
    }
}
