use crate::config::Config;
use crate::data_store::HistoryStore;
use crate::errors::Result;
use crate::models::stock::{PriceObservation, StockProfile};
use crate::providers::base::PriceProvider;
use crate::services::worker_pool::WorkerPool;
use crate::util;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 单只股票的抓取结果
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Vec<PriceObservation>),
    Empty,
    Failed(String),
}

/// 一次刷新的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub symbols: usize,
    pub batches: usize,
    pub batches_saved: usize,
    pub batches_failed: usize,
    pub symbols_fetched: usize,
    pub symbols_empty: usize,
    pub symbols_failed: usize,
    pub observations_saved: usize,
    /// 清空旧数据失败，本次未抓取任何数据
    pub wipe_failed: bool,
    pub cancelled: bool,
}

/// 历史行情刷新：全量清空后按批次重新抓取并写入
pub struct RefreshService {
    provider: Arc<dyn PriceProvider>,
    store: Arc<dyn HistoryStore>,
    workers: WorkerPool,
    batch_size: usize,
    batch_delay: Duration,
    fetch_timeout: Duration,
    lookback_days: i64,
    market_timezone: Tz,
    cancelled: Arc<AtomicBool>,
}

impl RefreshService {
    pub fn new(config: &Config, provider: Arc<dyn PriceProvider>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            provider,
            store,
            workers: WorkerPool::new(config.worker_pool_size),
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay,
            fetch_timeout: config.fetch_timeout,
            lookback_days: config.lookback_days,
            market_timezone: config.market_timezone,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 请求停止当前刷新；在下一个批次或下一次提交任务前生效
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 供信号处理等外部代码共享的取消标志
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel();
        self.workers.shutdown(grace).await
    }

    /// 刷新整个股票池的历史行情。单只股票或单个批次的失败只记录日志，不会中断整体刷新。
    pub async fn refresh_all(&self, profiles: &[StockProfile]) -> RefreshReport {
        let report = self.run(profiles).await;
        // 取消只作用于当前这一次刷新
        self.cancelled.store(false, Ordering::SeqCst);
        report
    }

    async fn run(&self, profiles: &[StockProfile]) -> RefreshReport {
        let mut report = RefreshReport {
            symbols: profiles.len(),
            ..RefreshReport::default()
        };

        if self.is_cancelled() {
            warn!("Refresh cancelled before start");
            report.cancelled = true;
            return report;
        }

        info!("Deleting all existing historical data...");
        if let Err(e) = self.wipe() {
            error!("Failed to delete existing historical data, refresh aborted: {}", e);
            report.wipe_failed = true;
            return report;
        }
        info!("Deleted all existing historical data");

        let (from, to) = util::trailing_window(util::market_today(self.market_timezone), self.lookback_days);
        info!(
            "Refreshing {} symbols via {} for {} to {} in batches of {}",
            profiles.len(),
            self.provider.name(),
            from,
            to,
            self.batch_size
        );

        for (i, batch) in profiles.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            if self.is_cancelled() {
                warn!("Refresh cancelled after {} batches", report.batches);
                report.cancelled = true;
                break;
            }

            report.batches += 1;
            let symbols = batch_symbols(batch);

            let outcomes = self.fetch_batch(batch, from, to).await;
            let observations = tally(&outcomes, &mut report);

            match self.persist_batch(observations) {
                Ok(0) => {}
                Ok(saved) => {
                    report.batches_saved += 1;
                    report.observations_saved += saved;
                    info!("Saved {} observations for symbols: {}", saved, symbols);
                }
                Err(e) => {
                    report.batches_failed += 1;
                    error!("Error processing batch with symbols: {} - {}", symbols, e);
                }
            }
        }

        info!(
            "Completed refreshing historical data: {} fetched, {} empty, {} failed, {} observations saved",
            report.symbols_fetched, report.symbols_empty, report.symbols_failed, report.observations_saved
        );
        report
    }

    fn wipe(&self) -> Result<()> {
        let wiped = self.store.delete_all_observations();
        self.commit(wiped)
    }

    /// 提交暂存的写入；任一步失败则回滚，存储保持上次提交时的状态
    fn commit<T>(&self, staged: Result<T>) -> Result<T> {
        let committed = staged.and_then(|value| self.store.flush().map(|_| value));
        if committed.is_err() {
            self.store.rollback();
        }
        committed
    }

    /// 批次内并发抓取，等待所有任务结束后返回
    async fn fetch_batch(
        &self,
        batch: &[StockProfile],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<(String, FetchOutcome)> {
        let mut pending = Vec::with_capacity(batch.len());
        let mut outcomes = Vec::with_capacity(batch.len());

        for profile in batch {
            if self.is_cancelled() {
                break;
            }

            let symbol = profile.symbol.clone();
            let task = fetch_symbol(
                Arc::clone(&self.provider),
                symbol.clone(),
                from,
                to,
                self.fetch_timeout,
            );
            match self.workers.spawn(task) {
                Ok(handle) => pending.push((symbol, handle)),
                Err(e) => outcomes.push((symbol, FetchOutcome::Failed(e.to_string()))),
            }
        }

        for (symbol, handle) in pending {
            let outcome = match handle.await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => FetchOutcome::Failed("worker pool closed".to_string()),
                Err(e) => FetchOutcome::Failed(format!("fetch task failed: {}", e)),
            };
            outcomes.push((symbol, outcome));
        }

        outcomes
    }

    fn persist_batch(&self, observations: Vec<PriceObservation>) -> Result<usize> {
        if observations.is_empty() {
            return Ok(0);
        }
        let staged = self.store.bulk_insert_observations(observations);
        self.commit(staged)
    }
}

async fn fetch_symbol(
    provider: Arc<dyn PriceProvider>,
    symbol: String,
    from: NaiveDate,
    to: NaiveDate,
    timeout: Duration,
) -> FetchOutcome {
    match tokio::time::timeout(timeout, provider.fetch_history(&symbol, from, to)).await {
        Ok(Ok(bars)) if bars.is_empty() => FetchOutcome::Empty,
        Ok(Ok(bars)) => {
            let captured_at = Utc::now();
            FetchOutcome::Fetched(
                bars.into_iter()
                    .map(|bar| bar.into_observation(&symbol, captured_at))
                    .collect(),
            )
        }
        Ok(Err(e)) => FetchOutcome::Failed(e.to_string()),
        Err(_) => FetchOutcome::Failed(format!("timed out after {:?}", timeout)),
    }
}

/// 统计各股票结果，返回需要写入的行情
fn tally(outcomes: &[(String, FetchOutcome)], report: &mut RefreshReport) -> Vec<PriceObservation> {
    let mut combined = Vec::new();
    for (symbol, outcome) in outcomes {
        match outcome {
            FetchOutcome::Fetched(observations) => {
                report.symbols_fetched += 1;
                info!("Received {} days of data for {}", observations.len(), symbol);
                combined.extend(observations.iter().cloned());
            }
            FetchOutcome::Empty => {
                report.symbols_empty += 1;
                warn!("No data received for {}", symbol);
            }
            FetchOutcome::Failed(cause) => {
                report.symbols_failed += 1;
                warn!("Error fetching data for {}: {}", symbol, cause);
            }
        }
    }
    combined
}

fn batch_symbols(batch: &[StockProfile]) -> String {
    batch
        .iter()
        .map(|p| p.symbol.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
