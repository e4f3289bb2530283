use crate::errors::Result;
use crate::models::stock::{PriceObservation, StockProfile};
use crate::util::arrow_utils;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const PROFILES_FILE: &str = "profiles.arrow";
pub const OBSERVATIONS_FILE: &str = "observations.arrow";

type ObservationTable = HashMap<String, BTreeMap<NaiveDate, PriceObservation>>;

/// 股票资料与历史行情的存储接口
///
/// 写操作先暂存，`flush` 提交；提交失败后调用 `rollback` 丢弃上次成功提交以来的全部修改。
/// 暂存的修改在提交前即可被读到。
pub trait HistoryStore: Send + Sync {
    fn list_all_profiles(&self) -> Result<Vec<StockProfile>>;

    /// 整体替换股票池
    fn replace_profiles(&self, profiles: Vec<StockProfile>) -> Result<()>;

    fn delete_all_observations(&self) -> Result<()>;

    /// 批量写入，(symbol, date) 冲突时覆盖旧值；返回写入条数
    fn bulk_insert_observations(&self, observations: Vec<PriceObservation>) -> Result<usize>;

    /// 按日期降序返回
    fn find_observations(&self, symbol: &str) -> Result<Vec<PriceObservation>>;

    fn count_observations(&self) -> Result<usize>;

    fn flush(&self) -> Result<()>;

    /// 恢复到上次成功 flush 时的状态
    fn rollback(&self);
}

#[derive(Default)]
struct StoreState {
    profiles: Vec<StockProfile>,
    observations: ObservationTable,
    // 上次提交时的快照；None 表示没有未提交的修改
    committed_profiles: Option<Vec<StockProfile>>,
    committed_observations: Option<ObservationTable>,
}

impl StoreState {
    fn insert_observation(&mut self, observation: PriceObservation) {
        self.observations
            .entry(observation.symbol.clone())
            .or_default()
            .insert(observation.date, observation);
    }

    fn all_observations(&self) -> Vec<PriceObservation> {
        let mut symbols: Vec<&String> = self.observations.keys().collect();
        symbols.sort();
        symbols
            .into_iter()
            .flat_map(|s| self.observations[s].values().cloned())
            .collect()
    }

    fn stage_observations(&mut self) {
        if self.committed_observations.is_none() {
            self.committed_observations = Some(self.observations.clone());
        }
    }
}

/// 以 Arrow IPC 文件持久化的存储；`in_memory` 模式下 flush 不落盘
///
/// 每次 flush 会重写整个 `observations.arrow`。
pub struct ArrowHistoryStore {
    data_dir: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl ArrowHistoryStore {
    /// 打开数据目录，已有文件会被加载
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let mut state = StoreState::default();

        let profiles_path = data_dir.join(PROFILES_FILE);
        if profiles_path.exists() {
            state.profiles = arrow_utils::load_profiles(&profiles_path)?;
        }

        let observations_path = data_dir.join(OBSERVATIONS_FILE);
        if observations_path.exists() {
            for observation in arrow_utils::load_observations(&observations_path)? {
                state.insert_observation(observation);
            }
        }

        info!(
            "Opened history store at {} ({} profiles, {} symbols with history)",
            data_dir.display(),
            state.profiles.len(),
            state.observations.len()
        );

        Ok(Self {
            data_dir: Some(data_dir),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HistoryStore for ArrowHistoryStore {
    fn list_all_profiles(&self) -> Result<Vec<StockProfile>> {
        Ok(self.state().profiles.clone())
    }

    fn replace_profiles(&self, profiles: Vec<StockProfile>) -> Result<()> {
        let mut unique: Vec<StockProfile> = Vec::with_capacity(profiles.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for profile in profiles {
            match index.get(&profile.symbol) {
                Some(&i) => unique[i] = profile,
                None => {
                    index.insert(profile.symbol.clone(), unique.len());
                    unique.push(profile);
                }
            }
        }

        let mut state = self.state();
        let previous = std::mem::replace(&mut state.profiles, unique);
        if state.committed_profiles.is_none() {
            state.committed_profiles = Some(previous);
        }
        Ok(())
    }

    fn delete_all_observations(&self) -> Result<()> {
        let mut state = self.state();
        let previous = std::mem::take(&mut state.observations);
        if state.committed_observations.is_none() {
            state.committed_observations = Some(previous);
        }
        Ok(())
    }

    fn bulk_insert_observations(&self, observations: Vec<PriceObservation>) -> Result<usize> {
        let count = observations.len();
        let mut state = self.state();
        state.stage_observations();
        for observation in observations {
            state.insert_observation(observation);
        }
        Ok(count)
    }

    fn find_observations(&self, symbol: &str) -> Result<Vec<PriceObservation>> {
        Ok(self
            .state()
            .observations
            .get(symbol)
            .map(|by_date| by_date.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn count_observations(&self) -> Result<usize> {
        Ok(self.state().observations.values().map(BTreeMap::len).sum())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state();
        let Some(data_dir) = &self.data_dir else {
            state.committed_profiles = None;
            state.committed_observations = None;
            return Ok(());
        };

        if state.committed_profiles.is_some() {
            arrow_utils::save_profiles(&state.profiles, &data_dir.join(PROFILES_FILE))?;
            state.committed_profiles = None;
        }
        if state.committed_observations.is_some() {
            let observations = state.all_observations();
            arrow_utils::save_observations(&observations, &data_dir.join(OBSERVATIONS_FILE))?;
            state.committed_observations = None;
            debug!("Flushed {} observations", observations.len());
        }
        Ok(())
    }

    fn rollback(&self) {
        let mut state = self.state();
        if let Some(profiles) = state.committed_profiles.take() {
            state.profiles = profiles;
            warn!("Discarded uncommitted stock profile changes");
        }
        if let Some(observations) = state.committed_observations.take() {
            state.observations = observations;
            warn!("Discarded uncommitted price observations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(symbol: &str, day: u32, price: f64) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 4, day).unwrap(),
            price: Some(price),
            volume: Some(10),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn observations_are_unique_per_symbol_and_date() {
        let store = ArrowHistoryStore::in_memory();
        store
            .bulk_insert_observations(vec![obs("AAA", 1, 1.0), obs("AAA", 2, 2.0)])
            .unwrap();
        store.bulk_insert_observations(vec![obs("AAA", 2, 5.0)]).unwrap();

        let found = store.find_observations("AAA").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].price, Some(5.0));
        assert_eq!(found[1].date, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        assert_eq!(store.count_observations().unwrap(), 2);
    }

    #[test]
    fn delete_all_clears_every_symbol() {
        let store = ArrowHistoryStore::in_memory();
        store
            .bulk_insert_observations(vec![obs("AAA", 1, 1.0), obs("BBB", 1, 2.0)])
            .unwrap();
        store.delete_all_observations().unwrap();
        assert_eq!(store.count_observations().unwrap(), 0);
        assert!(store.find_observations("BBB").unwrap().is_empty());
    }

    #[test]
    fn replace_profiles_dedups_by_symbol() {
        let store = ArrowHistoryStore::in_memory();
        store
            .replace_profiles(vec![
                StockProfile::new("AAA", "First"),
                StockProfile::new("BBB", "Second"),
                StockProfile::new("AAA", "First Renamed"),
            ])
            .unwrap();
        let profiles = store.list_all_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].company_name, "First Renamed");
        assert_eq!(profiles[1].symbol, "BBB");
    }

    #[test]
    fn flush_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ArrowHistoryStore::open(dir.path()).unwrap();
            store
                .replace_profiles(vec![StockProfile::new("AAA", "A Corp").with_market_cap(5e7)])
                .unwrap();
            store
                .bulk_insert_observations(vec![obs("AAA", 3, 1.5), obs("AAA", 4, 1.6)])
                .unwrap();
            store.flush().unwrap();
            // 未 flush 的写入不会落盘
            store.bulk_insert_observations(vec![obs("AAA", 5, 1.7)]).unwrap();
        }

        let reopened = ArrowHistoryStore::open(dir.path()).unwrap();
        let profiles = reopened.list_all_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].market_cap, Some(5e7));
        let found = reopened.find_observations("AAA").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].price, Some(1.6));
    }

    #[test]
    fn rollback_discards_writes_since_last_flush() {
        let store = ArrowHistoryStore::in_memory();
        store.bulk_insert_observations(vec![obs("AAA", 1, 1.0)]).unwrap();
        store.flush().unwrap();

        store.bulk_insert_observations(vec![obs("AAA", 1, 9.0), obs("BBB", 1, 2.0)]).unwrap();
        store.delete_all_observations().unwrap();
        store.bulk_insert_observations(vec![obs("CCC", 1, 3.0)]).unwrap();
        store.rollback();

        assert_eq!(store.count_observations().unwrap(), 1);
        assert_eq!(store.find_observations("AAA").unwrap()[0].price, Some(1.0));
        assert!(store.find_observations("CCC").unwrap().is_empty());

        // 已提交的修改不受 rollback 影响
        store.rollback();
        assert_eq!(store.count_observations().unwrap(), 1);
    }

    #[test]
    fn failed_flush_can_be_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArrowHistoryStore::open(dir.path()).unwrap();
        store.bulk_insert_observations(vec![obs("AAA", 1, 1.0)]).unwrap();
        store.flush().unwrap();

        // 临时文件路径被目录占用，写入必然失败
        std::fs::create_dir(dir.path().join("observations.arrow.tmp")).unwrap();
        store.bulk_insert_observations(vec![obs("BBB", 1, 2.0)]).unwrap();
        assert!(store.flush().is_err());
        store.rollback();

        assert!(store.find_observations("BBB").unwrap().is_empty());
        assert_eq!(store.count_observations().unwrap(), 1);

        let reopened = ArrowHistoryStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count_observations().unwrap(), 1);
        assert!(reopened.find_observations("BBB").unwrap().is_empty());
    }
}
