use crate::analysis::indicators;
use crate::models::stock::{PriceSeries, StockAnalysis, StockProfile};
use log::{debug, warn};

/// 各涨跌幅窗口所需的最少数据条数
const ONE_DAY_MIN_OBSERVATIONS: usize = 2;
const FIVE_DAY_MIN_OBSERVATIONS: usize = 5;
/// 30 个自然日约 21 个交易日，15 条为保守下限
const THIRTY_DAY_MIN_OBSERVATIONS: usize = 15;

/// 涨跌幅无法计算的原因
#[derive(Debug, Clone, PartialEq)]
enum WindowGap {
    TooShort { required: usize, available: usize },
    MissingPrice { index: usize },
}

/// 根据基础资料与历史序列生成分析结果，单只股票的数据问题只会退化为默认值
pub fn analyze(profile: &StockProfile, series: &PriceSeries) -> StockAnalysis {
    let mut analysis = StockAnalysis::baseline(profile);

    let Some(latest) = series.latest() else {
        debug!("No historical data for {}", profile.symbol);
        return analysis;
    };

    analysis.volume = latest.volume.unwrap_or(0);
    analysis.average_volume = indicators::average_volume(series.observations());

    let last_index = series.len() - 1;
    analysis.price_change_1d =
        window_change(&profile.symbol, "1d", series, 1, ONE_DAY_MIN_OBSERVATIONS);
    analysis.price_change_5d =
        window_change(&profile.symbol, "5d", series, 4, FIVE_DAY_MIN_OBSERVATIONS);
    analysis.price_change_30d = window_change(
        &profile.symbol,
        "30d",
        series,
        last_index,
        THIRTY_DAY_MIN_OBSERVATIONS,
    );

    analysis.has_unusual_volume =
        indicators::is_unusual_volume(analysis.volume, analysis.average_volume);
    analysis.is_uptrending = indicators::is_uptrending(series.observations());

    analysis
}

fn window_change(
    symbol: &str,
    label: &str,
    series: &PriceSeries,
    base_index: usize,
    min_observations: usize,
) -> f64 {
    match price_change(series, base_index, min_observations) {
        Ok(change) => change,
        Err(WindowGap::TooShort { required, available }) => {
            debug!(
                "{} change for {} defaulted: {} observations, {} required",
                label, symbol, available, required
            );
            0.0
        }
        Err(WindowGap::MissingPrice { index }) => {
            warn!(
                "{} change for {} defaulted: missing price at position {}",
                label, symbol, index
            );
            0.0
        }
    }
}

/// 最新价格相对 `base_index` 处价格的涨跌幅
fn price_change(
    series: &PriceSeries,
    base_index: usize,
    min_observations: usize,
) -> Result<f64, WindowGap> {
    if series.len() < min_observations {
        return Err(WindowGap::TooShort {
            required: min_observations,
            available: series.len(),
        });
    }

    let price_at = |index: usize| {
        series
            .get(index)
            .and_then(|o| o.price)
            .ok_or(WindowGap::MissingPrice { index })
    };

    let latest = price_at(0)?;
    let base = price_at(base_index)?;
    Ok(indicators::percentage_change(base, latest))
}
