//! 纯函数指标库：涨跌幅、均线、回归斜率、异常成交量与上升趋势判定。
//!
//! 所有函数都不会 panic，无法定义的运算一律返回约定的默认值。

use crate::models::stock::PriceObservation;

/// 成交量超过均量的倍数即视为异常
pub const UNUSUAL_VOLUME_MULTIPLIER: f64 = 2.0;
/// 趋势判定所需的最少有效价格数
pub const MIN_UPTREND_PRICES: usize = 10;
pub const SHORT_MA_PERIOD: usize = 5;
pub const LONG_MA_PERIOD: usize = 10;
/// 判定均线斜率时取的尾部窗口
pub const SLOPE_WINDOW: usize = 5;
/// 五项条件中至少满足的数量
pub const UPTREND_MIN_CRITERIA: usize = 3;

/// 百分比变化；旧值为 0 或任一输入为 NaN 时返回 0.0
pub fn percentage_change(old: f64, new: f64) -> f64 {
    if old == 0.0 || old.is_nan() || new.is_nan() {
        return 0.0;
    }
    let change = (new - old) / old * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

/// 所有非空成交量的算术平均
pub fn average_volume(observations: &[PriceObservation]) -> f64 {
    let (sum, count) = observations
        .iter()
        .filter_map(|o| o.volume)
        .fold((0.0_f64, 0_usize), |(sum, count), v| (sum + v as f64, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn is_unusual_volume(current_volume: i64, average_volume: f64) -> bool {
    if average_volume.is_nan() || average_volume <= 0.0 {
        return false;
    }
    current_volume as f64 > average_volume * UNUSUAL_VOLUME_MULTIPLIER
}

/// 滑动窗口均值，输出长度为 `len - period + 1`
pub fn moving_average(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    prices
        .windows(period)
        .map(|window| window.iter().sum::<f64>() / period as f64)
        .collect()
}

/// 对下标 0..n-1 做最小二乘回归，斜率为正返回 true
pub fn slope_sign(values: &[f64]) -> bool {
    let n = values.len();
    if n < 2 {
        return false;
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let n = n as f64;
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return false;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    slope > 0.0
}

/// 五项条件多数表决的上升趋势判定。
///
/// 输入顺序任意，内部按日期升序重排，并剔除缺失或非有限的价格。
pub fn is_uptrending(observations: &[PriceObservation]) -> bool {
    if observations.len() < MIN_UPTREND_PRICES {
        return false;
    }

    let mut ordered: Vec<&PriceObservation> = observations.iter().collect();
    ordered.sort_by_key(|o| o.date);
    let prices: Vec<f64> = ordered
        .iter()
        .filter_map(|o| o.price)
        .filter(|p| p.is_finite())
        .collect();

    uptrend_criteria(&prices)
        .map(|criteria| criteria.iter().filter(|&&met| met).count() >= UPTREND_MIN_CRITERIA)
        .unwrap_or(false)
}

/// 依次为：价格在 MA5 之上、MA5 在 MA10 之上、高于 5 个交易日前、MA5 上行、MA10 上行
fn uptrend_criteria(prices: &[f64]) -> Option<[bool; 5]> {
    if prices.len() < MIN_UPTREND_PRICES {
        return None;
    }

    let ma_short = moving_average(prices, SHORT_MA_PERIOD);
    let ma_long = moving_average(prices, LONG_MA_PERIOD);
    let last_short = *ma_short.last()?;
    let last_long = *ma_long.last()?;

    let current = *prices.last()?;
    let earlier = *prices.get(prices.len().checked_sub(SHORT_MA_PERIOD + 1)?)?;

    Some([
        current > last_short,
        last_short > last_long,
        current > earlier,
        slope_sign(tail(&ma_short, SLOPE_WINDOW)),
        slope_sign(tail(&ma_long, SLOPE_WINDOW)),
    ])
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};

    fn series_from_prices(prices: &[f64]) -> Vec<PriceObservation> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PriceObservation {
                symbol: "TEST".to_string(),
                date: start + Duration::days(i as i64),
                price: Some(p),
                volume: Some(1_000 + i as i64),
                last_updated: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn percentage_change_floors_undefined_inputs() {
        for x in [-5.0, 0.0, 1.0, 123.45, f64::NAN] {
            assert_eq!(percentage_change(0.0, x), 0.0);
            assert_eq!(percentage_change(f64::NAN, x), 0.0);
        }
        assert_eq!(percentage_change(10.0, f64::NAN), 0.0);
        assert!((percentage_change(100.0, 110.0) - 10.0).abs() < 1e-9);
        assert!((percentage_change(50.0, 25.0) + 50.0).abs() < 1e-9);
    }

    #[test]
    fn average_volume_ignores_missing_and_order() {
        assert_eq!(average_volume(&[]), 0.0);

        let mut data = series_from_prices(&[1.0, 2.0, 3.0, 4.0]);
        data[0].volume = Some(100);
        data[1].volume = None;
        data[2].volume = Some(300);
        data[3].volume = Some(200);
        assert!((average_volume(&data) - 200.0).abs() < 1e-9);

        data.reverse();
        data.swap(0, 2);
        assert!((average_volume(&data) - 200.0).abs() < 1e-9);

        for o in &mut data {
            o.volume = None;
        }
        assert_eq!(average_volume(&data), 0.0);
    }

    #[test]
    fn unusual_volume_requires_positive_average() {
        assert!(!is_unusual_volume(1_000_000, 0.0));
        assert!(!is_unusual_volume(1_000_000, -3.0));
        assert!(!is_unusual_volume(1_000_000, f64::NAN));
        assert!(!is_unusual_volume(200, 100.0));
        assert!(is_unusual_volume(201, 100.0));
    }

    #[test]
    fn moving_average_window_means() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(moving_average(&prices, 3), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(moving_average(&prices, 1), prices.to_vec());
        assert_eq!(moving_average(&prices, 6), vec![3.5]);
        assert!(moving_average(&prices, 7).is_empty());
        assert!(moving_average(&prices, 0).is_empty());
        assert!(moving_average(&[], 2).is_empty());
    }

    #[test]
    fn slope_sign_detects_direction() {
        assert!(slope_sign(&[1.0, 2.0, 3.0]));
        assert!(!slope_sign(&[3.0, 2.0, 1.0]));
        assert!(!slope_sign(&[2.0, 2.0, 2.0]));
        assert!(!slope_sign(&[5.0]));
        assert!(!slope_sign(&[]));
        // 噪声中的整体上行
        assert!(slope_sign(&[1.0, 3.0, 2.0, 4.0, 3.5]));
    }

    #[test]
    fn uptrend_needs_ten_prices() {
        let rising: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        assert!(!is_uptrending(&series_from_prices(&rising)));

        let mut data = series_from_prices(&(1..=12).map(|i| i as f64).collect::<Vec<_>>());
        for o in data.iter_mut().take(3) {
            o.price = None;
        }
        assert!(!is_uptrending(&data));
    }

    #[test]
    fn flat_series_is_not_uptrending() {
        let prices = vec![10.0; 20];
        let criteria = uptrend_criteria(&prices).unwrap();
        assert_eq!(criteria, [false; 5]);
        assert!(criteria.iter().filter(|&&c| c).count() <= 2);
        assert!(!is_uptrending(&series_from_prices(&prices)));
    }

    #[test]
    fn steady_rise_is_uptrending_in_any_input_order() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let mut data = series_from_prices(&prices);
        assert!(is_uptrending(&data));
        data.reverse();
        assert!(is_uptrending(&data));
    }

    #[test]
    fn steady_decline_is_not_uptrending() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 - i as f64).collect();
        assert!(!is_uptrending(&series_from_prices(&prices)));
    }

    #[test]
    fn majority_vote_tolerates_a_dip() {
        // 长期上行但最后一天回落：价格跌破 MA5，其余条件仍成立
        let mut prices: Vec<f64> = (0..15).map(|i| 10.0 + i as f64).collect();
        prices.push(21.0);
        let criteria = uptrend_criteria(&prices).unwrap();
        assert!(!criteria[0]);
        assert!(is_uptrending(&series_from_prices(&prices)));
    }

    #[test]
    fn non_finite_prices_are_dropped() {
        let mut prices: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        prices[2] = f64::NAN;
        prices[4] = f64::INFINITY;
        assert!(is_uptrending(&series_from_prices(&prices)));
    }
}
