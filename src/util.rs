use crate::errors::{Result, SignalError};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

// 日期转换工具：Arrow 文件中日期以 YYYYMMDD 整数保存
pub fn naive_date_to_int(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

pub fn int_to_naive_date(date_int: i32) -> Result<NaiveDate> {
    if !(10_000_101..=99_991_231).contains(&date_int) {
        return Err(SignalError::DataError(format!("Invalid date format: {}", date_int)));
    }

    let year = date_int / 10_000;
    let month = (date_int / 100 % 100) as u32;
    let day = (date_int % 100) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| SignalError::DataError(format!("Invalid date: {}-{}-{}", year, month, day)))
}

/// 指定时区下的当前日期
pub fn market_today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// 截止到 `today`（含）的回看区间
pub fn trailing_window(today: NaiveDate, lookback_days: i64) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(lookback_days), today)
}

// Arrow数据转换工具
pub mod arrow_utils {
    use super::*;
    use crate::models::stock::{PriceObservation, StockProfile};
    use arrow::array::{
        ArrayRef, BooleanBuilder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
    };
    use arrow::record_batch::RecordBatch;
    use arrow_array::{Array, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};
    use arrow_ipc::reader::FileReader;
    use arrow_ipc::writer::FileWriter;
    use arrow_schema::{DataType, Field, Schema};
    use chrono::TimeZone;
    use log::debug;
    use std::fs::{self, File};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    pub fn profile_schema() -> Schema {
        Schema::new(vec![
            Field::new("symbol", DataType::Utf8, false),
            Field::new("company_name", DataType::Utf8, false),
            Field::new("market_cap", DataType::Float64, true),
            Field::new("country", DataType::Utf8, true),
            Field::new("exchange", DataType::Utf8, true),
            Field::new("is_etf", DataType::Boolean, true),
            Field::new("is_fund", DataType::Boolean, true),
            Field::new("is_actively_trading", DataType::Boolean, true),
        ])
    }

    pub fn observation_schema() -> Schema {
        Schema::new(vec![
            Field::new("symbol", DataType::Utf8, false),
            Field::new("date", DataType::Int32, false),
            Field::new("price", DataType::Float64, true),
            Field::new("volume", DataType::Int64, true),
            // 毫秒级 UTC 时间戳
            Field::new("last_updated", DataType::Int64, false),
        ])
    }

    pub fn profiles_to_record_batch(profiles: &[StockProfile]) -> Result<RecordBatch> {
        let mut symbol_builder = StringBuilder::new();
        let mut name_builder = StringBuilder::new();
        let mut market_cap_builder = Float64Builder::new();
        let mut country_builder = StringBuilder::new();
        let mut exchange_builder = StringBuilder::new();
        let mut etf_builder = BooleanBuilder::new();
        let mut fund_builder = BooleanBuilder::new();
        let mut trading_builder = BooleanBuilder::new();

        for profile in profiles {
            symbol_builder.append_value(&profile.symbol);
            name_builder.append_value(&profile.company_name);
            market_cap_builder.append_option(profile.market_cap);
            country_builder.append_option(profile.country.as_deref());
            exchange_builder.append_option(profile.exchange.as_deref());
            etf_builder.append_option(profile.is_etf);
            fund_builder.append_option(profile.is_fund);
            trading_builder.append_option(profile.is_actively_trading);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(symbol_builder.finish()),
            Arc::new(name_builder.finish()),
            Arc::new(market_cap_builder.finish()),
            Arc::new(country_builder.finish()),
            Arc::new(exchange_builder.finish()),
            Arc::new(etf_builder.finish()),
            Arc::new(fund_builder.finish()),
            Arc::new(trading_builder.finish()),
        ];

        Ok(RecordBatch::try_new(Arc::new(profile_schema()), columns)?)
    }

    pub fn observations_to_record_batch(observations: &[PriceObservation]) -> Result<RecordBatch> {
        let mut symbol_builder = StringBuilder::new();
        let mut date_builder = Int32Builder::new();
        let mut price_builder = Float64Builder::new();
        let mut volume_builder = Int64Builder::new();
        let mut updated_builder = Int64Builder::new();

        for observation in observations {
            symbol_builder.append_value(&observation.symbol);
            date_builder.append_value(naive_date_to_int(observation.date));
            price_builder.append_option(observation.price);
            volume_builder.append_option(observation.volume);
            updated_builder.append_value(observation.last_updated.timestamp_millis());
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(symbol_builder.finish()),
            Arc::new(date_builder.finish()),
            Arc::new(price_builder.finish()),
            Arc::new(volume_builder.finish()),
            Arc::new(updated_builder.finish()),
        ];

        Ok(RecordBatch::try_new(Arc::new(observation_schema()), columns)?)
    }

    fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .ok_or_else(|| SignalError::ArrowError(format!("Failed to downcast {} column", name)))
    }

    fn optional_str(array: &StringArray, i: usize) -> Option<String> {
        (!array.is_null(i)).then(|| array.value(i).to_string())
    }

    fn optional_bool(array: &BooleanArray, i: usize) -> Option<bool> {
        (!array.is_null(i)).then(|| array.value(i))
    }

    pub fn profiles_from_batch(batch: &RecordBatch) -> Result<Vec<StockProfile>> {
        let symbols = column::<StringArray>(batch, "symbol")?;
        let names = column::<StringArray>(batch, "company_name")?;
        let market_caps = column::<Float64Array>(batch, "market_cap")?;
        let countries = column::<StringArray>(batch, "country")?;
        let exchanges = column::<StringArray>(batch, "exchange")?;
        let etfs = column::<BooleanArray>(batch, "is_etf")?;
        let funds = column::<BooleanArray>(batch, "is_fund")?;
        let trading = column::<BooleanArray>(batch, "is_actively_trading")?;

        Ok((0..batch.num_rows())
            .map(|i| StockProfile {
                symbol: symbols.value(i).to_string(),
                company_name: names.value(i).to_string(),
                market_cap: (!market_caps.is_null(i)).then(|| market_caps.value(i)),
                country: optional_str(countries, i),
                exchange: optional_str(exchanges, i),
                is_etf: optional_bool(etfs, i),
                is_fund: optional_bool(funds, i),
                is_actively_trading: optional_bool(trading, i),
            })
            .collect())
    }

    pub fn observations_from_batch(batch: &RecordBatch) -> Result<Vec<PriceObservation>> {
        let symbols = column::<StringArray>(batch, "symbol")?;
        let dates = column::<Int32Array>(batch, "date")?;
        let prices = column::<Float64Array>(batch, "price")?;
        let volumes = column::<Int64Array>(batch, "volume")?;
        let updated = column::<Int64Array>(batch, "last_updated")?;

        let mut result = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let last_updated = Utc.timestamp_millis_opt(updated.value(i)).single().ok_or_else(|| {
                SignalError::DataError(format!("Invalid timestamp: {}", updated.value(i)))
            })?;

            result.push(PriceObservation {
                symbol: symbols.value(i).to_string(),
                date: int_to_naive_date(dates.value(i))?,
                price: (!prices.is_null(i)).then(|| prices.value(i)),
                volume: (!volumes.is_null(i)).then(|| volumes.value(i)),
                last_updated,
            });
        }
        Ok(result)
    }

    /// 先写临时文件再重命名，崩溃时不会留下半个文件
    pub fn write_batch_to_file(batch: &RecordBatch, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("arrow.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = FileWriter::try_new(file, &batch.schema())?;
            writer.write(batch)?;
            writer.finish()?;
        }
        File::open(&tmp_path)?.sync_all()?;
        fs::rename(&tmp_path, path)?;

        debug!("Wrote {} rows to {}", batch.num_rows(), path.display());
        Ok(())
    }

    pub fn write_batch_to_memory(batch: &RecordBatch) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = FileWriter::try_new(&mut buffer, &batch.schema())?;
            writer.write(batch)?;
            writer.finish()?;
        }
        Ok(buffer)
    }

    pub fn read_batches_from_file(path: &Path) -> Result<Vec<RecordBatch>> {
        let file = File::open(path)?;
        let reader = FileReader::try_new(file, None)?;
        reader.map(|batch| batch.map_err(SignalError::from)).collect()
    }

    pub fn read_batches_from_memory(data: &[u8]) -> Result<Vec<RecordBatch>> {
        let reader = FileReader::try_new(Cursor::new(data), None)?;
        reader.map(|batch| batch.map_err(SignalError::from)).collect()
    }

    pub fn save_profiles(profiles: &[StockProfile], path: &Path) -> Result<()> {
        write_batch_to_file(&profiles_to_record_batch(profiles)?, path)
    }

    pub fn save_observations(observations: &[PriceObservation], path: &Path) -> Result<()> {
        write_batch_to_file(&observations_to_record_batch(observations)?, path)
    }

    pub fn load_profiles(path: &Path) -> Result<Vec<StockProfile>> {
        let mut result = Vec::new();
        for batch in read_batches_from_file(path)? {
            result.extend(profiles_from_batch(&batch)?);
        }
        Ok(result)
    }

    pub fn load_observations(path: &Path) -> Result<Vec<PriceObservation>> {
        let mut result = Vec::new();
        for batch in read_batches_from_file(path)? {
            result.extend(observations_from_batch(&batch)?);
        }
        Ok(result)
    }
}
