use smallcap_signals::config::Config;
use smallcap_signals::data_store::ArrowHistoryStore;
use smallcap_signals::models::stock::StockAnalysis;
use smallcap_signals::providers::FmpClient;
use smallcap_signals::services::stock_service::StockService;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn build_cli() -> Command<'static> {
    Command::new("SmallcapSignals")
        .version("1.0.0")
        .author("EgoStrategy Team")
        .about("Small-cap equity history refresh and signal analysis")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding profiles.arrow and observations.arrow")
                .takes_value(true)
                .global(true)
                .default_value("data"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_name("N")
                .help("Symbols fetched per batch during refresh")
                .takes_value(true)
                .global(true)
                .default_value("2"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .help("Maximum concurrent provider requests")
                .takes_value(true)
                .global(true)
                .default_value("10"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Per-symbol fetch timeout")
                .takes_value(true)
                .global(true)
                .default_value("30"),
        )
        .subcommand(Command::new("catalog").about("Import the small-cap universe from the screener"))
        .subcommand(Command::new("refresh").about("Delete and re-fetch the trailing history of every stock"))
        .subcommand(
            Command::new("analyze").about("Compute signals for every stock with history").arg(
                Arg::new("json")
                    .long("json")
                    .help("Print the analyses as JSON")
                    .takes_value(false),
            ),
        )
        .subcommand(
            Command::new("history")
                .about("Show stored history for one symbol")
                .arg(
                    Arg::new("symbol")
                        .short('s')
                        .long("symbol")
                        .value_name("SYMBOL")
                        .help("Stock symbol")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Limit the number of records to display")
                        .takes_value(true)
                        .default_value("10"),
                ),
        )
        .subcommand(Command::new("count").about("Count stored price observations"))
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str, default: T) -> T {
    matches
        .value_of(name)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn print_analyses(analyses: &[StockAnalysis]) {
    println!(
        "{:<8} {:<30} {:>14} {:>12} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Ticker", "Company", "Market Cap", "Volume", "1d%", "5d%", "30d%", "Uptrend", "VolSpike"
    );
    println!("{:-<112}", "");
    for a in analyses {
        let name: String = a.company_name.chars().take(30).collect();
        println!(
            "{:<8} {:<30} {:>14.0} {:>12} {:>8.2} {:>8.2} {:>8.2} {:>8} {:>8}",
            a.ticker,
            name,
            a.market_cap,
            a.volume,
            a.price_change_1d,
            a.price_change_5d,
            a.price_change_30d,
            a.is_uptrending,
            a.has_unusual_volume
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();

    let config = Config::new()
        .with_data_dir(matches.value_of("data-dir").unwrap_or("data"))
        .with_api_key(std::env::var("FMP_API_KEY").ok())
        .with_batch_size(parse_number(&matches, "batch-size", 2))
        .with_worker_pool_size(parse_number(&matches, "workers", 10))
        .with_fetch_timeout(Duration::from_secs(parse_number(&matches, "timeout", 30)));

    let store = ArrowHistoryStore::open(&config.data_dir)
        .with_context(|| format!("failed to open data directory {}", config.data_dir))?;
    let provider = FmpClient::new(&config).context("failed to create provider client")?;
    let shutdown_grace = config.shutdown_grace;
    let service = StockService::new(config, Arc::new(provider), Arc::new(store));

    // Ctrl-C 只请求取消，当前批次完成写入后退出
    let token = service.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            token.store(true, Ordering::SeqCst);
        }
    });

    match matches.subcommand() {
        Some(("catalog", _)) => {
            let count = service.import_catalog().await?;
            println!("Imported {} stocks", count);
        }
        Some(("refresh", _)) => {
            let report = service.refresh_all().await?;
            println!(
                "Refreshed {} symbols in {} batches: {} fetched, {} empty, {} failed, {} observations saved{}",
                report.symbols,
                report.batches,
                report.symbols_fetched,
                report.symbols_empty,
                report.symbols_failed,
                report.observations_saved,
                if report.cancelled { " (cancelled)" } else { "" }
            );
            if report.wipe_failed {
                warn!("Existing history could not be deleted; nothing was refreshed");
            }
        }
        Some(("analyze", sub)) => {
            let analyses = service.analyze_all()?;
            if sub.is_present("json") {
                println!("{}", serde_json::to_string_pretty(&analyses)?);
            } else {
                print_analyses(&analyses);
            }
        }
        Some(("history", sub)) => {
            let symbol = sub.value_of("symbol").unwrap_or_default();
            let limit = parse_number(sub, "limit", 10usize);
            let history = service.get_history(symbol)?;

            println!("{:<12} {:<12} {:<15}", "Date", "Close", "Volume");
            println!("{:-<40}", "");
            for observation in history.iter().take(limit) {
                let price = observation
                    .price
                    .map(|p| format!("{:.4}", p))
                    .unwrap_or_else(|| "-".to_string());
                let volume = observation
                    .volume
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<12} {:<12} {:<15}", observation.date, price, volume);
            }
            if history.len() > limit {
                println!("... and {} more records", history.len() - limit);
            }
        }
        Some(("count", _)) => {
            println!("Total historical price records: {}", service.get_observation_count()?);
        }
        _ => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    if !service.shutdown(shutdown_grace).await {
        warn!("Worker pool did not shut down cleanly");
    }
    Ok(())
}
