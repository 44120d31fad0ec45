mod settings;

use anyhow::Context;
use chan_core::common::{Instrument, TimeFrame};
use chan_core::market::entity::Bar;
use chan_manager::registry::ContextKey;
use chan_manager::scanner::{ScanJob, Scanner};
use settings::Settings;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// # Summary
/// 从文件名 `{symbol}_{timeframe}.json` 解析上下文身份。
fn parse_key(path: &Path) -> Option<ContextKey> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (symbol, tf) = stem.rsplit_once('_')?;
    let timeframe: TimeFrame = tf.parse().ok()?;
    Some(ContextKey::new(Instrument::new(symbol), timeframe))
}

/// # Summary
/// 读取数据目录下的全部 K 线文件。
///
/// # Logic
/// 1. 文件名无法解析的跳过并告警。
/// 2. 文件内容为按时间排序的 `Bar` JSON 数组。
/// 3. 结果按身份排序，保证扫描输出稳定。
async fn load_jobs(dir: &Path) -> anyhow::Result<Vec<ScanJob>> {
    let mut jobs = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read data dir {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(key) = parse_key(&path) else {
            warn!("Skipping {}: expected {{symbol}}_{{timeframe}}.json", path.display());
            continue;
        };
        let text = tokio::fs::read_to_string(&path).await?;
        let bars: Vec<Bar> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid bar file {}", path.display()))?;
        jobs.push(ScanJob { key, bars });
    }
    jobs.sort_by(|a, b| {
        (&a.key.instrument.symbol, a.key.timeframe)
            .cmp(&(&b.key.instrument.symbol, b.key.timeframe))
    });
    Ok(jobs)
}

/// # Summary
/// 应用启动入口：加载配置与 K 线文件，批量扫描近期买点并以 JSON 输出。
///
/// # Logic
/// 1. 初始化日志，默认级别 `info`，可由 `RUST_LOG` 覆盖。
/// 2. 加载分层配置并创建扫描器 (配置非法时在此失败)。
/// 3. 扫描在阻塞线程上执行；收到 Ctrl-C 时发出取消，等待工作线程在两次喂数之间退出。
/// 4. 将命中写到标准输出。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Chan scanner starting...");

    let settings = Settings::load().context("Failed to load settings")?;
    let scanner = Arc::new(Scanner::new(
        settings.chan.clone(),
        settings.scan.threads,
        settings.scan.recent_window,
    )?);
    let jobs = load_jobs(&settings.scan.data_dir).await?;
    info!("Loaded {} series from {}", jobs.len(), settings.scan.data_dir.display());

    let cancel = scanner.cancel_token();
    let worker = {
        let scanner = scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&jobs))
    };
    tokio::pin!(worker);

    let report = tokio::select! {
        res = &mut worker => res?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received. Cancelling scan...");
            cancel.cancel();
            worker.await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report.hits)?);
    if report.cancelled > 0 {
        warn!("{} series were not scanned due to cancellation", report.cancelled);
    }
    info!(
        "Scan complete: {} ok, {} failed, {} hits",
        report.success,
        report.failures.len(),
        report.hits.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_key_from_file_name() {
        let key = parse_key(&PathBuf::from("data/sz.000001_1d.json")).unwrap();
        assert_eq!(key.instrument.symbol, "sz.000001");
        assert_eq!(key.timeframe, TimeFrame::Day1);

        let key = parse_key(&PathBuf::from("BRK_B_60m.json")).unwrap();
        assert_eq!(key.instrument.symbol, "BRK_B");
        assert_eq!(key.timeframe, TimeFrame::Minute60);

        assert!(parse_key(&PathBuf::from("AAPL_2h.json")).is_none());
        assert!(parse_key(&PathBuf::from("AAPL_1d.csv")).is_none());
        assert!(parse_key(&PathBuf::from("AAPL.json")).is_none());
    }
}
