use chan_core::config::ChanConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// # Summary
/// 批量扫描的运行参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    // 存放 `{symbol}_{timeframe}.json` K 线文件的目录
    pub data_dir: PathBuf,
    // 最近多少根 K 线内的买点算作命中
    pub recent_window: usize,
    // 工作线程数，0 表示按 CPU 核数
    pub threads: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            recent_window: 3,
            threads: 0,
        }
    }
}

/// # Summary
/// 应用配置：结构分析配置加扫描参数。
///
/// # Logic
/// 优先级从低到高：默认值、当前目录下可选的 `chan.toml`、`CHAN__` 前缀的环境变量
/// (层级以双下划线分隔，例如 `CHAN__SCAN__THREADS=4`、`CHAN__CHAN__SEG_ALGO=break`)。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chan: ChanConfig,
    pub scan: ScanSettings,
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("chan").required(false))
                .add_source(
                    config::Environment::with_prefix("CHAN")
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder.build()?.try_deserialize()
    }
}
