use crate::structure::entity::{BspType, ZoneLevel};
use crate::structure::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// 线段划分算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SegAlgo {
    // 特征序列分型破坏
    #[default]
    #[serde(rename = "chan")]
    Chan,
    // 连续两笔创新低/新高即成段
    #[serde(rename = "1+1")]
    OnePlusOne,
    // 反向笔跌破/升破线段起点所在笔即成段
    #[serde(rename = "break")]
    Break,
}

/// 中枢离开判定算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZsAlgo {
    // 一段波动完全离开即闭合
    #[default]
    Normal,
    // 离开需再被一段波动确认
    OverSeg,
    // 笔级别用 normal，线段级别用 over_seg
    Auto,
}

impl ZsAlgo {
    /// # Summary
    /// 将 `Auto` 解析为具体算法。
    pub fn resolve(self, level: ZoneLevel) -> ZsAlgo {
        match (self, level) {
            (ZsAlgo::Auto, ZoneLevel::Stroke) => ZsAlgo::Normal,
            (ZsAlgo::Auto, ZoneLevel::Segment) => ZsAlgo::OverSeg,
            (algo, _) => algo,
        }
    }
}

/// 波动力度的度量方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MacdAlgo {
    // 与波动同向的柱面积
    #[default]
    Area,
    // 柱绝对值面积
    FullArea,
    // 同向柱最大值
    Peak,
    // 柱最大值与最小值之差
    Diff,
}

/// MACD 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacdConfig {
    pub fast: u32,
    pub slow: u32,
    pub signal: u32,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// # Summary
/// 结构分析配置，创建上下文时校验，之后不可变。
///
/// # Invariants
/// - 经 `validate()` 通过后才能用于创建分析上下文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChanConfig {
    // 分型严格检查
    pub bi_strict: bool,
    pub seg_algo: SegAlgo,
    pub zs_algo: ZsAlgo,
    // 构造中枢的波动级别
    pub zs_level: ZoneLevel,
    // 允许相邻中枢合并
    pub zs_combine: bool,
    // 一类点背驰比例，无穷大表示不限制
    pub divergence_rate: f64,
    // 一类点之前趋势中至少需要的中枢数量
    pub min_zs_cnt: u32,
    #[serde(deserialize_with = "deserialize_bs_types")]
    pub bs_type: Vec<BspType>,
    // 每喂一根 K 线即输出一次结构快照
    pub trigger_step: bool,
    pub macd_algo: MacdAlgo,
    pub macd: MacdConfig,
    // 二类点必须跟随一类点
    pub bsp2_follow_1: bool,
    // 三类点必须跟随同向一类点
    pub bsp3_follow_1: bool,
    // 一类点必须是进入段以来的绝对极值
    pub bs1_peak: bool,
    // 类二买卖点的最大链长，None 表示不限
    pub max_bsp2s_lv: Option<u32>,
}

impl Default for ChanConfig {
    fn default() -> Self {
        Self {
            bi_strict: true,
            seg_algo: SegAlgo::Chan,
            zs_algo: ZsAlgo::Normal,
            zs_level: ZoneLevel::Stroke,
            zs_combine: true,
            divergence_rate: 0.9,
            min_zs_cnt: 1,
            bs_type: BspType::ALL.to_vec(),
            trigger_step: false,
            macd_algo: MacdAlgo::Area,
            macd: MacdConfig::default(),
            bsp2_follow_1: false,
            bsp3_follow_1: false,
            bs1_peak: false,
            max_bsp2s_lv: None,
        }
    }
}

const KNOWN_KEYS: [&str; 15] = [
    "bi_strict",
    "seg_algo",
    "zs_algo",
    "zs_level",
    "zs_combine",
    "divergence_rate",
    "min_zs_cnt",
    "bs_type",
    "trigger_step",
    "macd_algo",
    "macd",
    "bsp2_follow_1",
    "bsp3_follow_1",
    "bs1_peak",
    "max_bsp2s_lv",
];

impl ChanConfig {
    /// # Summary
    /// 从 JSON 对象构造并校验配置。
    ///
    /// # Logic
    /// 1. 先逐个检查键名，未知键返回 `UnknownOption` 而不是笼统的解析错误。
    /// 2. 交给 serde 反序列化，缺省键取默认值。
    /// 3. 执行 `validate()`。
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(obj) = value.as_object()
            && let Some(key) = obj.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str()))
        {
            return Err(ConfigError::UnknownOption(key.clone()));
        }
        let config: ChanConfig =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Summary
    /// 从字符串键值对构造配置，兼容旧的字典式配置写法。
    ///
    /// # Arguments
    /// * `pairs`: 形如 `("seg_algo", "1+1")` 的键值对，`macd` 参数写作 `macd_fast` 等。
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let mut config = ChanConfig::default();
        for (key, value) in pairs {
            config.set(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "bi_strict" => self.bi_strict = parse_value(key, value)?,
            "zs_combine" => self.zs_combine = parse_value(key, value)?,
            "trigger_step" => self.trigger_step = parse_value(key, value)?,
            "bsp2_follow_1" => self.bsp2_follow_1 = parse_value(key, value)?,
            "bsp3_follow_1" => self.bsp3_follow_1 = parse_value(key, value)?,
            "bs1_peak" => self.bs1_peak = parse_value(key, value)?,
            "divergence_rate" => self.divergence_rate = parse_value(key, value)?,
            "min_zs_cnt" => self.min_zs_cnt = parse_value(key, value)?,
            "macd_fast" => self.macd.fast = parse_value(key, value)?,
            "macd_slow" => self.macd.slow = parse_value(key, value)?,
            "macd_signal" => self.macd.signal = parse_value(key, value)?,
            "max_bsp2s_lv" => {
                self.max_bsp2s_lv = match value {
                    "" | "none" | "None" => None,
                    v => Some(parse_value(key, v)?),
                }
            }
            "bs_type" => self.bs_type = parse_bs_types(value).map_err(|_| invalid(key, value))?,
            "seg_algo" | "zs_algo" | "zs_level" | "macd_algo" => {
                let quoted = serde_json::Value::String(value.to_string());
                let bad = |_| invalid(key, value);
                match key {
                    "seg_algo" => self.seg_algo = serde_json::from_value(quoted).map_err(bad)?,
                    "zs_algo" => self.zs_algo = serde_json::from_value(quoted).map_err(bad)?,
                    "zs_level" => self.zs_level = serde_json::from_value(quoted).map_err(bad)?,
                    _ => self.macd_algo = serde_json::from_value(quoted).map_err(bad)?,
                }
            }
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// # Summary
    /// 校验配置取值与组合。
    ///
    /// # Logic
    /// 1. `divergence_rate` 必须为正且不是 NaN (允许无穷大)。
    /// 2. MACD 周期必须非零且 `fast < slow`。
    /// 3. `bs_type` 不能为空。
    /// 4. `zs_algo = normal` 不能与线段级别中枢组合。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.divergence_rate.is_nan() || self.divergence_rate <= 0.0 {
            return Err(invalid("divergence_rate", self.divergence_rate));
        }
        let m = &self.macd;
        if m.fast == 0 || m.slow == 0 || m.signal == 0 {
            return Err(invalid("macd", format!("{}/{}/{}", m.fast, m.slow, m.signal)));
        }
        if m.fast >= m.slow {
            return Err(ConfigError::Incompatible(format!(
                "macd fast period {} must be shorter than slow period {}",
                m.fast, m.slow
            )));
        }
        if self.bs_type.is_empty() {
            return Err(invalid("bs_type", "<empty>"));
        }
        if self.zs_algo == ZsAlgo::Normal && self.zs_level == ZoneLevel::Segment {
            return Err(ConfigError::Incompatible(
                "zs_algo=normal requires zs_level=stroke".to_string(),
            ));
        }
        Ok(())
    }

    /// 该类型的买卖点是否需要输出。
    pub fn emits(&self, kind: BspType) -> bool {
        self.bs_type.contains(&kind)
    }

    /// 中枢实际使用的离开判定算法。
    pub fn effective_zs_algo(&self) -> ZsAlgo {
        self.zs_algo.resolve(self.zs_level)
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| invalid(key, value))
}

fn parse_bs_types(text: &str) -> Result<Vec<BspType>, String> {
    let mut types = text
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(BspType::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    types.sort();
    types.dedup();
    Ok(types)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BsTypeRepr {
    Text(String),
    List(Vec<BspType>),
}

fn deserialize_bs_types<'de, D>(deserializer: D) -> Result<Vec<BspType>, D::Error>
where
    D: Deserializer<'de>,
{
    match BsTypeRepr::deserialize(deserializer)? {
        BsTypeRepr::Text(text) => parse_bs_types(&text).map_err(serde::de::Error::custom),
        BsTypeRepr::List(mut types) => {
            types.sort();
            types.dedup();
            Ok(types)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChanConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.bi_strict);
        assert_eq!(config.seg_algo, SegAlgo::Chan);
        assert_eq!(config.divergence_rate, 0.9);
        assert_eq!(config.bs_type.len(), 6);
    }

    #[test]
    fn test_from_json_accepts_comma_bs_type() {
        let config = ChanConfig::from_json(&json!({
            "seg_algo": "1+1",
            "zs_algo": "over_seg",
            "bs_type": "3b,1,1p,1",
        }))
        .unwrap();
        assert_eq!(config.seg_algo, SegAlgo::OnePlusOne);
        assert_eq!(config.zs_algo, ZsAlgo::OverSeg);
        assert_eq!(config.bs_type, vec![BspType::T1, BspType::T1p, BspType::T3b]);
    }

    #[test]
    fn test_from_json_rejects_unknown_key() {
        let err = ChanConfig::from_json(&json!({ "bi_algo": "normal" })).unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("bi_algo".to_string()));
    }

    #[test]
    fn test_from_json_rejects_bad_enum_value() {
        let err = ChanConfig::from_json(&json!({ "seg_algo": "zigzag" })).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_normal_zones_on_segments_are_incompatible() {
        let err = ChanConfig::from_json(&json!({ "zs_level": "segment" })).unwrap_err();
        assert!(matches!(err, ConfigError::Incompatible(_)));

        let ok = ChanConfig::from_json(&json!({ "zs_level": "segment", "zs_algo": "auto" }))
            .unwrap();
        assert_eq!(ok.effective_zs_algo(), ZsAlgo::OverSeg);
    }

    #[test]
    fn test_from_pairs_parses_dictionary_form() {
        let config = ChanConfig::from_pairs(&[
            ("bi_strict", "false"),
            ("divergence_rate", "inf"),
            ("macd_algo", "peak"),
            ("min_zs_cnt", "0"),
            ("bs_type", "1,2"),
            ("max_bsp2s_lv", "2"),
        ])
        .unwrap();
        assert!(!config.bi_strict);
        assert!(config.divergence_rate.is_infinite());
        assert_eq!(config.macd_algo, MacdAlgo::Peak);
        assert_eq!(config.min_zs_cnt, 0);
        assert!(config.emits(BspType::T2));
        assert!(!config.emits(BspType::T3a));
        assert_eq!(config.max_bsp2s_lv, Some(2));
    }

    #[test]
    fn test_from_pairs_rejects_invalid_values() {
        assert!(matches!(
            ChanConfig::from_pairs(&[("divergence_rate", "NaN")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ChanConfig::from_pairs(&[("macd_fast", "30")]),
            Err(ConfigError::Incompatible(_))
        ));
        assert!(matches!(
            ChanConfig::from_pairs(&[("bs_type", "")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ChanConfig::from_pairs(&[("print_warning", "true")]),
            Err(ConfigError::UnknownOption(_))
        ));
    }
}
