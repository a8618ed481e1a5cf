use crate::core::error::TradingError;
use serde::{Deserialize, Serialize};
use std::fs;

/// 机器人总配置，从YAML文件加载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    pub exchange: ExchangeSection,
    pub strategy: StrategySection,
    #[serde(default)]
    pub risk_management: RiskSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// 交易所配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSection {
    /// 交易所类型（注册表标识，如 hyperliquid）
    #[serde(default = "default_exchange_kind")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub testnet: bool,
    /// 模拟下单模式（真实签名在适配器外部实现）
    #[serde(default = "default_true")]
    pub paper_trading: bool,
    /// 查询账户状态使用的钱包地址
    #[serde(default)]
    pub wallet_address: Option<String>,
}

fn default_exchange_kind() -> String {
    "hyperliquid".to_string()
}

fn default_true() -> bool {
    true
}

/// 策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySection {
    /// 策略类型（注册表标识，如 basic_grid）
    #[serde(default = "default_strategy_kind")]
    pub kind: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_levels")]
    pub levels: usize,
    #[serde(default = "default_range_pct")]
    pub range_pct: f64,
    #[serde(default = "default_allocation")]
    pub total_allocation: f64,
    /// 价格区间（未设置时按 range_pct 自动计算）
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default = "default_rebalance_pct")]
    pub rebalance_threshold_pct: f64,
}

fn default_strategy_kind() -> String {
    "basic_grid".to_string()
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_levels() -> usize {
    10
}

fn default_range_pct() -> f64 {
    10.0
}

fn default_allocation() -> f64 {
    1000.0
}

fn default_rebalance_pct() -> f64 {
    15.0
}

/// 风险管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default)]
    pub stop_loss_enabled: bool,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default)]
    pub take_profit_enabled: bool,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_position_pct")]
    pub max_position_size_pct: f64,
}

fn default_stop_loss_pct() -> f64 {
    5.0
}

fn default_take_profit_pct() -> f64 {
    20.0
}

fn default_max_drawdown_pct() -> f64 {
    15.0
}

fn default_max_position_pct() -> f64 {
    30.0
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            stop_loss_enabled: false,
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_enabled: false,
            take_profit_pct: default_take_profit_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_position_size_pct: default_max_position_pct(),
        }
    }
}

/// 引擎运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// 维护循环间隔（秒）
    #[serde(default = "default_maintenance_secs")]
    pub maintenance_interval_secs: u64,
    /// 本地订单过期时间（秒）
    #[serde(default = "default_order_stale_secs")]
    pub order_stale_secs: i64,
    /// 停止时是否平掉所有持仓（默认仅取消订单）
    #[serde(default)]
    pub close_positions_on_exit: bool,
}

fn default_maintenance_secs() -> u64 {
    60
}

fn default_order_stale_secs() -> i64 {
    3600
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: default_maintenance_secs(),
            order_stale_secs: default_order_stale_secs(),
            close_positions_on_exit: false,
        }
    }
}

impl BotConfig {
    /// 从YAML文件加载配置
    pub fn from_file(path: &str) -> Result<Self, TradingError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TradingError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        let config: BotConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// 校验配置，启动引擎前调用
    pub fn validate(&self) -> Result<(), TradingError> {
        let s = &self.strategy;

        if s.symbol.is_empty() {
            return Err(TradingError::ConfigError("symbol 不能为空".to_string()));
        }
        if s.levels < 2 {
            return Err(TradingError::ConfigError(format!(
                "levels 必须 >= 2, 当前为 {}",
                s.levels
            )));
        }
        if !(1.0..=50.0).contains(&s.range_pct) {
            return Err(TradingError::ConfigError(format!(
                "range_pct 必须在 1.0~50.0 之间, 当前为 {}",
                s.range_pct
            )));
        }
        if s.total_allocation <= 0.0 {
            return Err(TradingError::ConfigError(
                "total_allocation 必须为正数".to_string(),
            ));
        }
        if s.rebalance_threshold_pct <= 0.0 {
            return Err(TradingError::ConfigError(
                "rebalance_threshold_pct 必须为正数".to_string(),
            ));
        }
        match (s.min_price, s.max_price) {
            (Some(min), Some(max)) if min >= max => {
                return Err(TradingError::ConfigError(format!(
                    "min_price 必须小于 max_price ({} >= {})",
                    min, max
                )));
            }
            (Some(min), _) if min <= 0.0 => {
                return Err(TradingError::ConfigError("min_price 必须为正数".to_string()));
            }
            _ => {}
        }

        let r = &self.risk_management;
        for (name, value) in [
            ("stop_loss_pct", r.stop_loss_pct),
            ("take_profit_pct", r.take_profit_pct),
            ("max_drawdown_pct", r.max_drawdown_pct),
            ("max_position_size_pct", r.max_position_size_pct),
        ] {
            if !(0.0..=100.0).contains(&value) || value == 0.0 {
                return Err(TradingError::ConfigError(format!(
                    "{} 必须在 (0, 100] 之间, 当前为 {}",
                    name, value
                )));
            }
        }

        if self.engine.maintenance_interval_secs == 0 {
            return Err(TradingError::ConfigError(
                "maintenance_interval_secs 必须为正数".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
name: "btc-grid"
active: true
exchange:
  kind: hyperliquid
  testnet: true
strategy:
  kind: basic_grid
  symbol: BTC
  levels: 5
  range_pct: 10.0
  total_allocation: 1000.0
  rebalance_threshold_pct: 15.0
risk_management:
  stop_loss_enabled: true
  stop_loss_pct: 5.0
"#
    }

    #[test]
    fn test_parse_and_validate() {
        let config: BotConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.name, "btc-grid");
        assert_eq!(config.strategy.levels, 5);
        assert!(config.risk_management.stop_loss_enabled);
        // 未显式配置的部分使用默认值
        assert_eq!(config.risk_management.max_drawdown_pct, 15.0);
        assert_eq!(config.engine.maintenance_interval_secs, 60);
        assert!(!config.engine.close_positions_on_exit);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        let mut config: BotConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.strategy.levels = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut config: BotConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.strategy.min_price = Some(120000.0);
        config.strategy.max_price = Some(90000.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config: BotConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.risk_management.max_drawdown_pct = 0.0;
        assert!(config.validate().is_err());
    }
}
