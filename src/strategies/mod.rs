pub mod grid;

use crate::core::config::BotConfig;
use crate::core::error::TradingError;
use crate::core::types::{MarketData, Position, Result, TradingSignal};
use std::collections::HashMap;
use std::sync::Arc;

pub use grid::GridStrategy;

/// 交易策略接口
///
/// 策略是纯决策组件：接收市场快照，输出交易信号，
/// 不直接接触交易所。执行与回报由引擎负责。
pub trait Strategy: Send + Sync {
    /// 策略名称
    fn name(&self) -> &str;

    /// 根据最新行情生成交易信号
    fn generate_signals(
        &mut self,
        market_data: &MarketData,
        positions: &[Position],
        balance: f64,
    ) -> Result<Vec<TradingSignal>>;

    /// 订单成交回报
    fn on_trade_executed(&mut self, signal: &TradingSignal, executed_price: f64, executed_size: f64);

    /// 执行出错通知（策略可借此调整内部状态）
    fn on_error(&mut self, error: &TradingError, context: &str) {
        log::warn!("策略 {} 收到错误 [{}]: {}", self.name(), context, error);
    }

    /// 启动策略
    fn start(&mut self) {
        self.set_active(true);
    }

    /// 停止策略，只翻转活跃标志，不产生平仓动作
    fn stop(&mut self) {
        self.set_active(false);
    }

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// 状态快照
    fn get_status(&self) -> serde_json::Value;
}

impl std::fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name())
            .finish()
    }
}

/// 策略工厂函数签名
pub type StrategyFactoryFn = dyn Fn(&BotConfig) -> Result<Box<dyn Strategy>> + Send + Sync;

/// 策略注册表，标识符到构造函数的显式映射表
pub struct StrategyRegistry {
    factories: HashMap<String, Arc<StrategyFactoryFn>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&BotConfig) -> Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn create(&self, kind: &str, config: &BotConfig) -> Result<Box<dyn Strategy>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            TradingError::ConfigError(format!("未注册的策略类型: {}", kind))
        })?;
        factory(config)
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = StrategyRegistry::new();
        registry.register("basic_grid", |config| {
            Ok(Box::new(GridStrategy::from_config(&config.strategy)) as Box<dyn Strategy>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> BotConfig {
        serde_yaml::from_str(
            r#"
name: test
exchange:
  kind: hyperliquid
strategy:
  kind: basic_grid
  symbol: BTC
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_registry_creates_grid() {
        let registry = StrategyRegistry::default();
        let strategy = registry.create("basic_grid", &sample_config()).unwrap();
        assert_eq!(strategy.name(), "basic_grid");
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        let registry = StrategyRegistry::default();
        let err = registry.create("momentum", &sample_config()).unwrap_err();
        assert!(matches!(err, TradingError::ConfigError(_)));
    }
}
