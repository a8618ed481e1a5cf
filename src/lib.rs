pub mod core;
pub mod exchanges;
pub mod strategies;
pub mod utils;

// 选择性导出，避免命名冲突
pub use crate::core::{
    BotConfig, EndpointRouter, EngineState, Result, RiskManager, TradingEngine, TradingError,
};
pub use crate::exchanges::{ExchangeAdapter, ExchangeRegistry, MarketDataFeed};
pub use crate::strategies::{Strategy, StrategyRegistry};
