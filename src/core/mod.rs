// 核心模块 - 路由、风控和引擎编排
pub mod config;
pub mod engine;
pub mod error;
pub mod key_manager;
pub mod risk_manager;
pub mod router;
pub mod types;

pub use config::{BotConfig, EngineSection, ExchangeSection, RiskSection, StrategySection};
pub use engine::{EngineState, TradingEngine};
pub use error::TradingError;
pub use key_manager::{KeyManager, KeyOverrides};
pub use risk_manager::{
    DrawdownRule, PositionSizeRule, RiskAction, RiskEvent, RiskManager, RiskRule, RiskSeverity,
    StopLossRule, TakeProfitRule,
};
pub use router::{CapabilityType, Endpoint, EndpointRouter, Provider, RouterStatus};
pub use types::{
    AccountMetrics, Balance, MarketData, MarketInfo, Order, OrderSide, OrderStatus, OrderType,
    Position, Result, SignalType, TradingSignal,
};
