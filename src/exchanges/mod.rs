pub mod hyperliquid;
pub mod market_data;

use crate::core::config::BotConfig;
use crate::core::error::TradingError;
use crate::core::router::EndpointRouter;
use crate::core::types::{
    AccountMetrics, Balance, MarketInfo, Order, Position, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use hyperliquid::HyperliquidAdapter;
pub use market_data::{HyperliquidMarketData, MarketDataFeed, PriceCallback};

/// 交易所适配器通用接口
///
/// 引擎只依赖这个trait，不关心具体交易所实现。
/// 方法都取`&self`，实现内部用锁管理可变状态。
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// 交易所名称
    fn name(&self) -> &str;

    /// 建立连接并验证端点可达
    async fn connect(&self) -> Result<()>;

    /// 断开连接，释放资源
    async fn disconnect(&self) -> Result<()>;

    /// 获取指定资产余额
    async fn get_balance(&self, asset: &str) -> Result<Balance>;

    /// 获取最新市场价格
    async fn get_market_price(&self, asset: &str) -> Result<f64>;

    /// 下单，返回交易所订单ID
    async fn place_order(&self, order: &Order) -> Result<String>;

    /// 撤单
    async fn cancel_order(&self, exchange_order_id: &str) -> Result<bool>;

    /// 获取所有未成交订单
    async fn get_open_orders(&self) -> Result<Vec<Order>>;

    /// 撤销全部未成交订单，返回撤销数量
    async fn cancel_all_orders(&self) -> Result<usize> {
        let orders = self.get_open_orders().await?;
        let mut cancelled = 0;
        for order in &orders {
            if let Some(id) = &order.exchange_order_id {
                match self.cancel_order(id).await {
                    Ok(true) => cancelled += 1,
                    Ok(false) => {}
                    Err(e) => log::warn!("撤单失败 {}: {}", id, e),
                }
            }
        }
        Ok(cancelled)
    }

    /// 获取当前持仓
    async fn get_positions(&self) -> Result<Vec<Position>>;

    /// 平仓（size为None时全平）
    async fn close_position(&self, asset: &str, size: Option<f64>) -> Result<bool>;

    /// 获取账户级别指标
    async fn get_account_metrics(&self) -> Result<AccountMetrics>;

    /// 获取交易对信息（精度、最小下单量）
    async fn get_market_info(&self, asset: &str) -> Result<MarketInfo>;

    /// 健康检查
    async fn health_check(&self) -> bool;

    /// 状态快照
    async fn status(&self) -> serde_json::Value;
}

impl std::fmt::Debug for dyn ExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAdapter")
            .field("name", &self.name())
            .finish()
    }
}

/// 交易所工厂函数签名
pub type ExchangeFactoryFn =
    dyn Fn(&BotConfig, Arc<EndpointRouter>) -> Result<Arc<dyn ExchangeAdapter>> + Send + Sync;

/// 交易所注册表
///
/// 标识符到构造函数的显式映射表，在启动时组装。
/// 未注册的标识符返回配置错误而不是运行时反射失败。
pub struct ExchangeRegistry {
    factories: HashMap<String, Arc<ExchangeFactoryFn>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&BotConfig, Arc<EndpointRouter>) -> Result<Arc<dyn ExchangeAdapter>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn create(
        &self,
        kind: &str,
        config: &BotConfig,
        router: Arc<EndpointRouter>,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            TradingError::ConfigError(format!("未注册的交易所类型: {}", kind))
        })?;
        factory(config, router)
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        let mut registry = ExchangeRegistry::new();
        registry.register("hyperliquid", |config, router| {
            Ok(Arc::new(HyperliquidAdapter::new(config, router)) as Arc<dyn ExchangeAdapter>)
        });
        registry
    }
}
