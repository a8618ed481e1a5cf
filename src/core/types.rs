use chrono::{DateTime, Utc};
/// 统一的类型定义模块
/// 整合了引擎、策略和交易所共享的数据结构
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============= 基础类型定义 =============

/// 结果类型别名
pub type Result<T> = std::result::Result<T, crate::core::error::TradingError>;

/// 行情数据（推送给策略的最小快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub asset: String,
    pub price: f64,
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

/// 账户余额
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: f64,
    pub locked: f64,
    pub total: f64,
}

/// 持仓信息
///
/// 每个tick从交易所整体刷新，不做原地修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub asset: String,
    /// 正数 = 多头, 负数 = 空头
    pub size: f64,
    pub entry_price: f64,
    pub current_value: f64,
    pub unrealized_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// 账户级别指标快照，每个tick重新计算
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountMetrics {
    pub total_value: f64,
    pub total_pnl: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub drawdown_pct: f64,
    pub positions_count: usize,
    pub largest_position_pct: f64,
}

/// 市场/交易对信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub min_order_size: f64,
    pub price_precision: u32,
    pub size_precision: u32,
}

// ============= 订单相关 =============

/// 订单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// 订单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub asset: String,
    pub side: OrderSide,
    pub size: f64,
    pub order_type: OrderType,
    /// None = 市价单
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: String, asset: String, side: OrderSide, size: f64, price: Option<f64>) -> Self {
        Self {
            id,
            asset,
            side,
            size,
            order_type: if price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            price,
            status: OrderStatus::Pending,
            exchange_order_id: None,
            created_at: Utc::now(),
        }
    }
}

// ============= 交易信号 =============

/// 交易信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
    Close,
}

/// 来自策略的交易信号，在单个tick内产生并消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub signal_type: SignalType,
    pub asset: String,
    pub size: f64,
    /// None = 市价单
    pub price: Option<f64>,
    pub reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TradingSignal {
    pub fn new(signal_type: SignalType, asset: impl Into<String>, size: f64) -> Self {
        Self {
            signal_type,
            asset: asset.into(),
            size,
            price: None,
            reason: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
