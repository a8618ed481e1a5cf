use crate::core::config::BotConfig;
use crate::core::error::TradingError;
use crate::core::router::EndpointRouter;
use crate::core::types::{
    AccountMetrics, Balance, MarketInfo, Order, OrderSide, OrderStatus, OrderType, Position,
    Result,
};
use crate::exchanges::ExchangeAdapter;
use crate::utils::round_to_precision;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 模拟持仓
#[derive(Debug, Clone, Default)]
struct PaperPosition {
    size: f64,
    entry_price: f64,
}

/// 模拟账本：订单簿、持仓和已实现盈亏
#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<String, Order>,
    positions: HashMap<String, PaperPosition>,
    realized_pnl: f64,
    next_id: u64,
}

/// 成交后更新模拟持仓，返回本次实现的盈亏
///
/// 同向加仓按加权平均更新入场价，反向先平后开
fn apply_fill(position: &mut PaperPosition, side: OrderSide, size: f64, price: f64) -> f64 {
    let signed = match side {
        OrderSide::Buy => size,
        OrderSide::Sell => -size,
    };

    let mut realized = 0.0;
    if position.size == 0.0 || position.size.signum() == signed.signum() {
        // 开仓或加仓
        let total = position.size.abs() + size;
        position.entry_price =
            (position.entry_price * position.size.abs() + price * size) / total;
        position.size += signed;
    } else {
        let closing = size.min(position.size.abs());
        realized = (price - position.entry_price) * closing * position.size.signum();
        position.size += signed;
        if position.size.signum() == signed.signum() && position.size != 0.0 {
            // 反手，超出部分按新价开仓
            position.entry_price = price;
        }
    }
    if position.size == 0.0 {
        position.entry_price = 0.0;
    }
    realized
}

/// 限价单是否可以立即成交
fn is_marketable(side: OrderSide, limit_price: f64, market_price: f64) -> bool {
    match side {
        OrderSide::Buy => limit_price >= market_price,
        OrderSide::Sell => limit_price <= market_price,
    }
}

/// Hyperliquid交易所适配器
///
/// 只读数据通过路由器解析的info端点实时获取；
/// 下单/撤单在模拟账本中执行（真实下单需要链上签名，
/// 由外部签名服务承担，不在本适配器范围内）。
pub struct HyperliquidAdapter {
    router: Arc<EndpointRouter>,
    client: reqwest::Client,
    wallet_address: Option<String>,
    paper_trading: bool,
    initial_balance: f64,
    connected: RwLock<bool>,
    book: RwLock<PaperBook>,
}

impl HyperliquidAdapter {
    pub fn new(config: &BotConfig, router: Arc<EndpointRouter>) -> Self {
        Self {
            router,
            client: reqwest::Client::new(),
            wallet_address: config.exchange.wallet_address.clone(),
            paper_trading: config.exchange.paper_trading,
            initial_balance: config.strategy.total_allocation,
            connected: RwLock::new(false),
            book: RwLock::new(PaperBook::default()),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if *self.connected.read().await {
            Ok(())
        } else {
            Err(TradingError::ExchangeError("未连接到交易所".to_string()))
        }
    }

    /// 向info端点发送请求，端点按操作名经路由器解析
    async fn info_request(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.router.resolve(operation).await?;
        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(TradingError::ExchangeError(format!(
                "info请求失败 {}: HTTP {}",
                operation,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn user_state(&self, address: &str) -> Result<serde_json::Value> {
        self.info_request(
            "user_state",
            serde_json::json!({"type": "clearinghouseState", "user": address}),
        )
        .await
    }

    /// 模拟持仓转为统一持仓结构，按最新价格估值
    async fn paper_positions(&self) -> Result<Vec<Position>> {
        let book = self.book.read().await;
        let snapshot: Vec<(String, PaperPosition)> = book
            .positions
            .iter()
            .filter(|(_, p)| p.size != 0.0)
            .map(|(asset, p)| (asset.clone(), p.clone()))
            .collect();
        drop(book);

        let mut positions = Vec::with_capacity(snapshot.len());
        for (asset, paper) in snapshot {
            let current_price = self.get_market_price(&asset).await?;
            positions.push(Position {
                asset,
                size: paper.size,
                entry_price: paper.entry_price,
                current_value: paper.size.abs() * current_price,
                unrealized_pnl: paper.size * (current_price - paper.entry_price),
                timestamp: Utc::now(),
            });
        }
        Ok(positions)
    }
}

#[async_trait]
impl ExchangeAdapter for HyperliquidAdapter {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    async fn connect(&self) -> Result<()> {
        // 先确认两类端点可以解析，再探测info端点可达
        let info_url = self.router.resolve("user_state").await?;
        let exchange_url = self.router.resolve("place_order").await?;

        self.info_request("meta", serde_json::json!({"type": "meta"}))
            .await?;

        *self.connected.write().await = true;

        log::info!(
            "✅ 已连接到Hyperliquid ({})",
            if self.router.is_testnet() {
                "测试网"
            } else {
                "主网"
            }
        );
        log::info!("📡 Info端点: {}", info_url);
        log::info!("💱 Exchange端点: {}", exchange_url);
        if self.paper_trading {
            log::info!("📝 模拟交易模式，订单不会发送到交易所");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.write().await = false;
        log::info!("🔌 已断开Hyperliquid连接");
        Ok(())
    }

    async fn get_balance(&self, asset: &str) -> Result<Balance> {
        self.ensure_connected().await?;

        if let Some(address) = &self.wallet_address {
            let state = self.user_state(address).await?;
            let summary = &state["marginSummary"];
            let total = summary["accountValue"]
                .as_str()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            let available = state["withdrawable"]
                .as_str()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            return Ok(Balance {
                asset: asset.to_string(),
                available,
                locked: total - available,
                total,
            });
        }

        // 模拟模式：初始资金加已实现盈亏
        let book = self.book.read().await;
        let total = self.initial_balance + book.realized_pnl;
        Ok(Balance {
            asset: asset.to_string(),
            available: total,
            locked: 0.0,
            total,
        })
    }

    async fn get_market_price(&self, asset: &str) -> Result<f64> {
        let mids = self
            .info_request("all_mids", serde_json::json!({"type": "allMids"}))
            .await?;

        mids[asset]
            .as_str()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| TradingError::ExchangeError(format!("未找到 {} 的价格", asset)))
    }

    async fn place_order(&self, order: &Order) -> Result<String> {
        self.ensure_connected().await?;

        if !self.paper_trading {
            return Err(TradingError::NotSupported(
                "真实下单需要外部签名服务, 请启用 paper_trading".to_string(),
            ));
        }

        let market_info = self.get_market_info(&order.asset).await?;
        let market_price = self.get_market_price(&order.asset).await?;

        let size = round_to_precision(order.size, market_info.size_precision)
            .max(market_info.min_order_size);

        let (fill_price, resting) = match order.order_type {
            OrderType::Market => (market_price, false),
            OrderType::Limit => {
                let price = order.price.ok_or_else(|| {
                    TradingError::OrderError("限价单缺少价格".to_string())
                })?;
                let price = round_to_precision(price, market_info.price_precision);
                if is_marketable(order.side, price, market_price) {
                    (price, false)
                } else {
                    (price, true)
                }
            }
        };

        let mut book = self.book.write().await;
        book.next_id += 1;
        let exchange_id = format!("paper_{}", book.next_id);

        if resting {
            // 挂单，等待价格到达（模拟账本中由撤单或重启清理）
            let mut tracked = order.clone();
            tracked.status = OrderStatus::Submitted;
            tracked.exchange_order_id = Some(exchange_id.clone());
            book.orders.insert(exchange_id.clone(), tracked);
            log::debug!(
                "📝 模拟挂单 {} {} {} @ {}",
                order.side,
                size,
                order.asset,
                fill_price
            );
        } else {
            let position = book.positions.entry(order.asset.clone()).or_default();
            let realized = apply_fill(position, order.side, size, fill_price);
            book.realized_pnl += realized;
            log::debug!(
                "📝 模拟成交 {} {} {} @ {}",
                order.side,
                size,
                order.asset,
                fill_price
            );
        }

        Ok(exchange_id)
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<bool> {
        self.ensure_connected().await?;
        let mut book = self.book.write().await;
        Ok(book.orders.remove(exchange_order_id).is_some())
    }

    async fn get_open_orders(&self) -> Result<Vec<Order>> {
        self.ensure_connected().await?;

        if self.paper_trading {
            let book = self.book.read().await;
            return Ok(book.orders.values().cloned().collect());
        }

        let address = self.wallet_address.as_ref().ok_or_else(|| {
            TradingError::ConfigError("查询订单需要配置 wallet_address".to_string())
        })?;
        let raw = self
            .info_request(
                "open_orders",
                serde_json::json!({"type": "openOrders", "user": address}),
            )
            .await?;

        let mut orders = Vec::new();
        if let Some(list) = raw.as_array() {
            for item in list {
                let oid = item["oid"].to_string();
                orders.push(Order {
                    id: oid.clone(),
                    asset: item["coin"].as_str().unwrap_or_default().to_string(),
                    side: if item["side"].as_str() == Some("B") {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    },
                    size: item["sz"]
                        .as_str()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0.0),
                    order_type: OrderType::Limit,
                    price: item["limitPx"].as_str().and_then(|v| v.parse().ok()),
                    status: OrderStatus::Submitted,
                    exchange_order_id: Some(oid),
                    created_at: Utc::now(),
                });
            }
        }
        Ok(orders)
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.ensure_connected().await?;

        if self.paper_trading {
            return self.paper_positions().await;
        }

        let address = self.wallet_address.as_ref().ok_or_else(|| {
            TradingError::ConfigError("查询持仓需要配置 wallet_address".to_string())
        })?;
        let state = self.user_state(address).await?;

        let mut positions = Vec::new();
        if let Some(list) = state["assetPositions"].as_array() {
            for item in list {
                let pos = &item["position"];
                let size: f64 = pos["szi"]
                    .as_str()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0);
                if size == 0.0 {
                    continue;
                }
                let asset = pos["coin"].as_str().unwrap_or_default().to_string();
                let entry_price: f64 = pos["entryPx"]
                    .as_str()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0);
                let current_price = self.get_market_price(&asset).await?;
                let unrealized_pnl = if entry_price > 0.0 {
                    size * (current_price - entry_price)
                } else {
                    0.0
                };
                positions.push(Position {
                    asset,
                    size,
                    entry_price,
                    current_value: size.abs() * current_price,
                    unrealized_pnl,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(positions)
    }

    async fn close_position(&self, asset: &str, size: Option<f64>) -> Result<bool> {
        self.ensure_connected().await?;

        if !self.paper_trading {
            return Err(TradingError::NotSupported(
                "真实平仓需要外部签名服务, 请启用 paper_trading".to_string(),
            ));
        }

        let positions = self.get_positions().await?;
        let target = match positions.iter().find(|p| p.asset == asset) {
            Some(p) => p,
            None => {
                log::warn!("未找到 {} 的持仓", asset);
                return Ok(false);
            }
        };

        let close_size = match size {
            None => target.size.abs(),
            Some(s) => s.min(target.size.abs()),
        };
        // 平仓方向与持仓相反
        let close_side = if target.size > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let market_price = self.get_market_price(asset).await?;

        let mut book = self.book.write().await;
        if let Some(position) = book.positions.get_mut(asset) {
            let realized = apply_fill(position, close_side, close_size, market_price);
            book.realized_pnl += realized;
        }
        log::info!("✅ 已平仓 {} {} @ {}", close_size, asset, market_price);
        Ok(true)
    }

    async fn get_account_metrics(&self) -> Result<AccountMetrics> {
        self.ensure_connected().await?;

        let positions = self.get_positions().await?;
        let unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        let realized_pnl = if self.paper_trading {
            self.book.read().await.realized_pnl
        } else {
            0.0
        };

        let total_value = if let Some(address) = &self.wallet_address {
            let state = self.user_state(address).await?;
            state["marginSummary"]["accountValue"]
                .as_str()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        } else {
            self.initial_balance + realized_pnl + unrealized_pnl
        };

        let total_pnl = unrealized_pnl + realized_pnl;
        let drawdown_pct = if total_value > 0.0 && total_pnl < 0.0 {
            (-total_pnl / total_value * 100.0).max(0.0)
        } else {
            0.0
        };
        let largest_position_pct = if total_value > 0.0 {
            positions
                .iter()
                .map(|p| p.current_value.abs() / total_value * 100.0)
                .fold(0.0, f64::max)
        } else {
            0.0
        };

        Ok(AccountMetrics {
            total_value,
            total_pnl,
            unrealized_pnl,
            realized_pnl,
            drawdown_pct,
            positions_count: positions.len(),
            largest_position_pct,
        })
    }

    async fn get_market_info(&self, asset: &str) -> Result<MarketInfo> {
        let meta = self
            .info_request("meta", serde_json::json!({"type": "meta"}))
            .await?;

        if let Some(universe) = meta["universe"].as_array() {
            for info in universe {
                if info["name"].as_str() == Some(asset) {
                    let sz_decimals = info["szDecimals"].as_u64().unwrap_or(4) as u32;
                    return Ok(MarketInfo {
                        symbol: asset.to_string(),
                        min_order_size: sz_decimals as f64 / 10000.0,
                        price_precision: info["priceDecimals"].as_u64().unwrap_or(2) as u32,
                        size_precision: sz_decimals,
                    });
                }
            }
        }

        Err(TradingError::ExchangeError(format!(
            "未找到交易对 {}",
            asset
        )))
    }

    async fn health_check(&self) -> bool {
        self.info_request("meta", serde_json::json!({"type": "meta"}))
            .await
            .is_ok()
    }

    async fn status(&self) -> serde_json::Value {
        let book = self.book.read().await;
        serde_json::json!({
            "exchange": "hyperliquid",
            "connected": *self.connected.read().await,
            "testnet": self.router.is_testnet(),
            "paper_trading": self.paper_trading,
            "open_orders": book.orders.len(),
            "positions": book.positions.values().filter(|p| p.size != 0.0).count(),
            "realized_pnl": book.realized_pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_fill_accumulates_weighted_entry() {
        let mut position = PaperPosition::default();
        apply_fill(&mut position, OrderSide::Buy, 1.0, 100.0);
        assert_eq!(position.size, 1.0);
        assert_eq!(position.entry_price, 100.0);

        // 加仓后入场价为加权平均
        apply_fill(&mut position, OrderSide::Buy, 1.0, 200.0);
        assert_eq!(position.size, 2.0);
        assert_eq!(position.entry_price, 150.0);
    }

    #[test]
    fn test_apply_fill_realizes_pnl_on_reduce() {
        let mut position = PaperPosition {
            size: 2.0,
            entry_price: 100.0,
        };
        let realized = apply_fill(&mut position, OrderSide::Sell, 1.0, 120.0);
        assert_eq!(realized, 20.0);
        assert_eq!(position.size, 1.0);
        assert_eq!(position.entry_price, 100.0);
    }

    #[test]
    fn test_apply_fill_full_close_resets_entry() {
        let mut position = PaperPosition {
            size: 1.0,
            entry_price: 100.0,
        };
        let realized = apply_fill(&mut position, OrderSide::Sell, 1.0, 90.0);
        assert_eq!(realized, -10.0);
        assert_eq!(position.size, 0.0);
        assert_eq!(position.entry_price, 0.0);
    }

    #[test]
    fn test_apply_fill_short_side() {
        let mut position = PaperPosition::default();
        apply_fill(&mut position, OrderSide::Sell, 1.0, 100.0);
        assert_eq!(position.size, -1.0);

        // 空头在价格下跌时获利
        let realized = apply_fill(&mut position, OrderSide::Buy, 1.0, 80.0);
        assert_eq!(realized, 20.0);
    }

    #[test]
    fn test_is_marketable() {
        assert!(is_marketable(OrderSide::Buy, 100.0, 99.0));
        assert!(!is_marketable(OrderSide::Buy, 98.0, 99.0));
        assert!(is_marketable(OrderSide::Sell, 98.0, 99.0));
        assert!(!is_marketable(OrderSide::Sell, 100.0, 99.0));
    }
}
