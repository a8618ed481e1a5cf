use crate::core::config::BotConfig;
use crate::core::error::TradingError;
use crate::core::key_manager::KeyManager;
use crate::core::risk_manager::{RiskAction, RiskEvent, RiskManager};
use crate::core::router::EndpointRouter;
use crate::core::types::{
    MarketData, Order, OrderSide, OrderStatus, Position, Result, SignalType, TradingSignal,
};
use crate::exchanges::{
    ExchangeAdapter, ExchangeRegistry, HyperliquidMarketData, MarketDataFeed,
};
use crate::strategies::{Strategy, StrategyRegistry};
use crate::utils::generate_order_id;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};

/// 引擎生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// 交易引擎
///
/// 把市场数据、策略、风险管理和交易所执行串成一个控制循环。
/// 行情回调只负责把数据推进通道，tick在单一消费循环中逐个处理，
/// 保证同一时间只有一个tick在执行。
pub struct TradingEngine {
    config: BotConfig,
    exchange: Arc<dyn ExchangeAdapter>,
    market_data: Arc<dyn MarketDataFeed>,
    strategy: Mutex<Box<dyn Strategy>>,
    risk_manager: Option<Mutex<RiskManager>>,
    state: RwLock<EngineState>,
    pending_orders: RwLock<HashMap<String, Order>>,
    positions: RwLock<Vec<Position>>,
    executed_trades: AtomicU64,
    shutdown: Notify,
}

impl TradingEngine {
    /// 用预构建组件组装引擎（注册表构建和测试共用入口）
    pub fn with_components(
        config: BotConfig,
        exchange: Arc<dyn ExchangeAdapter>,
        market_data: Arc<dyn MarketDataFeed>,
        strategy: Box<dyn Strategy>,
        risk_manager: Option<RiskManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            exchange,
            market_data,
            strategy: Mutex::new(strategy),
            risk_manager: risk_manager.map(Mutex::new),
            state: RwLock::new(EngineState::Uninitialized),
            pending_orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(Vec::new()),
            executed_trades: AtomicU64::new(0),
            shutdown: Notify::new(),
        })
    }

    /// 初始化引擎：解析凭证、按注册表构建组件并建立连接
    ///
    /// 任何一步失败都返回错误，引擎不会进入Running状态
    pub async fn initialize(config: BotConfig, router: Arc<EndpointRouter>) -> Result<Arc<Self>> {
        config.validate()?;

        // 真实下单模式必须有私钥；模拟模式不需要签名
        if !config.exchange.paper_trading {
            KeyManager::new().private_key(config.exchange.testnet, None)?;
        }

        let exchange_registry = ExchangeRegistry::default();
        let exchange =
            exchange_registry.create(&config.exchange.kind, &config, Arc::clone(&router))?;

        let market_data: Arc<dyn MarketDataFeed> =
            Arc::new(HyperliquidMarketData::new(Arc::clone(&router)));

        let strategy_registry = StrategyRegistry::default();
        let strategy = strategy_registry.create(&config.strategy.kind, &config)?;

        let risk_manager = RiskManager::from_config(&config.risk_management);

        let engine =
            Self::with_components(config, exchange, market_data, strategy, Some(risk_manager));
        engine.connect().await?;
        Ok(engine)
    }

    /// 连接交易所和行情源，成功后进入Initialized
    pub async fn connect(&self) -> Result<()> {
        self.exchange.connect().await?;
        self.market_data.connect().await?;
        *self.state.write().await = EngineState::Initialized;
        log::info!("✅ 引擎初始化完成: {}", self.config.name);
        Ok(())
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// 启动引擎并阻塞运行，直到stop()被调用或数据流终止
    pub async fn run(self: Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Initialized {
                return Err(TradingError::Other(format!(
                    "引擎当前状态不允许启动: {:?}",
                    *state
                )));
            }
            *state = EngineState::Running;
        }
        log::info!("🎬 交易引擎已启动");

        // 行情回调只投递，不处理；通道满时丢弃本次tick
        let (tick_tx, mut tick_rx) = mpsc::channel::<MarketData>(100);
        let callback: crate::exchanges::PriceCallback = Arc::new(move |market_data| {
            if tick_tx.try_send(market_data).is_err() {
                log::warn!("⚠️ tick通道已满，丢弃一次行情更新");
            }
        });
        self.market_data
            .subscribe_price_updates(&self.config.strategy.symbol, callback)
            .await?;

        {
            let mut strategy = self.strategy.lock().await;
            strategy.start();
        }

        // 维护循环独立运行，只共享订单表
        let maintenance = {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.maintenance_loop().await;
            })
        };

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                received = tick_rx.recv() => match received {
                    Some(market_data) => {
                        if *self.state.read().await != EngineState::Running {
                            break;
                        }
                        self.tick(market_data).await;
                    }
                    None => {
                        log::warn!("⚠️ 行情通道已关闭，引擎退出");
                        break;
                    }
                },
            }
        }

        maintenance.abort();
        self.stop().await;
        Ok(())
    }

    /// 单个tick：刷新状态 -> 风险评估 -> 策略信号 -> 执行
    async fn tick(&self, market_data: MarketData) {
        // 每个tick整体刷新持仓和余额
        match self.exchange.get_positions().await {
            Ok(positions) => *self.positions.write().await = positions,
            Err(e) => {
                log::error!("刷新持仓失败: {}", e);
                return;
            }
        }
        let balance = match self.exchange.get_balance("USDC").await {
            Ok(balance) => balance.available,
            Err(e) => {
                log::error!("获取余额失败: {}", e);
                return;
            }
        };

        if self.risk_manager.is_some() {
            self.handle_risk_events(&market_data).await;
        }

        let signals = {
            let positions = self.positions.read().await;
            let mut strategy = self.strategy.lock().await;
            match strategy.generate_signals(&market_data, &positions, balance) {
                Ok(signals) => signals,
                Err(e) => {
                    log::error!("策略信号生成失败: {}", e);
                    strategy.on_error(&e, "generate_signals");
                    return;
                }
            }
        };

        for signal in signals {
            if let Err(e) = self.execute_signal(&signal).await {
                log::error!("信号执行失败: {}", e);
                self.strategy.lock().await.on_error(&e, "execute_signal");
            }
        }
    }

    /// 风险评估与分发，单个事件的处理失败不影响后续
    async fn handle_risk_events(&self, market_data: &MarketData) {
        let risk_manager = match &self.risk_manager {
            Some(rm) => rm,
            None => return,
        };

        let metrics = match self.exchange.get_account_metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                log::error!("获取账户指标失败: {}", e);
                return;
            }
        };

        let events = {
            let positions = self.positions.read().await;
            let market_map =
                HashMap::from([(market_data.asset.clone(), market_data.clone())]);
            risk_manager
                .lock()
                .await
                .evaluate(&positions, &market_map, &metrics)
        };

        for event in events {
            if let Err(e) = self.execute_risk_action(&event).await {
                log::error!("风险动作执行失败 [{}]: {}", event.rule_name, e);
            }
        }
    }

    /// 按风险事件执行动作
    async fn execute_risk_action(&self, event: &RiskEvent) -> Result<()> {
        if event.action != RiskAction::None {
            log::warn!("🚨 风险事件: {}", event.reason);
        }

        match event.action {
            RiskAction::None => {}
            RiskAction::ClosePosition => {
                if self.exchange.close_position(&event.asset, None).await? {
                    log::info!("✅ 已平仓 {}", event.asset);
                } else {
                    log::error!("❌ 平仓失败 {}", event.asset);
                }
            }
            RiskAction::ReducePosition => {
                // 目前固定减仓50%
                let positions = self.exchange.get_positions().await?;
                if let Some(pos) = positions.iter().find(|p| p.asset == event.asset) {
                    let reduce_size = pos.size.abs() * 0.5;
                    if self
                        .exchange
                        .close_position(&event.asset, Some(reduce_size))
                        .await?
                    {
                        log::info!("✅ {} 已减仓50%", event.asset);
                    }
                }
            }
            RiskAction::CancelOrders => {
                let cancelled = self.exchange.cancel_all_orders().await?;
                log::info!("✅ 已撤销 {} 个订单", cancelled);
            }
            RiskAction::PauseTrading => {
                log::error!("⏸️ 交易暂停: {}", event.reason);
                self.strategy.lock().await.set_active(false);
            }
            RiskAction::EmergencyExit => {
                log::error!("🚨 紧急退出: {}", event.reason);
                let positions = self.exchange.get_positions().await?;
                for pos in &positions {
                    if let Err(e) = self.exchange.close_position(&pos.asset, None).await {
                        log::error!("紧急平仓失败 {}: {}", pos.asset, e);
                    }
                }
                self.exchange.cancel_all_orders().await?;
                self.strategy.lock().await.set_active(false);
            }
        }
        Ok(())
    }

    /// 执行单个交易信号
    async fn execute_signal(&self, signal: &TradingSignal) -> Result<()> {
        match signal.signal_type {
            SignalType::Buy | SignalType::Sell => self.place_order(signal).await,
            SignalType::Close => {
                if signal.metadata.get("action").and_then(|v| v.as_str()) == Some("cancel_all") {
                    let cancelled = self.exchange.cancel_all_orders().await?;
                    log::info!("🗑️ 再平衡撤销了 {} 个订单", cancelled);
                }
                Ok(())
            }
            SignalType::Hold => Ok(()),
        }
    }

    async fn place_order(&self, signal: &TradingSignal) -> Result<()> {
        let side = if signal.signal_type == SignalType::Buy {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let mut order = Order::new(
            generate_order_id(),
            signal.asset.clone(),
            side,
            signal.size,
            signal.price,
        );

        let exchange_order_id = self.exchange.place_order(&order).await?;
        order.exchange_order_id = Some(exchange_order_id);
        order.status = OrderStatus::Submitted;

        log::info!(
            "📝 已下单 {} {} {} @ {:?}",
            order.side,
            order.size,
            order.asset,
            order.price
        );
        self.pending_orders
            .write()
            .await
            .insert(order.id.clone(), order.clone());

        // 简化处理：视为立即成交并通知策略，未实现成交跟踪
        let executed_price = signal.price.unwrap_or(0.0);
        self.strategy
            .lock()
            .await
            .on_trade_executed(signal, executed_price, order.size);
        self.executed_trades.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// 维护循环：周期性清理过期的本地订单记录
    async fn maintenance_loop(&self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.engine.maintenance_interval_secs,
        ));
        interval.tick().await;

        loop {
            interval.tick().await;
            self.evict_stale_orders().await;

            let trades = self.executed_trades.load(Ordering::Relaxed);
            if trades > 0 {
                log::info!("📊 累计成交: {}", trades);
            }
        }
    }

    /// 清理超过order_stale_secs的本地订单（可能早已成交或撤销）
    async fn evict_stale_orders(&self) {
        let cutoff = Utc::now() - Duration::seconds(self.config.engine.order_stale_secs);
        let mut orders = self.pending_orders.write().await;
        let before = orders.len();
        orders.retain(|_, order| order.created_at >= cutoff);
        let evicted = before - orders.len();
        if evicted > 0 {
            log::debug!("🧹 清理了 {} 条过期订单记录", evicted);
        }
    }

    /// 请求引擎停止（可从其他任务并发调用）
    pub fn request_stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// 按固定顺序优雅停止，重复调用为空操作
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Stopped {
                return;
            }
            // 先翻转状态，进行中的tick结束后不再分发新tick
            *state = EngineState::Stopped;
        }
        self.shutdown.notify_waiters();
        log::info!("🛑 正在停止交易引擎");

        // 1. 停止策略
        self.strategy.lock().await.stop();

        // 2. 检查持仓
        match self.exchange.get_positions().await {
            Ok(positions) if !positions.is_empty() => {
                log::info!("📊 当前有 {} 个未平仓持仓", positions.len());
                if self.config.engine.close_positions_on_exit {
                    for pos in &positions {
                        match self.exchange.close_position(&pos.asset, None).await {
                            Ok(true) => log::info!("✅ 退出时平仓 {}", pos.asset),
                            Ok(false) => log::warn!("平仓未执行 {}", pos.asset),
                            Err(e) => log::error!("退出时平仓失败 {}: {}", pos.asset, e),
                        }
                    }
                } else {
                    log::info!("⚠️ 保留持仓，仅撤销挂单");
                }
            }
            Ok(_) => {}
            Err(e) => log::error!("停止时查询持仓失败: {}", e),
        }

        // 3. 撤销全部挂单
        match self.exchange.cancel_all_orders().await {
            Ok(cancelled) if cancelled > 0 => log::info!("✅ 已撤销 {} 个挂单", cancelled),
            Ok(_) => {}
            Err(e) => log::error!("停止时撤单失败: {}", e),
        }

        // 4. 断开行情源，5. 断开交易所
        if let Err(e) = self.market_data.disconnect().await {
            log::error!("断开行情源失败: {}", e);
        }
        if let Err(e) = self.exchange.disconnect().await {
            log::error!("断开交易所失败: {}", e);
        }

        log::info!("✅ 交易引擎已停止");
    }

    pub async fn status(&self) -> serde_json::Value {
        let risk_status = match &self.risk_manager {
            Some(rm) => serde_json::to_value(rm.lock().await.status()).unwrap_or_default(),
            None => serde_json::Value::Null,
        };
        serde_json::json!({
            "name": self.config.name,
            "running": *self.state.read().await == EngineState::Running,
            "strategy": self.strategy.lock().await.get_status(),
            "exchange": self.exchange.status().await,
            "market_data": self.market_data.status().await,
            "risk_manager": risk_status,
            "executed_trades": self.executed_trades.load(Ordering::Relaxed),
            "pending_orders": self.pending_orders.read().await.len(),
            "current_positions": self.positions.read().await.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::risk_manager::RiskSeverity;
    use crate::core::types::{AccountMetrics, Balance, MarketInfo};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// 按调用顺序记录方法名的模拟交易所
    struct RecordingExchange {
        calls: Arc<StdMutex<Vec<String>>>,
        positions: StdMutex<Vec<Position>>,
    }

    impl RecordingExchange {
        fn new(calls: Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                calls,
                positions: StdMutex::new(Vec::new()),
            }
        }

        fn with_position(self, asset: &str, size: f64) -> Self {
            self.positions.lock().unwrap().push(Position {
                asset: asset.to_string(),
                size,
                entry_price: 100.0,
                current_value: size.abs() * 100.0,
                unrealized_pnl: 0.0,
                timestamp: Utc::now(),
            });
            self
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl ExchangeAdapter for RecordingExchange {
        fn name(&self) -> &str {
            "mock"
        }

        async fn connect(&self) -> Result<()> {
            self.record("exchange.connect");
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.record("exchange.disconnect");
            Ok(())
        }

        async fn get_balance(&self, asset: &str) -> Result<Balance> {
            Ok(Balance {
                asset: asset.to_string(),
                available: 1000.0,
                locked: 0.0,
                total: 1000.0,
            })
        }

        async fn get_market_price(&self, _asset: &str) -> Result<f64> {
            Ok(100.0)
        }

        async fn place_order(&self, order: &Order) -> Result<String> {
            self.record(format!("place_order:{}", order.asset));
            Ok("mock_1".to_string())
        }

        async fn cancel_order(&self, _exchange_order_id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn cancel_all_orders(&self) -> Result<usize> {
            self.record("cancel_all_orders");
            Ok(0)
        }

        async fn get_open_orders(&self) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }

        async fn get_positions(&self) -> Result<Vec<Position>> {
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn close_position(&self, asset: &str, size: Option<f64>) -> Result<bool> {
            self.record(match size {
                Some(s) => format!("close_position:{}:{}", asset, s),
                None => format!("close_position:{}", asset),
            });
            Ok(true)
        }

        async fn get_account_metrics(&self) -> Result<AccountMetrics> {
            Ok(AccountMetrics::default())
        }

        async fn get_market_info(&self, asset: &str) -> Result<MarketInfo> {
            Ok(MarketInfo {
                symbol: asset.to_string(),
                min_order_size: 0.0001,
                price_precision: 2,
                size_precision: 5,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn status(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    /// 记录断开顺序的模拟行情源
    struct RecordingFeed {
        calls: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl MarketDataFeed for RecordingFeed {
        async fn connect(&self) -> Result<()> {
            self.calls.lock().unwrap().push("feed.connect".to_string());
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push("feed.disconnect".to_string());
            Ok(())
        }

        async fn subscribe_price_updates(
            &self,
            _asset: &str,
            _callback: crate::exchanges::PriceCallback,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_latest_price(&self, _asset: &str) -> Option<f64> {
            None
        }

        fn is_running(&self) -> bool {
            true
        }

        async fn status(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    /// 记录stop调用的模拟策略
    struct RecordingStrategy {
        calls: Arc<StdMutex<Vec<String>>>,
        active: bool,
    }

    impl Strategy for RecordingStrategy {
        fn name(&self) -> &str {
            "mock"
        }

        fn generate_signals(
            &mut self,
            _market_data: &MarketData,
            _positions: &[Position],
            _balance: f64,
        ) -> Result<Vec<TradingSignal>> {
            Ok(Vec::new())
        }

        fn on_trade_executed(
            &mut self,
            _signal: &TradingSignal,
            _executed_price: f64,
            _executed_size: f64,
        ) {
        }

        fn is_active(&self) -> bool {
            self.active
        }

        fn set_active(&mut self, active: bool) {
            if !active {
                self.calls.lock().unwrap().push("strategy.stop".to_string());
            }
            self.active = active;
        }

        fn get_status(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn sample_config() -> BotConfig {
        serde_yaml::from_str(
            r#"
name: test-engine
exchange:
  kind: hyperliquid
strategy:
  kind: basic_grid
  symbol: BTC
"#,
        )
        .unwrap()
    }

    fn build_engine(
        config: BotConfig,
        calls: &Arc<StdMutex<Vec<String>>>,
        exchange: RecordingExchange,
    ) -> Arc<TradingEngine> {
        TradingEngine::with_components(
            config,
            Arc::new(exchange),
            Arc::new(RecordingFeed {
                calls: Arc::clone(calls),
            }),
            Box::new(RecordingStrategy {
                calls: Arc::clone(calls),
                active: true,
            }),
            None,
        )
    }

    fn index_of(calls: &[String], name: &str) -> usize {
        calls
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("未记录调用 {}: {:?}", name, calls))
    }

    #[tokio::test]
    async fn test_shutdown_ordering() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let engine = build_engine(
            sample_config(),
            &calls,
            RecordingExchange::new(Arc::clone(&calls)),
        );
        engine.connect().await.unwrap();
        engine.stop().await;

        let calls = calls.lock().unwrap();
        let stop = index_of(&calls, "strategy.stop");
        let cancel = index_of(&calls, "cancel_all_orders");
        let feed = index_of(&calls, "feed.disconnect");
        let exchange = index_of(&calls, "exchange.disconnect");
        assert!(stop < cancel, "策略应先于撤单停止: {:?}", calls);
        assert!(cancel < feed, "撤单应先于断开行情: {:?}", calls);
        assert!(feed < exchange, "行情应先于交易所断开: {:?}", calls);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let engine = build_engine(
            sample_config(),
            &calls,
            RecordingExchange::new(Arc::clone(&calls)),
        );
        engine.connect().await.unwrap();
        engine.stop().await;
        engine.stop().await;

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls.iter().filter(|c| *c == "cancel_all_orders").count(),
            1
        );
        assert_eq!(
            calls.iter().filter(|c| *c == "exchange.disconnect").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_close_positions_on_exit() {
        let mut config = sample_config();
        config.engine.close_positions_on_exit = true;

        let calls = Arc::new(StdMutex::new(Vec::new()));
        let exchange = RecordingExchange::new(Arc::clone(&calls)).with_position("BTC", 1.0);
        let engine = build_engine(config, &calls, exchange);
        engine.connect().await.unwrap();
        engine.stop().await;

        let calls = calls.lock().unwrap();
        let close = index_of(&calls, "close_position:BTC");
        let cancel = index_of(&calls, "cancel_all_orders");
        assert!(close < cancel);
    }

    #[tokio::test]
    async fn test_default_exit_leaves_positions() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let exchange = RecordingExchange::new(Arc::clone(&calls)).with_position("BTC", 1.0);
        let engine = build_engine(sample_config(), &calls, exchange);
        engine.connect().await.unwrap();
        engine.stop().await;

        let calls = calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.starts_with("close_position")));
    }

    fn risk_event(action: RiskAction, asset: &str) -> RiskEvent {
        RiskEvent::new(
            "test_rule",
            asset,
            action,
            "测试事件",
            RiskSeverity::High,
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn test_risk_dispatch_close_position() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let engine = build_engine(
            sample_config(),
            &calls,
            RecordingExchange::new(Arc::clone(&calls)),
        );
        engine
            .execute_risk_action(&risk_event(RiskAction::ClosePosition, "BTC"))
            .await
            .unwrap();
        assert!(calls
            .lock()
            .unwrap()
            .contains(&"close_position:BTC".to_string()));
    }

    #[tokio::test]
    async fn test_risk_dispatch_reduce_is_half() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let exchange = RecordingExchange::new(Arc::clone(&calls)).with_position("BTC", 2.0);
        let engine = build_engine(sample_config(), &calls, exchange);
        engine
            .execute_risk_action(&risk_event(RiskAction::ReducePosition, "BTC"))
            .await
            .unwrap();
        assert!(calls
            .lock()
            .unwrap()
            .contains(&"close_position:BTC:1".to_string()));
    }

    #[tokio::test]
    async fn test_risk_dispatch_emergency_exit() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let exchange = RecordingExchange::new(Arc::clone(&calls))
            .with_position("BTC", 1.0)
            .with_position("ETH", -2.0);
        let engine = build_engine(sample_config(), &calls, exchange);
        engine
            .execute_risk_action(&risk_event(RiskAction::EmergencyExit, "ACCOUNT"))
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"close_position:BTC".to_string()));
        assert!(calls.contains(&"close_position:ETH".to_string()));
        assert!(calls.contains(&"cancel_all_orders".to_string()));
        // 策略被暂停
        assert!(calls.contains(&"strategy.stop".to_string()));
    }

    #[tokio::test]
    async fn test_stale_order_eviction() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let engine = build_engine(
            sample_config(),
            &calls,
            RecordingExchange::new(Arc::clone(&calls)),
        );

        let fresh = Order::new(
            "fresh".to_string(),
            "BTC".to_string(),
            OrderSide::Buy,
            1.0,
            Some(100.0),
        );
        let mut stale = Order::new(
            "stale".to_string(),
            "BTC".to_string(),
            OrderSide::Buy,
            1.0,
            Some(100.0),
        );
        stale.created_at = Utc::now() - Duration::hours(2);

        {
            let mut orders = engine.pending_orders.write().await;
            orders.insert(fresh.id.clone(), fresh);
            orders.insert(stale.id.clone(), stale);
        }

        engine.evict_stale_orders().await;

        let orders = engine.pending_orders.read().await;
        assert!(orders.contains_key("fresh"));
        assert!(!orders.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_run_requires_initialized() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let engine = build_engine(
            sample_config(),
            &calls,
            RecordingExchange::new(Arc::clone(&calls)),
        );
        // 未connect直接run应失败
        assert!(Arc::clone(&engine).run().await.is_err());
    }
}
