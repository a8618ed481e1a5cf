use crate::core::config::StrategySection;
use crate::core::types::{MarketData, Position, Result, SignalType, TradingSignal};
use crate::strategies::Strategy;
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============= 网格模型 =============

/// 网格状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GridState {
    Initializing,
    Active,
    Rebalancing,
}

impl GridState {
    fn as_str(&self) -> &'static str {
        match self {
            GridState::Initializing => "initializing",
            GridState::Active => "active",
            GridState::Rebalancing => "rebalancing",
        }
    }
}

/// 单个网格层级
#[derive(Debug, Clone, Serialize)]
pub struct GridLevel {
    pub price: f64,
    pub size: f64,
    pub level_index: usize,
    /// true为买入层级（低于生成时价格）
    pub is_buy_level: bool,
    pub is_filled: bool,
}

/// 网格参数
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub symbol: String,
    pub levels: usize,
    pub range_pct: f64,
    pub total_allocation: f64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub rebalance_threshold_pct: f64,
}

/// 几何间距网格层级生成
///
/// ratio = (max/min)^(1/(levels-1))，相邻层级涨跌幅相同。
/// 每层分配 total_allocation/levels 美元，换算成币数量。
fn create_grid_levels(
    min_price: f64,
    max_price: f64,
    current_price: f64,
    num_levels: usize,
    total_allocation: f64,
) -> Vec<GridLevel> {
    // 少于2层无法构成区间，配置校验之外的直接调用也不允许
    if num_levels < 2 {
        log::warn!("⚠️ 网格层数无效: {}", num_levels);
        return Vec::new();
    }

    let size_per_level_usd = total_allocation / num_levels as f64;
    let price_ratio = (max_price / min_price).powf(1.0 / (num_levels - 1) as f64);

    (0..num_levels)
        .map(|i| {
            let price = min_price * price_ratio.powi(i as i32);
            GridLevel {
                price,
                size: size_per_level_usd / price,
                level_index: i,
                is_buy_level: price < current_price,
                is_filled: false,
            }
        })
        .collect()
}

// ============= 网格策略 =============

/// 基础网格交易策略
///
/// 在当前价格上下按固定百分比间隔挂买卖单：
/// 买单在当前价下方，卖单在上方。价格偏离中心
/// 超过阈值时撤掉全部订单并围绕新价格重建网格。
/// 适合震荡行情。
pub struct GridStrategy {
    config: GridConfig,
    state: GridState,
    center_price: Option<f64>,
    grid_levels: Vec<GridLevel>,
    last_rebalance: Option<DateTime<Utc>>,
    total_trades: u64,
    total_profit: f64,
    active: bool,
}

impl GridStrategy {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            state: GridState::Initializing,
            center_price: None,
            grid_levels: Vec::new(),
            last_rebalance: None,
            total_trades: 0,
            total_profit: 0.0,
            active: false,
        }
    }

    pub fn from_config(section: &StrategySection) -> Self {
        Self::new(GridConfig {
            symbol: section.symbol.clone(),
            levels: section.levels,
            range_pct: section.range_pct,
            total_allocation: section.total_allocation,
            min_price: section.min_price,
            max_price: section.max_price,
            rebalance_threshold_pct: section.rebalance_threshold_pct,
        })
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn grid_levels(&self) -> &[GridLevel] {
        &self.grid_levels
    }

    /// 围绕当前价格初始化网格并生成初始挂单信号
    fn initialize_grid(&mut self, current_price: f64) -> Vec<TradingSignal> {
        self.center_price = Some(current_price);

        let (min_price, max_price) = match (self.config.min_price, self.config.max_price) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                let range = current_price * (self.config.range_pct / 100.0);
                (current_price - range, current_price + range)
            }
        };

        self.grid_levels = create_grid_levels(
            min_price,
            max_price,
            current_price,
            self.config.levels,
            self.config.total_allocation,
        );

        let mut signals = Vec::new();
        for level in &self.grid_levels {
            if level.is_buy_level && level.price < current_price {
                signals.push(
                    TradingSignal::new(SignalType::Buy, &self.config.symbol, level.size)
                        .with_price(level.price)
                        .with_reason(format!("网格买入层级 ${:.2}", level.price))
                        .with_meta("level_index", serde_json::json!(level.level_index))
                        .with_meta("grid_type", serde_json::json!("initial")),
                );
            } else if !level.is_buy_level && level.price > current_price {
                signals.push(
                    TradingSignal::new(SignalType::Sell, &self.config.symbol, level.size)
                        .with_price(level.price)
                        .with_reason(format!("网格卖出层级 ${:.2}", level.price))
                        .with_meta("level_index", serde_json::json!(level.level_index))
                        .with_meta("grid_type", serde_json::json!("initial")),
                );
            }
        }

        self.state = GridState::Active;
        signals
    }

    /// 价格偏离中心超过阈值时触发再平衡
    fn should_rebalance(&self, current_price: f64) -> bool {
        match self.center_price {
            Some(center) if center > 0.0 => {
                let move_pct = (current_price - center).abs() / center * 100.0;
                move_pct > self.config.rebalance_threshold_pct
            }
            _ => false,
        }
    }

    /// 撤掉全部订单并围绕新价格重建网格
    fn rebalance_grid(&mut self, current_price: f64) -> Vec<TradingSignal> {
        self.state = GridState::Rebalancing;
        log::info!(
            "🔄 网格再平衡: 中心 {:.2} -> {:.2}",
            self.center_price.unwrap_or(0.0),
            current_price
        );

        let mut signals = vec![TradingSignal::new(
            SignalType::Close,
            &self.config.symbol,
            0.0,
        )
        .with_reason("网格再平衡")
        .with_meta("action", serde_json::json!("cancel_all"))];

        self.state = GridState::Initializing;
        signals.extend(self.initialize_grid(current_price));
        self.last_rebalance = Some(Utc::now());

        signals
    }
}

impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        "basic_grid"
    }

    fn generate_signals(
        &mut self,
        market_data: &MarketData,
        _positions: &[Position],
        _balance: f64,
    ) -> Result<Vec<TradingSignal>> {
        if !self.active {
            return Ok(Vec::new());
        }

        let current_price = market_data.price;

        let signals = match self.state {
            GridState::Initializing => self.initialize_grid(current_price),
            GridState::Active if self.should_rebalance(current_price) => {
                self.rebalance_grid(current_price)
            }
            _ => Vec::new(),
        };

        Ok(signals)
    }

    fn on_trade_executed(
        &mut self,
        signal: &TradingSignal,
        executed_price: f64,
        executed_size: f64,
    ) {
        self.total_trades += 1;

        let level_index = signal
            .metadata
            .get("level_index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        if let Some(index) = level_index {
            if let Some(level) = self.grid_levels.get_mut(index) {
                level.is_filled = true;

                // 粗略盈利估算：假设对应买入价低1%
                if signal.signal_type == SignalType::Sell {
                    let buy_price = executed_price * 0.99;
                    self.total_profit += (executed_price - buy_price) * executed_size;
                }
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn get_status(&self) -> serde_json::Value {
        let filled = self.grid_levels.iter().filter(|l| l.is_filled).count();
        serde_json::json!({
            "name": self.name(),
            "active": self.active,
            "state": self.state.as_str(),
            "center_price": self.center_price,
            "total_levels": self.grid_levels.len(),
            "active_levels": self.grid_levels.len() - filled,
            "filled_levels": filled,
            "total_trades": self.total_trades,
            "total_profit": self.total_profit,
            "last_rebalance": self.last_rebalance,
            "config": {
                "symbol": self.config.symbol,
                "levels": self.config.levels,
                "range_pct": self.config.range_pct,
                "total_allocation": self.config.total_allocation,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(price: f64) -> MarketData {
        MarketData {
            asset: "BTC".to_string(),
            price,
            volume_24h: 0.0,
            timestamp: Utc::now(),
        }
    }

    fn strategy(levels: usize, min: f64, max: f64, threshold: f64) -> GridStrategy {
        let mut s = GridStrategy::new(GridConfig {
            symbol: "BTC".to_string(),
            levels,
            range_pct: 10.0,
            total_allocation: 1000.0,
            min_price: Some(min),
            max_price: Some(max),
            rebalance_threshold_pct: threshold,
        });
        s.start();
        s
    }

    #[test]
    fn test_level_count_and_endpoints() {
        let levels = create_grid_levels(90000.0, 110000.0, 100000.0, 5, 1000.0);

        assert_eq!(levels.len(), 5);
        assert!((levels[0].price - 90000.0).abs() < 1e-6);
        assert!((levels[4].price - 110000.0).abs() < 1e-6);

        // 层级价格严格递增，间隔比例恒定
        let ratio = (110000.0f64 / 90000.0).powf(0.25);
        for pair in levels.windows(2) {
            assert!(pair[1].price > pair[0].price);
            assert!((pair[1].price / pair[0].price - ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_degenerate_level_count_yields_empty_grid() {
        assert!(create_grid_levels(90000.0, 110000.0, 100000.0, 0, 1000.0).is_empty());
        assert!(create_grid_levels(90000.0, 110000.0, 100000.0, 1, 1000.0).is_empty());
    }

    #[test]
    fn test_buy_sell_classification() {
        let levels = create_grid_levels(90000.0, 110000.0, 100000.0, 5, 1000.0);
        for level in &levels {
            assert_eq!(level.is_buy_level, level.price < 100000.0);
        }
        // 每层美元分配相同
        for level in &levels {
            assert!((level.size * level.price - 200.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_initial_signals_have_level_metadata() {
        let mut s = strategy(5, 90000.0, 110000.0, 15.0);
        let signals = s.generate_signals(&market(100000.0), &[], 1000.0).unwrap();

        assert_eq!(s.state(), GridState::Active);
        assert!(!signals.is_empty());
        for signal in &signals {
            assert!(signal.price.is_some());
            assert!(signal.metadata.contains_key("level_index"));
            match signal.signal_type {
                SignalType::Buy => assert!(signal.price.unwrap() < 100000.0),
                SignalType::Sell => assert!(signal.price.unwrap() > 100000.0),
                other => panic!("初始信号不应出现 {:?}", other),
            }
        }
    }

    #[test]
    fn test_rebalance_threshold_is_strict() {
        let mut s = strategy(5, 90000.0, 110000.0, 15.0);
        s.generate_signals(&market(100000.0), &[], 1000.0).unwrap();

        // 偏离14% 不触发
        let signals = s.generate_signals(&market(114000.0), &[], 1000.0).unwrap();
        assert!(signals.is_empty());
        assert_eq!(s.state(), GridState::Active);

        // 偏离16% 触发：先撤单再重建
        let signals = s.generate_signals(&market(116000.0), &[], 1000.0).unwrap();
        assert!(!signals.is_empty());
        assert_eq!(signals[0].signal_type, SignalType::Close);
        assert_eq!(
            signals[0].metadata.get("action"),
            Some(&serde_json::json!("cancel_all"))
        );
        // 新中心价生效
        assert_eq!(s.center_price, Some(116000.0));
        assert_eq!(s.state(), GridState::Active);
    }

    #[test]
    fn test_inactive_strategy_is_silent() {
        let mut s = strategy(5, 90000.0, 110000.0, 15.0);
        s.stop();
        let signals = s.generate_signals(&market(100000.0), &[], 1000.0).unwrap();
        assert!(signals.is_empty());
        // stop只翻转活跃标志
        assert_eq!(s.state(), GridState::Initializing);
    }

    #[test]
    fn test_fill_marks_level_and_estimates_profit() {
        let mut s = strategy(5, 90000.0, 110000.0, 15.0);
        s.generate_signals(&market(100000.0), &[], 1000.0).unwrap();

        let sell = TradingSignal::new(SignalType::Sell, "BTC", 0.002)
            .with_price(105000.0)
            .with_meta("level_index", serde_json::json!(3));
        s.on_trade_executed(&sell, 105000.0, 0.002);

        assert!(s.grid_levels()[3].is_filled);
        assert_eq!(s.total_trades, 1);
        // 卖出成交按1%价差估算利润
        let expected = 105000.0 * 0.01 * 0.002;
        assert!((s.total_profit - expected).abs() < 1e-9);

        // 买入成交只标记层级，不计利润
        let buy = TradingSignal::new(SignalType::Buy, "BTC", 0.002)
            .with_price(95000.0)
            .with_meta("level_index", serde_json::json!(1));
        s.on_trade_executed(&buy, 95000.0, 0.002);
        assert!(s.grid_levels()[1].is_filled);
        assert!((s.total_profit - expected).abs() < 1e-9);
    }

    #[test]
    fn test_auto_range_from_range_pct() {
        let mut s = GridStrategy::new(GridConfig {
            symbol: "BTC".to_string(),
            levels: 5,
            range_pct: 10.0,
            total_allocation: 1000.0,
            min_price: None,
            max_price: None,
            rebalance_threshold_pct: 15.0,
        });
        s.start();
        s.generate_signals(&market(100000.0), &[], 1000.0).unwrap();

        let levels = s.grid_levels();
        assert!((levels[0].price - 90000.0).abs() < 1e-6);
        assert!((levels[4].price - 110000.0).abs() < 1e-6);
    }
}
