use crate::core::config::RiskSection;
use crate::core::types::{AccountMetrics, MarketData, Position, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// 风险事件历史的最大长度，超过后淘汰最旧事件
const EVENT_HISTORY_CAPACITY: usize = 1000;

// ============= 风险事件 =============

/// 违反风险规则时采取的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskAction {
    None,
    ClosePosition,
    ReducePosition,
    CancelOrders,
    PauseTrading,
    EmergencyExit,
}

/// 风险事件严重等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 风险事件通知
#[derive(Debug, Clone, Serialize)]
pub struct RiskEvent {
    pub rule_name: String,
    pub asset: String,
    pub action: RiskAction,
    pub reason: String,
    pub severity: RiskSeverity,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RiskEvent {
    pub fn new(
        rule_name: impl Into<String>,
        asset: impl Into<String>,
        action: RiskAction,
        reason: impl Into<String>,
        severity: RiskSeverity,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            asset: asset.into(),
            action,
            reason: reason.into(),
            severity,
            metadata,
            timestamp: Utc::now(),
        }
    }
}

// ============= 风险规则 =============

/// 风险规则接口
///
/// 每个规则实现一项独立的风险检查（如止损、回撤），
/// 违规时返回风险事件。规则之间互不影响。
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        positions: &[Position],
        market_data: &HashMap<String, MarketData>,
        metrics: &AccountMetrics,
    ) -> Result<Vec<RiskEvent>>;
}

/// 止损规则 - 损失超过阈值时平仓
pub struct StopLossRule {
    pub loss_pct: f64,
}

impl RiskRule for StopLossRule {
    fn name(&self) -> &str {
        "stop_loss"
    }

    fn evaluate(
        &self,
        positions: &[Position],
        _market_data: &HashMap<String, MarketData>,
        _metrics: &AccountMetrics,
    ) -> Result<Vec<RiskEvent>> {
        let mut events = Vec::new();

        for position in positions {
            if position.entry_price <= 0.0 {
                continue;
            }
            let loss_pct = (position.unrealized_pnl
                / (position.entry_price * position.size.abs()))
            .abs()
                * 100.0;

            if loss_pct >= self.loss_pct {
                let metadata = HashMap::from([
                    ("position_size".to_string(), serde_json::json!(position.size)),
                    (
                        "entry_price".to_string(),
                        serde_json::json!(position.entry_price),
                    ),
                    ("current_loss_pct".to_string(), serde_json::json!(loss_pct)),
                    ("threshold_pct".to_string(), serde_json::json!(self.loss_pct)),
                    (
                        "unrealized_pnl".to_string(),
                        serde_json::json!(position.unrealized_pnl),
                    ),
                ]);
                events.push(RiskEvent::new(
                    self.name(),
                    &position.asset,
                    RiskAction::ClosePosition,
                    format!(
                        "止损触发: 亏损 {:.2}% 超过阈值 {}%",
                        loss_pct, self.loss_pct
                    ),
                    RiskSeverity::High,
                    metadata,
                ));
            }
        }

        Ok(events)
    }
}

/// 止盈规则 - 盈利超过阈值时平仓
pub struct TakeProfitRule {
    pub profit_pct: f64,
}

impl RiskRule for TakeProfitRule {
    fn name(&self) -> &str {
        "take_profit"
    }

    fn evaluate(
        &self,
        positions: &[Position],
        _market_data: &HashMap<String, MarketData>,
        _metrics: &AccountMetrics,
    ) -> Result<Vec<RiskEvent>> {
        let mut events = Vec::new();

        for position in positions {
            // 只对盈利持仓生效
            if position.entry_price <= 0.0 || position.unrealized_pnl <= 0.0 {
                continue;
            }
            let profit_pct =
                position.unrealized_pnl / (position.entry_price * position.size.abs()) * 100.0;

            if profit_pct >= self.profit_pct {
                let metadata = HashMap::from([
                    ("position_size".to_string(), serde_json::json!(position.size)),
                    (
                        "entry_price".to_string(),
                        serde_json::json!(position.entry_price),
                    ),
                    (
                        "current_profit_pct".to_string(),
                        serde_json::json!(profit_pct),
                    ),
                    (
                        "threshold_pct".to_string(),
                        serde_json::json!(self.profit_pct),
                    ),
                    (
                        "unrealized_pnl".to_string(),
                        serde_json::json!(position.unrealized_pnl),
                    ),
                ]);
                events.push(RiskEvent::new(
                    self.name(),
                    &position.asset,
                    RiskAction::ClosePosition,
                    format!(
                        "止盈触发: 盈利 {:.2}% 超过阈值 {}%",
                        profit_pct, self.profit_pct
                    ),
                    RiskSeverity::Medium,
                    metadata,
                ));
            }
        }

        Ok(events)
    }
}

/// 回撤规则 - 账户回撤超过阈值时紧急退出
pub struct DrawdownRule {
    pub max_drawdown_pct: f64,
}

impl RiskRule for DrawdownRule {
    fn name(&self) -> &str {
        "max_drawdown"
    }

    fn evaluate(
        &self,
        _positions: &[Position],
        _market_data: &HashMap<String, MarketData>,
        metrics: &AccountMetrics,
    ) -> Result<Vec<RiskEvent>> {
        if metrics.drawdown_pct < self.max_drawdown_pct {
            return Ok(Vec::new());
        }

        // 账户级别规则，无论持仓数量只产生一个事件
        let metadata = HashMap::from([
            (
                "current_drawdown_pct".to_string(),
                serde_json::json!(metrics.drawdown_pct),
            ),
            (
                "max_drawdown_pct".to_string(),
                serde_json::json!(self.max_drawdown_pct),
            ),
            ("total_pnl".to_string(), serde_json::json!(metrics.total_pnl)),
            (
                "account_value".to_string(),
                serde_json::json!(metrics.total_value),
            ),
        ]);
        Ok(vec![RiskEvent::new(
            self.name(),
            "ACCOUNT",
            RiskAction::EmergencyExit,
            format!(
                "超过最大回撤: {:.2}% >= {}%",
                metrics.drawdown_pct, self.max_drawdown_pct
            ),
            RiskSeverity::Critical,
            metadata,
        )])
    }
}

/// 仓位大小规则 - 防止单个持仓占比过大
pub struct PositionSizeRule {
    pub max_position_size_pct: f64,
}

impl RiskRule for PositionSizeRule {
    fn name(&self) -> &str {
        "max_position_size"
    }

    fn evaluate(
        &self,
        positions: &[Position],
        _market_data: &HashMap<String, MarketData>,
        metrics: &AccountMetrics,
    ) -> Result<Vec<RiskEvent>> {
        let mut events = Vec::new();

        if metrics.total_value <= 0.0 {
            return Ok(events);
        }

        for position in positions {
            let position_pct = position.current_value / metrics.total_value * 100.0;

            if position_pct >= self.max_position_size_pct {
                let metadata = HashMap::from([
                    (
                        "position_value".to_string(),
                        serde_json::json!(position.current_value),
                    ),
                    (
                        "account_value".to_string(),
                        serde_json::json!(metrics.total_value),
                    ),
                    ("position_pct".to_string(), serde_json::json!(position_pct)),
                    (
                        "max_position_pct".to_string(),
                        serde_json::json!(self.max_position_size_pct),
                    ),
                    (
                        "suggested_reduction".to_string(),
                        serde_json::json!(position_pct - self.max_position_size_pct),
                    ),
                ]);
                events.push(RiskEvent::new(
                    self.name(),
                    &position.asset,
                    RiskAction::ReducePosition,
                    format!(
                        "仓位过大: {:.2}% >= {}%",
                        position_pct, self.max_position_size_pct
                    ),
                    RiskSeverity::Medium,
                    metadata,
                ));
            }
        }

        Ok(events)
    }
}

// ============= 风险管理器 =============

/// 风险管理器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct RiskManagerStatus {
    pub enabled_rules: Vec<String>,
    pub disabled_rules: Vec<String>,
    pub total_rules: usize,
    pub recent_events: usize,
}

/// 风险管理编排器
///
/// 协调多个风险规则并提供统一的评估入口。
/// 单条规则出错不影响其他规则，错误以合成事件的形式返回。
pub struct RiskManager {
    rules: Vec<Box<dyn RiskRule>>,
    history: VecDeque<RiskEvent>,
}

impl RiskManager {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            history: VecDeque::new(),
        }
    }

    /// 按配置构建规则列表
    ///
    /// 止损/止盈规则受开关控制，回撤和仓位规则始终启用
    pub fn from_config(config: &RiskSection) -> Self {
        let mut manager = Self::new();

        if config.stop_loss_enabled {
            manager.add_rule(Box::new(StopLossRule {
                loss_pct: config.stop_loss_pct,
            }));
        }
        if config.take_profit_enabled {
            manager.add_rule(Box::new(TakeProfitRule {
                profit_pct: config.take_profit_pct,
            }));
        }
        manager.add_rule(Box::new(DrawdownRule {
            max_drawdown_pct: config.max_drawdown_pct,
        }));
        manager.add_rule(Box::new(PositionSizeRule {
            max_position_size_pct: config.max_position_size_pct,
        }));

        manager
    }

    /// 添加自定义风险规则
    pub fn add_rule(&mut self, rule: Box<dyn RiskRule>) {
        self.rules.push(rule);
    }

    /// 评估所有启用规则并返回合并事件
    pub fn evaluate(
        &mut self,
        positions: &[Position],
        market_data: &HashMap<String, MarketData>,
        metrics: &AccountMetrics,
    ) -> Vec<RiskEvent> {
        let mut all_events = Vec::new();

        for rule in &self.rules {
            if !rule.enabled() {
                continue;
            }
            match rule.evaluate(positions, market_data, metrics) {
                Ok(events) => all_events.extend(events),
                Err(e) => {
                    // 规则出错不能中断整批评估
                    log::error!("风险规则 {} 评估失败: {}", rule.name(), e);
                    let metadata =
                        HashMap::from([("error".to_string(), serde_json::json!(e.to_string()))]);
                    all_events.push(RiskEvent::new(
                        rule.name(),
                        "SYSTEM",
                        RiskAction::None,
                        format!("{} 评估失败: {}", rule.name(), e),
                        RiskSeverity::Low,
                        metadata,
                    ));
                }
            }
        }

        for event in &all_events {
            if self.history.len() >= EVENT_HISTORY_CAPACITY {
                self.history.pop_front();
            }
            self.history.push_back(event.clone());
        }

        all_events
    }

    /// 获取最近N小时内的风险事件
    pub fn recent_events(&self, hours: i64) -> Vec<&RiskEvent> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.history
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect()
    }

    pub fn status(&self) -> RiskManagerStatus {
        RiskManagerStatus {
            enabled_rules: self
                .rules
                .iter()
                .filter(|r| r.enabled())
                .map(|r| r.name().to_string())
                .collect(),
            disabled_rules: self
                .rules
                .iter()
                .filter(|r| !r.enabled())
                .map(|r| r.name().to_string())
                .collect(),
            total_rules: self.rules.len(),
            recent_events: self.recent_events(1).len(),
        }
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new()
    }
}
