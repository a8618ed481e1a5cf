use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("YAML配置错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("未知操作: {0}")]
    UnknownOperation(String),

    #[error("无可用端点: {0}")]
    NoHealthyEndpoint(String),

    #[error("交易所错误: {0}")]
    ExchangeError(String),

    #[error("风险规则错误: {rule} - {reason}")]
    RiskRuleError { rule: String, reason: String },

    #[error("策略错误: {0}")]
    StrategyError(String),

    #[error("订单错误: {0}")]
    OrderError(String),

    #[error("WebSocket错误: {0}")]
    WebSocketError(String),

    #[error("数据解析错误: {0}")]
    ParseError(String),

    #[error("不支持的功能: {0}")]
    NotSupported(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl TradingError {
    /// 判断错误是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TradingError::NetworkError(_) => true,
            TradingError::WebSocketError(_) => true,
            TradingError::NoHealthyEndpoint(_) => true,
            _ => false,
        }
    }
}
