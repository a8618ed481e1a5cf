use crate::core::error::TradingError;
use crate::core::types::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ============= 端点分类 =============

/// 端点能力类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapabilityType {
    /// 只读数据（行情、账户信息）
    Info,
    /// 交易操作（下单/撤单）
    Exchange,
    /// 实时数据流
    WebSocket,
    /// HyperEVM JSON-RPC
    Evm,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::Info => "info",
            CapabilityType::Exchange => "exchange",
            CapabilityType::WebSocket => "websocket",
            CapabilityType::Evm => "evm",
        }
    }
}

/// 端点提供商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provider {
    Public,
    Chainstack,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Public => "public",
            Provider::Chainstack => "chainstack",
        }
    }
}

/// 操作 -> 兼容端点类型的静态矩阵
fn compatible_capabilities(operation: &str) -> Option<&'static [CapabilityType]> {
    use CapabilityType::*;

    const INFO: &[CapabilityType] = &[Info];
    const EXCHANGE: &[CapabilityType] = &[Exchange];
    const WS: &[CapabilityType] = &[WebSocket];
    const EVM: &[CapabilityType] = &[Evm];

    match operation {
        // Info API
        "all_mids" | "user_state" | "open_orders" | "meta" | "candles" | "spot_meta"
        | "user_fills" | "user_rate_limits" => Some(INFO),
        // Exchange API（需要签名，只能走公共端点）
        "place_order" | "cancel_order" | "modify_order" | "update_leverage" | "transfer"
        | "withdraw" => Some(EXCHANGE),
        // HyperEVM
        "eth_getBalance" | "eth_call" | "eth_blockNumber" | "eth_getLogs"
        | "eth_getBlockByNumber" | "eth_getTransactionReceipt" => Some(EVM),
        // WebSocket订阅
        "subscribe_price" | "subscribe_fills" | "subscribe_orders" => Some(WS),
        _ => None,
    }
}

/// 每种端点类型的提供商偏好（排在前面的优先）
fn provider_priorities(capability: CapabilityType) -> &'static [Provider] {
    match capability {
        // 数据读取优先走Chainstack，公共端点有速率限制
        CapabilityType::Info => &[Provider::Chainstack, Provider::Public],
        // 交易必须走公共端点
        CapabilityType::Exchange => &[Provider::Public],
        CapabilityType::Evm => &[Provider::Chainstack, Provider::Public],
        CapabilityType::WebSocket => &[Provider::Chainstack, Provider::Public],
    }
}

// ============= 端点与健康状态 =============

/// 端点健康状态，两个字段始终在同一次写锁内更新
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
}

/// 单个端点配置
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    pub provider: Provider,
    pub capability: CapabilityType,
    pub priority: u32,
    health: RwLock<EndpointHealth>,
}

impl Endpoint {
    pub fn new(
        url: impl Into<String>,
        provider: Provider,
        capability: CapabilityType,
        priority: u32,
    ) -> Self {
        Self {
            url: url.into(),
            provider,
            capability,
            priority,
            health: RwLock::new(EndpointHealth {
                is_healthy: true,
                last_check: None,
            }),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.health.read().await.is_healthy
    }

    /// 更新健康状态并记录检查时间
    pub async fn set_healthy(&self, healthy: bool) {
        let mut health = self.health.write().await;
        health.is_healthy = healthy;
        health.last_check = Some(Utc::now());
    }

    async fn last_check(&self) -> Option<DateTime<Utc>> {
        self.health.read().await.last_check
    }
}

/// 端点状态快照，用于运维展示
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub provider: &'static str,
    pub capability: &'static str,
    pub url: String,
    pub priority: u32,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
}

/// 路由器整体状态
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub testnet: bool,
    pub endpoints: Vec<EndpointStatus>,
}

// ============= 路由器 =============

/// Hyperliquid端点路由器
///
/// 按操作名在兼容性矩阵中查找端点类型，结合提供商偏好和
/// 实时健康状态选出最佳URL。健康监控在首次解析时懒启动。
/// 实例通过构造注入，不使用全局单例。
pub struct EndpointRouter {
    testnet: bool,
    endpoints: Vec<Arc<Endpoint>>,
    health_interval: Duration,
    health_timeout: Duration,
    monitor_started: AtomicBool,
    client: reqwest::Client,
}

impl EndpointRouter {
    pub fn new(testnet: bool, endpoints: Vec<Endpoint>) -> Self {
        Self {
            testnet,
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            health_interval: Duration::from_secs(300),
            health_timeout: Duration::from_secs(10),
            monitor_started: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    /// 从环境变量加载端点配置，未配置时回退到公共默认端点
    pub fn from_env(testnet: bool) -> Self {
        let mut endpoints = load_endpoints_from_env(testnet);

        if endpoints.is_empty() {
            log::warn!("⚠️ 未配置任何端点，使用公共默认端点");
            endpoints = default_endpoints(testnet);
        }

        let mut router = Self::new(testnet, endpoints);
        router.health_interval = Duration::from_secs(env_u64("ENDPOINT_HEALTH_CHECK_INTERVAL", 300));
        router.health_timeout = Duration::from_secs(env_u64("ENDPOINT_HEALTH_CHECK_TIMEOUT", 10));
        router
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// 解析操作对应的最佳端点URL
    ///
    /// 只读取最近一次健康检查的结果，从不同步探测
    pub async fn resolve(&self, operation: &str) -> Result<String> {
        self.ensure_health_monitoring();

        let capabilities = compatible_capabilities(operation)
            .ok_or_else(|| TradingError::UnknownOperation(operation.to_string()))?;

        for &capability in capabilities {
            if let Some(endpoint) = self.best_endpoint(capability).await {
                log::debug!(
                    "路由 {} -> {} {}",
                    operation,
                    endpoint.provider.as_str(),
                    endpoint.capability.as_str()
                );
                return Ok(endpoint.url.clone());
            }
        }

        Err(TradingError::NoHealthyEndpoint(operation.to_string()))
    }

    /// 选出指定类型的最佳端点：优先健康端点，全部不健康时降级使用
    async fn best_endpoint(&self, capability: CapabilityType) -> Option<Arc<Endpoint>> {
        let mut candidates = Vec::new();
        for ep in &self.endpoints {
            if ep.capability == capability && ep.is_healthy().await {
                candidates.push(Arc::clone(ep));
            }
        }

        if candidates.is_empty() {
            for ep in &self.endpoints {
                if ep.capability == capability {
                    candidates.push(Arc::clone(ep));
                }
            }
            if !candidates.is_empty() {
                log::warn!("⚠️ {} 无健康端点，降级使用未知状态端点", capability.as_str());
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let ranks = provider_priorities(capability);
        candidates.sort_by_key(|ep| {
            let provider_rank = ranks
                .iter()
                .position(|p| *p == ep.provider)
                .unwrap_or(usize::MAX);
            (provider_rank, ep.priority)
        });

        candidates.into_iter().next()
    }

    /// 懒启动健康监控后台任务，重复调用为空操作
    pub fn ensure_health_monitoring(&self) {
        if self.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let endpoints: Vec<Arc<Endpoint>> = self.endpoints.clone();
        let client = self.client.clone();
        let interval = self.health_interval;
        let timeout = self.health_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for endpoint in &endpoints {
                    let due = match endpoint.last_check().await {
                        None => true,
                        Some(t) => (Utc::now() - t).num_seconds() >= interval.as_secs() as i64,
                    };
                    if due {
                        check_endpoint_health(&client, endpoint, timeout).await;
                    }
                }
            }
        });

        log::info!("✅ 端点健康监控已启动 (间隔: {}秒)", interval.as_secs());
    }

    pub async fn status(&self) -> RouterStatus {
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for ep in &self.endpoints {
            let health = ep.health.read().await.clone();
            let url = if ep.url.len() > 50 {
                format!("{}...", &ep.url[..50])
            } else {
                ep.url.clone()
            };
            endpoints.push(EndpointStatus {
                provider: ep.provider.as_str(),
                capability: ep.capability.as_str(),
                url,
                priority: ep.priority,
                healthy: health.is_healthy,
                last_check: health.last_check,
            });
        }
        RouterStatus {
            testnet: self.testnet,
            endpoints,
        }
    }
}

/// 探测单个端点，失败只标记不健康，不向外传播
async fn check_endpoint_health(client: &reqwest::Client, endpoint: &Endpoint, timeout: Duration) {
    let result = match endpoint.capability {
        // Exchange端点无法在未签名情况下探测，WebSocket留给连接层处理
        CapabilityType::Exchange | CapabilityType::WebSocket => {
            endpoint.set_healthy(true).await;
            return;
        }
        CapabilityType::Info => {
            client
                .post(&endpoint.url)
                .timeout(timeout)
                .json(&serde_json::json!({"type": "meta"}))
                .send()
                .await
        }
        CapabilityType::Evm => {
            client
                .post(&endpoint.url)
                .timeout(timeout)
                .json(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "eth_blockNumber",
                    "params": [],
                    "id": 1,
                }))
                .send()
                .await
        }
    };

    match result {
        Ok(response) => {
            endpoint.set_healthy(response.status().is_success()).await;
        }
        Err(e) => {
            log::debug!(
                "健康检查失败 {} {}: {}",
                endpoint.provider.as_str(),
                endpoint.capability.as_str(),
                e
            );
            endpoint.set_healthy(false).await;
        }
    }
}

// ============= 环境变量加载 =============

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn load_endpoints_from_env(testnet: bool) -> Vec<Endpoint> {
    let prefix = if testnet {
        "HYPERLIQUID_TESTNET_"
    } else {
        "HYPERLIQUID_"
    };

    let mappings: [(&str, Provider, CapabilityType); 7] = [
        ("PUBLIC_INFO_URL", Provider::Public, CapabilityType::Info),
        ("PUBLIC_EXCHANGE_URL", Provider::Public, CapabilityType::Exchange),
        ("PUBLIC_WS_URL", Provider::Public, CapabilityType::WebSocket),
        ("PUBLIC_EVM_URL", Provider::Public, CapabilityType::Evm),
        ("CHAINSTACK_INFO_URL", Provider::Chainstack, CapabilityType::Info),
        ("CHAINSTACK_EVM_URL", Provider::Chainstack, CapabilityType::Evm),
        ("CHAINSTACK_WS_URL", Provider::Chainstack, CapabilityType::WebSocket),
    ];

    let mut endpoints = Vec::new();
    for (suffix, provider, capability) in mappings {
        let url_key = format!("{}{}", prefix, suffix);
        if let Ok(url) = env::var(&url_key) {
            let priority_key = url_key.replace("_URL", "_PRIORITY");
            let priority = env::var(&priority_key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);

            log::debug!("加载端点 {} {}: {}", provider.as_str(), capability.as_str(), url);
            endpoints.push(Endpoint::new(url, provider, capability, priority));
        }
    }

    endpoints
}

/// 公共默认端点集合
pub fn default_endpoints(testnet: bool) -> Vec<Endpoint> {
    let base = if testnet {
        "api.hyperliquid-testnet.xyz"
    } else {
        "api.hyperliquid.xyz"
    };

    vec![
        Endpoint::new(
            format!("https://{}/info", base),
            Provider::Public,
            CapabilityType::Info,
            5,
        ),
        Endpoint::new(
            format!("https://{}/exchange", base),
            Provider::Public,
            CapabilityType::Exchange,
            5,
        ),
        Endpoint::new(
            format!("wss://{}/ws", base),
            Provider::Public,
            CapabilityType::WebSocket,
            5,
        ),
        Endpoint::new(
            format!("https://{}", base),
            Provider::Public,
            CapabilityType::Evm,
            5,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_pair() -> Vec<Endpoint> {
        vec![
            Endpoint::new(
                "https://public.example/info",
                Provider::Public,
                CapabilityType::Info,
                5,
            ),
            Endpoint::new(
                "https://chainstack.example/info",
                Provider::Chainstack,
                CapabilityType::Info,
                5,
            ),
        ]
    }

    #[tokio::test]
    async fn test_resolve_is_deterministic() {
        let router = EndpointRouter::new(true, info_pair());
        let first = router.resolve("user_state").await.unwrap();
        let second = router.resolve("user_state").await.unwrap();
        assert_eq!(first, second);
        // Info类型偏好Chainstack
        assert_eq!(first, "https://chainstack.example/info");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let router = EndpointRouter::new(true, info_pair());
        let err = router.resolve("no_such_op").await.unwrap_err();
        assert!(matches!(err, TradingError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn test_degraded_fallback_when_all_unhealthy() {
        let router = EndpointRouter::new(true, info_pair());
        for ep in router.endpoints() {
            ep.set_healthy(false).await;
        }
        // 全部不健康时仍返回端点（降级模式）
        let url = router.resolve("all_mids").await.unwrap();
        assert_eq!(url, "https://chainstack.example/info");
    }

    #[tokio::test]
    async fn test_healthy_preferred_over_unhealthy() {
        let router = EndpointRouter::new(true, info_pair());
        // 标记偏好的Chainstack端点为不健康
        router.endpoints()[1].set_healthy(false).await;
        let url = router.resolve("all_mids").await.unwrap();
        assert_eq!(url, "https://public.example/info");
    }

    #[tokio::test]
    async fn test_provider_rank_dominates_numeric_priority() {
        let router = EndpointRouter::new(
            true,
            vec![
                Endpoint::new(
                    "https://public.example/info",
                    Provider::Public,
                    CapabilityType::Info,
                    5,
                ),
                Endpoint::new(
                    "https://chainstack.example/info",
                    Provider::Chainstack,
                    CapabilityType::Info,
                    9,
                ),
            ],
        );
        // Info偏好Chainstack，即使数字优先级更差也应胜出
        let url = router.resolve("all_mids").await.unwrap();
        assert_eq!(url, "https://chainstack.example/info");
    }

    #[tokio::test]
    async fn test_priority_ordering_within_provider() {
        let router = EndpointRouter::new(
            true,
            vec![
                Endpoint::new(
                    "https://slow.example/info",
                    Provider::Public,
                    CapabilityType::Info,
                    5,
                ),
                Endpoint::new(
                    "https://fast.example/info",
                    Provider::Public,
                    CapabilityType::Info,
                    1,
                ),
            ],
        );
        let url = router.resolve("meta").await.unwrap();
        assert_eq!(url, "https://fast.example/info");
    }

    #[tokio::test]
    async fn test_exchange_operations_only_route_to_exchange() {
        let mut endpoints = info_pair();
        endpoints.push(Endpoint::new(
            "https://public.example/exchange",
            Provider::Public,
            CapabilityType::Exchange,
            5,
        ));
        let router = EndpointRouter::new(true, endpoints);
        let url = router.resolve("place_order").await.unwrap();
        assert_eq!(url, "https://public.example/exchange");
    }

    #[tokio::test]
    async fn test_no_endpoint_for_capability() {
        let router = EndpointRouter::new(true, info_pair());
        let err = router.resolve("place_order").await.unwrap_err();
        assert!(matches!(err, TradingError::NoHealthyEndpoint(_)));
    }

    #[test]
    fn test_default_endpoints_cover_all_capabilities() {
        let defaults = default_endpoints(true);
        assert_eq!(defaults.len(), 4);
        assert!(defaults
            .iter()
            .any(|e| e.capability == CapabilityType::WebSocket
                && e.url.starts_with("wss://api.hyperliquid-testnet.xyz")));
        for ep in &defaults {
            assert_eq!(ep.provider, Provider::Public);
            assert_eq!(ep.priority, 5);
        }
    }
}
