use crate::core::error::TradingError;
use crate::core::router::EndpointRouter;
use crate::core::types::{MarketData, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// 价格推送回调
pub type PriceCallback = Arc<dyn Fn(MarketData) + Send + Sync>;

/// 市场数据源接口
///
/// 引擎通过这个trait消费行情，与具体交易所的推送协议解耦
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// 建立连接并启动接收
    async fn connect(&self) -> Result<()>;

    /// 断开连接，停止接收
    async fn disconnect(&self) -> Result<()>;

    /// 订阅资产价格更新
    async fn subscribe_price_updates(&self, asset: &str, callback: PriceCallback) -> Result<()>;

    /// 最新缓存价格
    async fn get_latest_price(&self, asset: &str) -> Option<f64>;

    fn is_running(&self) -> bool;

    async fn status(&self) -> serde_json::Value;
}

/// 固定重连间隔
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// 最大连续重连次数，超过后数据流终止
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// 读取任务与外部接口共享的状态
struct FeedShared {
    running: AtomicBool,
    subscribed: RwLock<HashSet<String>>,
    callbacks: RwLock<HashMap<String, Vec<PriceCallback>>>,
    latest: RwLock<HashMap<String, MarketData>>,
}

impl FeedShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            subscribed: RwLock::new(HashSet::new()),
            callbacks: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }
}

/// Hyperliquid WebSocket市场数据源
///
/// 订阅allMids推送，为已订阅资产缓存最新价格并触发回调。
/// 连接断开后固定间隔重连并自动重新订阅。
pub struct HyperliquidMarketData {
    router: Arc<EndpointRouter>,
    shared: Arc<FeedShared>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl HyperliquidMarketData {
    pub fn new(router: Arc<EndpointRouter>) -> Self {
        Self {
            router,
            shared: Arc::new(FeedShared::new()),
            writer: Arc::new(Mutex::new(None)),
            reader_task: Mutex::new(None),
        }
    }

    /// 打开新的WebSocket流，写半部存入共享writer，返回读半部
    async fn open_stream(&self) -> Result<WsReader> {
        let ws_url = self.router.resolve("subscribe_price").await?;
        let url = Url::parse(&ws_url)
            .map_err(|e| TradingError::WebSocketError(format!("无效的WS地址 {}: {}", ws_url, e)))?;

        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TradingError::WebSocketError(format!("WebSocket连接失败: {}", e)))?;
        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);

        log::info!(
            "✅ 已连接Hyperliquid WebSocket ({})",
            if self.router.is_testnet() {
                "测试网"
            } else {
                "主网"
            }
        );
        log::info!("📡 WebSocket地址: {}", ws_url);
        Ok(read)
    }

    pub async fn get_latest_data(&self, asset: &str) -> Option<MarketData> {
        self.shared.latest.read().await.get(asset).cloned()
    }
}

#[async_trait]
impl MarketDataFeed for HyperliquidMarketData {
    /// 建立WebSocket连接并启动读取任务，重复调用为空操作
    async fn connect(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let reader = match self.open_stream().await {
            Ok(reader) => reader,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // 补发connect之前注册的订阅
        if !self.shared.subscribed.read().await.is_empty() {
            if let Err(e) = send_subscribe(&self.writer).await {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let router = Arc::clone(&self.router);
        let shared = Arc::clone(&self.shared);
        let writer = Arc::clone(&self.writer);
        let handle = tokio::spawn(async move {
            run_reader(router, shared, writer, reader).await;
        });
        *self.reader_task.lock().await = Some(handle);

        Ok(())
    }

    async fn subscribe_price_updates(&self, asset: &str, callback: PriceCallback) -> Result<()> {
        self.shared
            .callbacks
            .write()
            .await
            .entry(asset.to_string())
            .or_default()
            .push(callback);
        self.shared
            .subscribed
            .write()
            .await
            .insert(asset.to_string());

        if self.shared.running.load(Ordering::SeqCst) {
            send_subscribe(&self.writer).await?;
        }

        log::info!("📊 已订阅 {} 价格更新", asset);
        Ok(())
    }

    async fn get_latest_price(&self, asset: &str) -> Option<f64> {
        self.shared.latest.read().await.get(asset).map(|d| d.price)
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    async fn status(&self) -> serde_json::Value {
        let subscribed: Vec<String> = self
            .shared
            .subscribed
            .read()
            .await
            .iter()
            .cloned()
            .collect();
        serde_json::json!({
            "running": self.is_running(),
            "testnet": self.router.is_testnet(),
            "subscribed_assets": subscribed,
            "cached_assets": self.shared.latest.read().await.len(),
        })
    }

    /// 断开连接，停止读取任务并关闭流
    async fn disconnect(&self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }

        log::info!("🔌 已断开Hyperliquid WebSocket连接");
        Ok(())
    }
}

/// 发送allMids订阅消息
async fn send_subscribe(writer: &Arc<Mutex<Option<WsWriter>>>) -> Result<()> {
    let message = serde_json::json!({
        "method": "subscribe",
        "subscription": {"type": "allMids"},
    })
    .to_string();

    let mut guard = writer.lock().await;
    if let Some(writer) = guard.as_mut() {
        writer
            .send(Message::Text(message))
            .await
            .map_err(|e| TradingError::WebSocketError(format!("发送订阅消息失败: {}", e)))?;
    }
    Ok(())
}

/// 读取循环：处理消息，断开后按固定间隔重连并重新订阅
async fn run_reader(
    router: Arc<EndpointRouter>,
    shared: Arc<FeedShared>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    mut reader: WsReader,
) {
    let mut attempts = 0u32;

    'outer: while shared.running.load(Ordering::SeqCst) {
        while shared.running.load(Ordering::SeqCst) {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    process_message(&shared, &text).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    let mut guard = writer.lock().await;
                    if let Some(w) = guard.as_mut() {
                        let _ = w.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::warn!("⚠️ WebSocket连接已关闭");
                    break;
                }
                Some(Err(e)) => {
                    log::error!("WebSocket错误: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }

        // 重连
        while shared.running.load(Ordering::SeqCst) {
            if attempts >= MAX_RECONNECT_ATTEMPTS {
                log::error!("❌ 超过最大重连次数({}), 数据流终止", MAX_RECONNECT_ATTEMPTS);
                shared.running.store(false, Ordering::SeqCst);
                break 'outer;
            }
            attempts += 1;
            log::info!("🔄 WebSocket重连中 (第{}次)", attempts);
            tokio::time::sleep(RECONNECT_DELAY).await;

            match reconnect(&router, &writer).await {
                Ok(new_reader) => {
                    reader = new_reader;
                    attempts = 0;
                    let count = shared.subscribed.read().await.len();
                    if count > 0 {
                        if let Err(e) = send_subscribe(&writer).await {
                            log::error!("重新订阅失败: {}", e);
                            continue;
                        }
                        log::info!("🔄 已重新订阅 {} 个资产", count);
                    }
                    continue 'outer;
                }
                Err(e) => {
                    log::error!("重连失败: {}", e);
                }
            }
        }
    }
}

async fn reconnect(
    router: &Arc<EndpointRouter>,
    writer: &Arc<Mutex<Option<WsWriter>>>,
) -> Result<WsReader> {
    let ws_url = router.resolve("subscribe_price").await?;
    let url = Url::parse(&ws_url)
        .map_err(|e| TradingError::WebSocketError(format!("无效的WS地址 {}: {}", ws_url, e)))?;
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| TradingError::WebSocketError(format!("WebSocket连接失败: {}", e)))?;
    let (write, read) = stream.split();
    *writer.lock().await = Some(write);
    Ok(read)
}

/// 解析单条消息，只处理allMids频道
async fn process_message(shared: &FeedShared, text: &str) {
    let data: serde_json::Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(_) => return,
    };

    if data["channel"].as_str() != Some("allMids") {
        return;
    }
    let mids = match data["data"]["mids"].as_object() {
        Some(mids) => mids,
        None => return,
    };

    let subscribed = shared.subscribed.read().await.clone();
    for (asset, price_value) in mids {
        if !subscribed.contains(asset.as_str()) {
            continue;
        }
        let price = match price_value.as_str().and_then(|v| v.parse::<f64>().ok()) {
            Some(price) => price,
            None => {
                log::warn!("无效的价格数据 {}: {}", asset, price_value);
                continue;
            }
        };

        let market_data = MarketData {
            asset: asset.clone(),
            // allMids不包含成交量
            price,
            volume_24h: 0.0,
            timestamp: Utc::now(),
        };

        shared
            .latest
            .write()
            .await
            .insert(asset.clone(), market_data.clone());

        let callbacks = shared.callbacks.read().await;
        if let Some(list) = callbacks.get(asset.as_str()) {
            for callback in list {
                callback(market_data.clone());
            }
        }
    }
}
