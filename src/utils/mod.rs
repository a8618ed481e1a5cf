/// 通用工具模块
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

static ORDER_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// 生成本地订单ID
///
/// 格式: order_{毫秒时间戳}_{序号}，序号保证同一毫秒内的唯一性
pub fn generate_order_id() -> String {
    let seq = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("order_{}_{}", Utc::now().timestamp_millis(), seq)
}

/// 按精度四舍五入价格
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
