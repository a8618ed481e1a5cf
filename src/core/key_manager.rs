use crate::core::error::TradingError;
use crate::core::types::Result;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// 机器人实例级别的密钥覆盖配置
///
/// 直接在配置文件里写私钥不推荐，但为了兼容仍然支持
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyOverrides {
    pub testnet_private_key: Option<String>,
    pub mainnet_private_key: Option<String>,
    pub private_key: Option<String>,
    pub testnet_key_file: Option<String>,
    pub mainnet_key_file: Option<String>,
    pub private_key_file: Option<String>,
}

/// 统一的私钥管理
///
/// 密钥解析优先顺序:
/// 1. 机器人实例覆盖（直接密钥或密钥文件）
/// 2. 环境特定密钥 HYPERLIQUID_{TESTNET|MAINNET}_PRIVATE_KEY
/// 3. 旧版单一密钥 HYPERLIQUID_PRIVATE_KEY（向后兼容）
/// 4. 环境特定密钥文件 HYPERLIQUID_{TESTNET|MAINNET}_KEY_FILE
/// 5. 旧版密钥文件 HYPERLIQUID_PRIVATE_KEY_FILE
#[derive(Debug, Default)]
pub struct KeyManager;

impl KeyManager {
    pub fn new() -> Self {
        Self
    }

    pub fn private_key(&self, testnet: bool, overrides: Option<&KeyOverrides>) -> Result<String> {
        let network = if testnet { "testnet" } else { "mainnet" };

        // 1. 实例覆盖
        if let Some(overrides) = overrides {
            if let Some(key) = self.override_key(overrides, testnet) {
                log::debug!("使用机器人实例配置的私钥 ({})", network);
                return Ok(key);
            }
        }

        // 2. 环境特定密钥
        let env_var = if testnet {
            "HYPERLIQUID_TESTNET_PRIVATE_KEY"
        } else {
            "HYPERLIQUID_MAINNET_PRIVATE_KEY"
        };
        if let Ok(key) = env::var(env_var) {
            log::debug!("使用环境特定私钥 ({})", network);
            return Ok(key);
        }

        // 3. 旧版单一密钥
        if let Ok(key) = env::var("HYPERLIQUID_PRIVATE_KEY") {
            log::warn!("⚠️ 使用旧版单一私钥 ({}), 建议改用环境特定密钥", network);
            return Ok(key);
        }

        // 4. 环境特定密钥文件
        let file_var = if testnet {
            "HYPERLIQUID_TESTNET_KEY_FILE"
        } else {
            "HYPERLIQUID_MAINNET_KEY_FILE"
        };
        if let Ok(path) = env::var(file_var) {
            if let Some(key) = read_key_file(&path) {
                log::debug!("使用密钥文件私钥 ({})", network);
                return Ok(key);
            }
        }

        // 5. 旧版密钥文件
        if let Ok(path) = env::var("HYPERLIQUID_PRIVATE_KEY_FILE") {
            if let Some(key) = read_key_file(&path) {
                log::warn!("⚠️ 使用旧版密钥文件 ({}), 建议改用环境特定密钥文件", network);
                return Ok(key);
            }
        }

        Err(TradingError::ConfigError(format!(
            "未找到 {} 私钥, 请设置以下任意一项:\n\
             - HYPERLIQUID_{}_PRIVATE_KEY\n\
             - HYPERLIQUID_{}_KEY_FILE\n\
             - HYPERLIQUID_PRIVATE_KEY (旧版)\n\
             - 或在机器人配置文件中配置",
            network,
            if testnet { "TESTNET" } else { "MAINNET" },
            if testnet { "TESTNET" } else { "MAINNET" },
        )))
    }

    fn override_key(&self, overrides: &KeyOverrides, testnet: bool) -> Option<String> {
        // 直接密钥
        if testnet {
            if let Some(key) = &overrides.testnet_private_key {
                return Some(key.clone());
            }
        } else if let Some(key) = &overrides.mainnet_private_key {
            return Some(key.clone());
        }
        if let Some(key) = &overrides.private_key {
            return Some(key.clone());
        }

        // 密钥文件
        let file = if testnet {
            overrides.testnet_key_file.as_ref()
        } else {
            overrides.mainnet_key_file.as_ref()
        };
        if let Some(path) = file {
            return read_key_file(path);
        }
        if let Some(path) = &overrides.private_key_file {
            return read_key_file(path);
        }

        None
    }
}

/// 从文件读取私钥并校验格式（0x + 64位十六进制）
fn read_key_file(path: &str) -> Option<String> {
    if !Path::new(path).exists() {
        log::warn!("私钥文件不存在: {}", path);
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            log::error!("读取私钥文件失败 {}: {}", path, e);
            return None;
        }
    };

    let mut key = raw.trim().to_string();
    if !key.starts_with("0x") {
        key = format!("0x{}", key);
    }

    if key.len() != 66 {
        log::warn!("私钥文件格式无效: {}", path);
        return None;
    }

    Some(key)
}
