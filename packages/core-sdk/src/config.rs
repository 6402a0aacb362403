use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::telemetry;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/**
 * \brief 中继运行配置：上游基地址与模型名。
 */
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /** \brief 上游 API 基地址。 */
    pub api_base: String,
    /** \brief 生成模型名。 */
    pub model: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/**
 * \brief 密钥配置文件结构（config/keys.json）。
 */
#[derive(Debug, Deserialize)]
struct KeysFile {
    #[serde(rename = "apiKeys", default)]
    api_keys: Vec<String>,
}

/**
 * \brief 加载 API Key 列表。
 *
 * 文件缺失或解析失败不会阻止进程启动：记录错误并返回空列表，之后的
 * 请求会以"未配置"失败。
 */
pub fn load_keys(path: &Path) -> Vec<String> {
    match read_keys(path) {
        Ok(keys) => {
            println!("Loaded {} API key(s) from {}", keys.len(), path.display());
            keys
        }
        Err(err) => {
            eprintln!("Error loading API keys: {:#}", err);
            telemetry::log_error("config", &format!("load keys failed: {:#}", err));
            Vec::new()
        }
    }
}

fn read_keys(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed: KeysFile =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(parsed.api_keys)
}

/**
 * \brief 加载知识库文本。
 *
 * 文件缺失时记录错误并返回 None；空白内容同样视为未配置，避免注入
 * 一对没有实际内容的合成消息。
 */
pub fn load_knowledge_base(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => {
            if text.trim().is_empty() {
                None
            } else {
                println!("Knowledge base loaded successfully");
                Some(text)
            }
        }
        Err(err) => {
            eprintln!("Error loading knowledge base: {}", err);
            telemetry::log_error("config", &format!("load knowledge base failed: {}", err));
            None
        }
    }
}
