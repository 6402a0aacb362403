use serde::{Deserialize, Serialize};

/**
 * \brief 消息片段，与 Gemini parts 格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /** \brief 文本内容；客户端漏传时按空串处理，不报错。 */
    #[serde(default)]
    pub text: String,
}

/**
 * \brief 一轮对话消息。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /** \brief 角色：user/model，其余值发送前会被修正为 user。 */
    #[serde(default)]
    pub role: String,
    /** \brief 消息片段列表。 */
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }

    /** \brief 是否有任一片段包含给定子串（知识库标记检测用）。 */
    pub fn contains(&self, needle: &str) -> bool {
        self.parts.iter().any(|p| p.text.contains(needle))
    }
}

/**
 * \brief POST /api/chat 请求体。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /** \brief 对话历史，旧消息在前；截断由客户端负责，中继原样转发。 */
    #[serde(default)]
    pub contents: Vec<Turn>,
}
