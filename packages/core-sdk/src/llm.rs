use std::future::Future;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::RelayConfig;
use crate::errors::RelayError;
use crate::keypool::KeyPool;
use crate::models::{Part, Turn};
use crate::telemetry;

/**
 * \brief 知识库标记短语。
 *
 * 注入前用它做子串包含检测，避免重复注入。这是启发式判断：比标记短的
 * 文档或改写过的注入都检测不到，接受这个局限。
 */
pub const KNOWLEDGE_MARKER: &str = "I'm providing you with a knowledge base";

const ROLE_USER: &str = "user";
const ROLE_MODEL: &str = "model";

/**
 * \brief 单次上游调用的结果分类。
 */
#[derive(Debug)]
pub enum AttemptOutcome {
    /** \brief 拿到合法响应信封，整个操作立即结束。 */
    Success(Value),
    /** \brief 网络错误或 429 配额耗尽：换下一个 Key 再试。 */
    Retryable(RelayError),
    /** \brief 其他错误状态或信封结构不合法：不再重试。 */
    Fatal(RelayError),
}

/**
 * \brief 组装发往上游的 contents 序列。
 *
 * 若加载了知识库且入站消息里还没有标记短语，则在最前面注入一对
 * user/model 合成消息；之后对每轮消息做发送前规范化。中继不做历史
 * 截断，控件侧已经只保留最近 10 轮。
 */
pub fn build_contents(knowledge: Option<&str>, turns: &[Turn]) -> Vec<Turn> {
    let mut contents = Vec::with_capacity(turns.len() + 2);
    if let Some(kb) = knowledge {
        let already_present = turns.iter().any(|t| t.contains(KNOWLEDGE_MARKER));
        if !already_present {
            contents.push(Turn::user(format!(
                "{}. Please use this information to answer my questions: {}",
                KNOWLEDGE_MARKER, kb
            )));
            contents.push(Turn::model(
                "I'll use this knowledge base to answer your questions.",
            ));
        }
    }
    contents.extend(turns.iter().cloned().map(normalize_turn));
    contents
}

/**
 * \brief 发送前的形状修正。
 *
 * 修正表：角色 user/model 保持不变，其余一律改写为 user；parts 为空时
 * 补一个空串片段。上游会直接拒绝畸形结构，这里选择静默修复而不是把
 * 格式瑕疵当成客户端错误返回。
 */
pub fn normalize_turn(mut turn: Turn) -> Turn {
    if turn.role != ROLE_USER && turn.role != ROLE_MODEL {
        turn.role = ROLE_USER.to_string();
    }
    if turn.parts.is_empty() {
        turn.parts.push(Part {
            text: String::new(),
        });
    }
    turn
}

/**
 * \brief 核心中继操作：组装请求并在 Key 池上轮询故障转移。
 *
 * 成功时原样返回上游信封；失败时返回结构化错误，调用方拿到的要么是
 * 恰好一个信封，要么是恰好一个错误，绝无部分响应。
 */
pub async fn generate(
    client: &reqwest::Client,
    cfg: &RelayConfig,
    pool: &KeyPool,
    knowledge: Option<&str>,
    turns: &[Turn],
) -> Result<Value, RelayError> {
    if pool.is_empty() {
        return Err(RelayError::NoKeysConfigured);
    }

    let contents = build_contents(knowledge, turns);
    let url = format!(
        "{}/models/{}:generateContent",
        cfg.api_base.trim_end_matches('/'),
        cfg.model
    );
    let body = json!({ "contents": contents });

    run_attempts(pool, |_, key| attempt_generate(client, &url, key, &body)).await
}

/**
 * \brief 故障转移循环：对每个结果分类做一次折叠。
 *
 * 最多尝试池大小次；每次尝试都推进一次游标，失败的尝试也算，这样
 * 持续坏掉的 Key 不会卡住轮询。可重试错误记为"最后一次错误"并带
 * 尝试序号写入日志，致命错误立即终止。
 */
pub(crate) async fn run_attempts<F, Fut>(pool: &KeyPool, mut attempt: F) -> Result<Value, RelayError>
where
    F: FnMut(usize, String) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut last_error: Option<RelayError> = None;
    for index in 0..pool.len() {
        let key = pool.next_key()?.to_string();
        match attempt(index, key).await {
            AttemptOutcome::Success(envelope) => return Ok(envelope),
            AttemptOutcome::Retryable(err) => {
                telemetry::log_error(
                    "relay.attempt",
                    &format!("attempt {} retryable: {}", index, err),
                );
                last_error = Some(err);
            }
            AttemptOutcome::Fatal(err) => {
                telemetry::log_error("relay.attempt", &format!("attempt {} fatal: {}", index, err));
                return Err(err);
            }
        }
    }
    let last = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt was made".to_string());
    Err(RelayError::AllKeysExhausted { last })
}

/**
 * \brief 执行一次上游调用并分类结果。
 */
async fn attempt_generate(
    client: &reqwest::Client,
    url: &str,
    key: String,
    body: &Value,
) -> AttemptOutcome {
    let resp = match client
        .post(url)
        .query(&[("key", key.as_str())])
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => return AttemptOutcome::Retryable(RelayError::Transport(err.to_string())),
    };

    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let text = resp.text().await.unwrap_or_default();
        return AttemptOutcome::Retryable(RelayError::Upstream { status, body: text });
    }
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return AttemptOutcome::Fatal(RelayError::Upstream { status, body: text });
    }

    let envelope: Value = match resp.json().await {
        Ok(v) => v,
        Err(err) => return AttemptOutcome::Fatal(RelayError::MalformedEnvelope(err.to_string())),
    };
    if !envelope_is_valid(&envelope) {
        return AttemptOutcome::Fatal(RelayError::MalformedEnvelope(envelope.to_string()));
    }
    AttemptOutcome::Success(envelope)
}

/**
 * \brief 校验上游响应是否符合 candidates 信封结构：
 *        { candidates: [ { content: { parts: [ { text } ] } } ] }
 */
fn envelope_is_valid(v: &Value) -> bool {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|parts| parts.first())
        .and_then(|p| p.get("text"))
        .map(|t| t.is_string())
        .unwrap_or(false)
}

/**
 * \brief 从信封中取出首个候选的全部文本（CLI 展示用）。
 */
pub fn extract_text(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
