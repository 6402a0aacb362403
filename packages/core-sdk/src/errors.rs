use reqwest::StatusCode;
use thiserror::Error;

/**
 * \brief 中继错误分类，决定对外 HTTP 状态码与是否换 Key 重试。
 */
#[derive(Debug, Error)]
pub enum RelayError {
    /** \brief Key 池为空：配置缺失，直接失败。 */
    #[error("no API keys configured")]
    NoKeysConfigured,

    /** \brief 上游返回非成功状态；429 可重试，其余原样透传给调用方。 */
    #[error("upstream request failed: {status} -> {body}")]
    Upstream { status: StatusCode, body: String },

    /** \brief 上游返回 2xx 但响应不符合 candidates 信封结构。 */
    #[error("upstream response is not a valid envelope: {0}")]
    MalformedEnvelope(String),

    /** \brief 网络层失败，没有拿到任何响应。 */
    #[error("request failed: {0}")]
    Transport(String),

    /** \brief 整个 Key 池轮询完仍未成功，附带最后一次可重试错误。 */
    #[error("all API keys have failed, last error: {last}")]
    AllKeysExhausted { last: String },
}
