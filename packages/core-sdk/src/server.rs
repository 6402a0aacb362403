use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::{
    config::RelayConfig, errors::RelayError, keypool::KeyPool, llm, models::ChatRequest, telemetry,
};

/**
 * \brief 服务共享状态。
 *
 * 启动后除 Key 池游标外全部只读，所以不需要任何锁；每个入站请求由
 * 独立的 tokio 任务处理。
 */
pub struct AppState {
    pub cfg: RelayConfig,
    pub pool: KeyPool,
    pub knowledge: Option<String>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(cfg: RelayConfig, pool: KeyPool, knowledge: Option<String>) -> Self {
        Self {
            cfg,
            pool,
            knowledge,
            client: reqwest::Client::new(),
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供静态控件页面与中继 API。
 * \param addr 监听地址，如 "0.0.0.0:3000"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let static_root =
        std::env::var("WIDGETCHAT_PUBLIC_DIR").unwrap_or_else(|_| "public".to_string());
    let static_handler = ServeDir::new(static_root).append_index_html_on_directories(true);
    let static_service = get_service(static_handler);

    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .fallback_service(static_service)
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 聊天中继接口：POST /api/chat。
 *
 * 成功时把上游信封原样作为 200 返回；失败时返回 { error, details? }，
 * 状态码按错误分类映射。
 */
async fn chat(State(state): State<Arc<AppState>>, Json(payload): Json<ChatRequest>) -> Response {
    telemetry::log_event(
        "server.chat",
        &format!("relay request turns={}", payload.contents.len()),
    );
    match llm::generate(
        &state.client,
        &state.cfg,
        &state.pool,
        state.knowledge.as_deref(),
        &payload.contents,
    )
    .await
    {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => {
            telemetry::log_error("server.chat", &format!("relay failed: {}", err));
            let (status, body) = relay_error_parts(&err);
            (status, Json(body)).into_response()
        }
    }
}

/**
 * \brief 把中继错误映射为对外的状态码与 JSON 响应体。
 *
 * 配置缺失与池耗尽是 500；上游错误状态原样透传；2xx 但信封不合法
 * 记为 502（上游"成功"了，但内容无法担保）。
 */
fn relay_error_parts(err: &RelayError) -> (StatusCode, serde_json::Value) {
    match err {
        RelayError::NoKeysConfigured => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "No API keys configured" }),
        ),
        RelayError::AllKeysExhausted { last } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "All API keys have failed", "details": last }),
        ),
        RelayError::Upstream { status, body } => {
            let details = serde_json::from_str::<serde_json::Value>(body)
                .unwrap_or_else(|_| json!(body));
            (
                *status,
                json!({ "error": "Upstream request failed", "details": details }),
            )
        }
        RelayError::MalformedEnvelope(detail) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "Upstream returned an unexpected response shape", "details": detail }),
        ),
        RelayError::Transport(detail) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Upstream request failed", "details": detail }),
        ),
    }
}

/**
 * \brief 健康检查：报告 Key 数量、知识库加载状态与模型名。
 */
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "keys": state.pool.len(),
        "knowledge_base": state.knowledge.is_some(),
        "model": state.cfg.model,
    }))
}
