//! Admin HTTP API.
//!
//! ```text
//! POST /control/flush-cache[?tag=T]
//! POST /control/nodes/{addr}/enable
//! POST /control/nodes/{addr}/fade
//! GET  /control/nodes/{addr}
//! GET  /control/stats
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::auth::control_auth_middleware;
use super::{ControlCommand, ControlHandler, ControlReply};

pub struct ControlState {
    pub handler: ControlHandler,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct FlushParams {
    pub tag: Option<String>,
}

type ApiResult = Result<Json<ControlReply>, (StatusCode, String)>;

pub fn control_router(handler: ControlHandler, api_key: String) -> Router {
    let state = Arc::new(ControlState { handler, api_key });

    Router::new()
        .route("/control/flush-cache", post(flush_cache))
        .route("/control/nodes/{addr}/enable", post(enable_node))
        .route("/control/nodes/{addr}/fade", post(fade_node))
        .route("/control/nodes/{addr}", get(node_status))
        .route("/control/stats", get(stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            control_auth_middleware,
        ))
        .with_state(state)
}

fn parse_addr(addr: &str) -> Result<SocketAddr, (StatusCode, String)> {
    addr.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid node address '{addr}'")))
}

async fn flush_cache(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<FlushParams>,
) -> Json<ControlReply> {
    Json(state.handler.execute(ControlCommand::FlushHttpCache(params.tag)))
}

async fn enable_node(State(state): State<Arc<ControlState>>, Path(addr): Path<String>) -> ApiResult {
    let addr = parse_addr(&addr)?;
    Ok(Json(state.handler.execute(ControlCommand::EnableNode(addr))))
}

async fn fade_node(State(state): State<Arc<ControlState>>, Path(addr): Path<String>) -> ApiResult {
    let addr = parse_addr(&addr)?;
    Ok(Json(state.handler.execute(ControlCommand::FadeNode(addr))))
}

async fn node_status(State(state): State<Arc<ControlState>>, Path(addr): Path<String>) -> ApiResult {
    let addr = parse_addr(&addr)?;
    Ok(Json(state.handler.execute(ControlCommand::NodeStatus(addr))))
}

async fn stats(State(state): State<Arc<ControlState>>) -> Json<ControlReply> {
    Json(state.handler.execute(ControlCommand::Stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests::handler;
    use crate::health::FailureStatus;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_auth_and_commands() {
        let (handler, failures) = handler(None);
        let app = control_router(handler, "secret".to_string());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let base = format!("http://{addr}/control");

        let response = client.get(format!("{base}/stats")).send().await.unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .post(format!("{base}/nodes/10.0.0.1:80/fade"))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            failures.get_status("10.0.0.1:80".parse().unwrap()),
            FailureStatus::Fade
        );

        let body: serde_json::Value = client
            .get(format!("{base}/nodes/10.0.0.1:80"))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "fade");

        let response = client
            .get(format!("{base}/nodes/nonsense"))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let body: serde_json::Value = client
            .post(format!("{base}/flush-cache?tag=assets"))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["result"], "flushed");
        assert_eq!(body["documents"], 0);
    }
}
