use crate::bootstrap::CONTAINER_ID_PREFIX;
use crate::config::LOCAL_SDK_PATH;
use crate::editor::{EditorConfig, OpenOptions};
use crate::retry::millis_u64;
use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub async fn serve_bootstrap_script(State(_state): State<AppState>) -> impl IntoResponse {
    let mut resp = Response::new(crate::sdk::bootstrap_script());
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript; charset=utf-8"),
    );
    resp
}

/// Editor configuration plus the retry schedule the browser loader follows.
pub async fn editor_config(State(state): State<AppState>) -> impl IntoResponse {
    let Some(api_key) = state.config.api_key.as_deref() else {
        tracing::error!("editor config requested but no API key is configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Editor is not configured",
                "details": "API key not found in environment variables",
            })),
        )
            .into_response();
    };
    let settings = &state.config.editor;
    let container_id = settings
        .container_id
        .clone()
        .unwrap_or_else(|| format!("{CONTAINER_ID_PREFIX}-container"));
    let editor = EditorConfig::build(settings, api_key, &container_id);
    let bootstrap = &state.config.bootstrap;
    Json(json!({
        "sdkUrl": LOCAL_SDK_PATH,
        "editor": editor,
        "open": OpenOptions::default(),
        "retry": bootstrap.retry,
        "loadTimeoutMs": millis_u64(bootstrap.load_timeout),
        "globalWaitMs": millis_u64(bootstrap.global_wait),
    }))
    .into_response()
}

pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.sdk_cache.clear().await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::server::{AppState, build_router};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    async fn get(cfg: AppConfig, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let resp = build_router(AppState::new(cfg).unwrap())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    #[tokio::test]
    async fn config_endpoint_returns_vendor_shape() {
        let (status, _, body) = get(AppConfig::for_tests(), "/_editor/config").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["sdkUrl"], "/api/proxy/sdk");
        assert_eq!(json["editor"]["apiKey"], "test-key");
        assert_eq!(json["editor"]["propertyId"], "tkdesigner");
        assert_eq!(json["editor"]["containerId"], "picsart-editor-container");
        assert_eq!(json["open"]["quality"], 90);
        assert_eq!(json["retry"]["maxAttempts"], 3);
        assert_eq!(json["retry"]["backoff"], "linear");
        assert_eq!(json["loadTimeoutMs"], 10_000);
        assert_eq!(json["globalWaitMs"], 500);
    }

    #[tokio::test]
    async fn config_endpoint_without_key_is_an_error() {
        let mut cfg = AppConfig::for_tests();
        cfg.api_key = None;
        let (status, headers, body) = get(cfg, "/_editor/config").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers["access-control-allow-origin"], "*");
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Editor is not configured");
    }

    #[tokio::test]
    async fn serves_bootstrap_script() {
        let (status, headers, body) = get(AppConfig::for_tests(), "/_editor/bootstrap.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("application/javascript")
        );
        let script = String::from_utf8(body).unwrap();
        assert!(script.contains("/_editor/config"));
    }

    #[tokio::test]
    async fn cache_can_be_cleared() {
        let resp = build_router(AppState::new(AppConfig::for_tests()).unwrap())
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/_editor/cache")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
