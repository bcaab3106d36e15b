use crate::search::{
    AxisInfo, CacheStatus, CancelSignal, RankedResult, SearchError, SearchOptions, SearchService,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

pub fn router(service: Arc<SearchService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/axes", get(axes))
        .route("/api/status", get(status))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

/// Serve the API on `listen` until Ctrl+C or SIGTERM.
pub async fn serve(service: Arc<SearchService>, listen: &str) -> anyhow::Result<()> {
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

#[derive(Debug)]
struct HttpError(SearchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            SearchError::InvalidQuery | SearchError::InvalidTopK => {
                axum::http::StatusCode::BAD_REQUEST
            }
            SearchError::EmbeddingProvider(_) | SearchError::EmbeddingDimension { .. } => {
                log::error!("{self:?}");
                axum::http::StatusCode::BAD_GATEWAY
            }
            SearchError::Load(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            }
            SearchError::Cancelled | SearchError::Internal(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

/// Cancels the search when the handler future is dropped, e.g. on client
/// disconnect, so scoring on the blocking pool stops early.
struct CancelOnDrop(Option<CancelSignal>);

impl CancelOnDrop {
    fn new(signal: CancelSignal) -> Self {
        Self(Some(signal))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(signal) = self.0.take() {
            signal.cancel();
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let defaults = state.service.default_options();
    let signal = CancelSignal::new();
    let guard = CancelOnDrop::new(signal.clone());
    let options = SearchOptions {
        top_k: payload.top_k.unwrap_or(defaults.top_k),
        min_score: payload.min_score.or(defaults.min_score),
        cancel: Some(signal),
    };

    let results = state.service.search(&payload.query, options).await;
    guard.disarm();
    let results = results?;

    Ok(Json(SearchResponse { results }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxesResponse {
    pub axes: Vec<AxisInfo>,
}

async fn axes(State(state): State<Arc<SharedState>>) -> Json<AxesResponse> {
    Json(AxesResponse {
        axes: state.service.axes(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub provider: String,
    pub store: CacheStatus,
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        provider: state.service.provider_name(),
        store: state.service.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{self, FailingProvider, StaticProvider};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read_json(response).await
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read_json(response).await
    }

    async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_search_endpoint() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) = post_json(
            router(service),
            "/api/search",
            json!({"query": "wide open plaza", "top_k": 2}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let response: SearchResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].index, 0);
        assert!(response.results[0].combined_score >= response.results[1].combined_score);
    }

    #[tokio::test]
    async fn test_search_endpoint_uses_default_top_k() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) =
            post_json(router(service), "/api/search", json!({"query": "plaza"})).await;

        assert_eq!(status, StatusCode::OK);
        // fixture has 3 locations, fewer than the default of 10
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_search_endpoint_rejects_empty_query() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) =
            post_json(router(service), "/api/search", json!({"query": "   "})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_search_endpoint_rejects_zero_top_k() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, _) = post_json(
            router(service),
            "/api/search",
            json!({"query": "plaza", "top_k": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_endpoint_provider_failure() {
        let service = fixtures::preloaded_service(FailingProvider);
        let (status, body) =
            post_json(router(service), "/api/search", json!({"query": "plaza"})).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_search_endpoint_dimension_mismatch() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0, 0.0]));
        let (status, _) =
            post_json(router(service), "/api/search", json!({"query": "plaza"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_search_endpoint_missing_data() {
        let temp = tempfile::tempdir().unwrap();
        let service = fixtures::lazy_service(temp.path(), StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) =
            post_json(router(service), "/api/search", json!({"query": "plaza"})).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_axes_endpoint() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) = get_json(router(service), "/api/axes").await;

        assert_eq!(status, StatusCode::OK);
        let response: AxesResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.axes.len(), 4);
        let total: f32 = response.axes.iter().map(|a| a.weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(response.axes[3].file, "mood_vibes_vectors.npy");
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let service = fixtures::preloaded_service(StaticProvider::new(vec![1.0, 0.0]));
        let (status, body) = get_json(router(service), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "static");
        assert_eq!(body["store"]["state"], "loaded");
        assert_eq!(body["store"]["locations"], 3);
    }
}
