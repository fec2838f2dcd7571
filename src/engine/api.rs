//! pstore API Module
//! RPC surface for the storage operations, JSON over HTTP with OpenAPI documentation

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::engine::migrations::MigrationRunner;
use crate::engine::storage::{KvStore, StorageError, StorageResult};

#[derive(Clone)]
pub struct ApiState {
    pub store: KvStore,
    pub max_body_bytes: usize,
}

impl ApiState {
    pub fn new(store: KvStore, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }

    /// Run a blocking storage call off the async executor.
    async fn run<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&KvStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(read, write, get_keys, delete, count),
    components(schemas(
        ReadRequest,
        ReadResponse,
        WriteRequest,
        WriteResponse,
        GetKeysRequest,
        GetKeysResponse,
        DeleteRequest,
        DeleteResponse,
        CountRequest,
        CountResponse,
    )),
    tags(
        (name = "records", description = "Byte payloads stored by key"),
        (name = "counters", description = "Named monotonic counters"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        .route("/api/read", post(read))
        .route("/api/write", post(write))
        .route("/api/keys", post(get_keys))
        .route("/api/delete", post(delete))
        .route("/api/count", post(count))
        .route("/api/health", get(health_check))
        .route("/api/openapi.json", get(openapi_json))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON request body whose decoding failures answer with an [`ApiError`]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// Storage failures mapped onto HTTP status codes
#[derive(Debug)]
pub enum ApiError {
    Storage(StorageError),
    BadRequest(String),
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Storage(err) => {
                let (status, error_type) = match err {
                    StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    StorageError::InvalidKey { .. } => (StatusCode::BAD_REQUEST, "bad_data"),
                    StorageError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                    StorageError::Database { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                };
                (status, error_type, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_data", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }

        let body = serde_json::json!({
            "status": "error",
            "errorType": error_type,
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

/// Serde adapter carrying byte payloads as standard base64 strings
mod payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadResponse {
    #[serde(with = "payload")]
    #[schema(value_type = String, format = Byte)]
    pub value: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WriteRequest {
    pub key: String,
    #[serde(with = "payload")]
    #[schema(value_type = String, format = Byte)]
    pub value: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct WriteResponse {}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct GetKeysRequest {
    /// Empty or missing lists every key
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GetKeysResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountRequest {
    pub counter: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: u32,
}

async fn health_check(State(state): State<ApiState>) -> Result<Json<HealthResponse>, ApiError> {
    let store = state.store.clone();
    let schema_version = tokio::task::spawn_blocking(move || {
        MigrationRunner::new(store.database()).current_version()
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: schema_version.0,
    }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/api/read",
    request_body = ReadRequest,
    responses(
        (status = 200, description = "Stored payload", body = ReadResponse),
        (status = 400, description = "Malformed request body"),
        (status = 404, description = "Key was never written or has been deleted")
    ),
    tag = "records"
)]
async fn read(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<ReadRequest>,
) -> Result<Json<ReadResponse>, ApiError> {
    let value = state.run(move |store| store.read(&req.key)).await?;
    Ok(Json(ReadResponse { value }))
}

#[utoipa::path(
    post,
    path = "/api/write",
    request_body = WriteRequest,
    responses(
        (status = 200, description = "Value stored", body = WriteResponse),
        (status = 400, description = "Key too long or malformed request body")
    ),
    tag = "records"
)]
async fn write(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    state
        .run(move |store| store.write(&req.key, &req.value))
        .await?;
    Ok(Json(WriteResponse {}))
}

#[utoipa::path(
    post,
    path = "/api/keys",
    request_body = GetKeysRequest,
    responses(
        (status = 200, description = "Keys starting with the prefix", body = GetKeysResponse)
    ),
    tag = "records"
)]
async fn get_keys(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<GetKeysRequest>,
) -> Result<Json<GetKeysResponse>, ApiError> {
    let keys = state.run(move |store| store.get_keys(&req.prefix)).await?;
    Ok(Json(GetKeysResponse { keys }))
}

#[utoipa::path(
    post,
    path = "/api/delete",
    request_body = DeleteRequest,
    responses(
        (status = 200, description = "Key removed, or was already absent", body = DeleteResponse)
    ),
    tag = "records"
)]
async fn delete(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.run(move |store| store.delete(&req.key)).await?;
    Ok(Json(DeleteResponse {}))
}

#[utoipa::path(
    post,
    path = "/api/count",
    request_body = CountRequest,
    responses(
        (status = 200, description = "Counter value after the increment", body = CountResponse),
        (status = 400, description = "Counter name too long or malformed request body")
    ),
    tag = "counters"
)]
async fn count(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<CountRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state
        .run(move |store| store.count_increment(&req.counter))
        .await?;
    Ok(Json(CountResponse { count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::DatabaseConfig;
    use crate::engine::database::Database;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let db = Database::in_memory().unwrap();
        MigrationRunner::new(&db).initialize().unwrap();
        create_router(ApiState::new(KvStore::new(db), 1024 * 1024))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/api/write",
            Some(json!({"key": "hello", "value": "AAEC/w=="})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, body) = call(&app, "POST", "/api/read", Some(json!({"key": "hello"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"value": "AAEC/w=="}));
    }

    #[tokio::test]
    async fn test_read_missing_is_404() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/read", Some(json!({"key": "nope"}))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorType"], "not_found");
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let app = app();
        for key in ["a1", "a2", "b1"] {
            call(&app, "POST", "/api/write", Some(json!({"key": key, "value": ""}))).await;
        }

        let (_, body) = call(&app, "POST", "/api/keys", Some(json!({"prefix": "a"}))).await;
        let mut keys: Vec<String> = serde_json::from_value(body["keys"].clone()).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a1", "a2"]);

        let (status, _) = call(&app, "POST", "/api/delete", Some(json!({"key": "a1"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "POST", "/api/delete", Some(json!({"key": "a1"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "POST", "/api/keys", Some(json!({}))).await;
        assert_eq!(body["keys"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_count_increments() {
        let app = app();
        for expected in 1..=3 {
            let (status, body) =
                call(&app, "POST", "/api/count", Some(json!({"counter": "hits"}))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"count": expected}));
        }
    }

    #[tokio::test]
    async fn test_invalid_key_is_400() {
        let app = app();
        let key = "k".repeat(101);
        let (status, body) = call(
            &app,
            "POST",
            "/api/write",
            Some(json!({"key": key, "value": "AA=="})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorType"], "bad_data");
    }

    #[tokio::test]
    async fn test_bad_base64_is_rejected() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/write",
            Some(json!({"key": "k", "value": "not base64!"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["errorType"], "bad_data");
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_data() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/read", Some(json!({"name": "k"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorType"], "bad_data");
        assert!(body["error"].as_str().unwrap().contains("key"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_data() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/count")
            .header("content-type", "application/json")
            .body(Body::from("{\"counter\": "))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errorType"], "bad_data");
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_503() {
        let config = DatabaseConfig {
            connection_timeout_ms: 50,
            ..DatabaseConfig::default()
        };
        let db = Database::in_memory_with(&config).unwrap();
        MigrationRunner::new(&db).initialize().unwrap();
        let app = create_router(ApiState::new(KvStore::new(db.clone()), 1024 * 1024));

        let _held = db.get_connection().unwrap();
        let (status, body) = call(&app, "POST", "/api/read", Some(json!({"key": "k"}))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errorType"], "unavailable");
    }

    #[tokio::test]
    async fn test_health_reports_schema_version() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["schema_version"], 3);
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/openapi.json", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/read"].is_object());
        assert!(body["paths"]["/api/count"].is_object());
    }
}
