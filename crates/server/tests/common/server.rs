//! Server test utilities.

use super::metadata::test_legacy_upgrade;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dropit_core::config::{AppConfig, MetadataConfig, StorageConfig};
use dropit_metadata::{MetadataStore, SqliteStore};
use dropit_server::{AppState, create_router};
use dropit_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Admin key whose hash `AdminConfig::for_testing` carries.
#[allow(dead_code)]
pub const TEST_ADMIN_KEY: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// Response captured by [`TestServer::send`].
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        if self.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server over the given object store.
    pub async fn with_storage(storage: Arc<dyn ObjectStore>) -> Self {
        Self::build(|_| {}, Some(storage)).await
    }

    async fn build<F>(modifier: F, storage: Option<Arc<dyn ObjectStore>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = match storage {
            Some(storage) => storage,
            None => Arc::new(
                FilesystemBackend::new(&storage_path)
                    .await
                    .expect("Failed to create storage backend"),
            ),
        };

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store")
                .with_legacy_upgrade(test_legacy_upgrade()),
        );

        let mut config = AppConfig::for_testing();
        config.server.staging_dir = temp_dir.path().join("staging");
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };

        modifier(&mut config);

        let state = AppState::new(config, storage, metadata)
            .await
            .expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a request through the router and collect the whole response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Upload `data` as `filename` with extra query parameters and an
    /// optional password. Returns the new file id.
    pub async fn upload(
        &self,
        filename: &str,
        data: &[u8],
        query: &str,
        password: Option<&str>,
    ) -> String {
        let mut uri = format!("/v1/files?filename={filename}");
        if !query.is_empty() {
            uri.push('&');
            uri.push_str(query);
        }
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "text/plain");
        if let Some(password) = password {
            builder = builder.header("X-File-Password", password);
        }
        let response = self
            .send(builder.body(Body::from(data.to_vec())).unwrap())
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "upload failed: {:?}", response.json());
        response.json()["file_id"].as_str().unwrap().to_string()
    }

    /// Download a file, optionally with a password header.
    pub async fn download(&self, file_id: &str, password: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("GET")
            .uri(format!("/v1/files/{file_id}/download"));
        if let Some(password) = password {
            builder = builder.header("X-File-Password", password);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Call an admin endpoint with the test admin key.
    pub async fn admin(&self, method: &str, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {TEST_ADMIN_KEY}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }
}
