//! Test harness: the full router over in-memory pipeline plumbing and mock
//! collaborators, with a live worker pool.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use letter_server::kernel::TestDependencies;
use letter_server::server::{build_app, AppState};
use letter_server::stages::StageSettings;
use serde_json::Value;
use stagecoach::{
    InMemoryStatusStore, InMemoryWorkQueue, JobId, StatusServiceConfig, StatusSnapshot,
    WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const WORKERS: usize = 2;

pub struct TestHarness {
    pub app: Router,
    pub state: AppState,
    pub deps: TestDependencies,
    shutdown: CancellationToken,
    pool: Option<WorkerPoolHandle>,
}

impl TestHarness {
    pub fn start(deps: TestDependencies) -> Self {
        let settings = StageSettings {
            timeout: Duration::from_secs(5),
            max_retries_override: Some(0),
        };
        let state = AppState::new(
            &deps.server_deps(),
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryWorkQueue::new()),
            &settings,
            StatusServiceConfig {
                poll_interval: Duration::from_millis(10),
            },
            WORKERS,
        );

        let shutdown = CancellationToken::new();
        let pool = WorkerPool::with_config(
            state.coordinator.queue().clone(),
            state.coordinator.clone(),
            WorkerPoolConfig {
                worker_count: WORKERS,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .spawn(shutdown.clone());

        Self {
            app: build_app(state.clone(), &[]),
            state,
            deps,
            shutdown,
            pool: Some(pool),
        }
    }

    /// Send one request through the router and return status and raw body.
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Like `send`, parsing the body as JSON.
    pub async fn send_json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, text) = self.send(method, uri, body).await;
        let json = serde_json::from_str(&text).unwrap_or(Value::Null);
        (status, json)
    }

    /// Submit a job and return its id.
    pub async fn submit(&self, body: Value) -> JobId {
        let (status, json) = self.send_json(Method::POST, "/jobs", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {json}");
        json["job_id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn wait_for_terminal(&self, job_id: JobId) -> StatusSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Ok(snapshot) = self.state.status.get_status(job_id).await {
                if snapshot.is_terminal() {
                    return snapshot;
                }
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {job_id} did not finish in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
