//! In-process stand-in for the workflow service, served by axum on an
//! ephemeral port.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use template_job_client::config::PollPolicy;
use template_job_client::{ApiClient, Config};

pub const TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
pub struct Upload {
    pub resource_id: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct FakeService {
    pub base_url: Mutex<String>,
    pub requests: AtomicUsize,
    pub polls: AtomicUsize,
    pub downloads: AtomicUsize,
    pub template: Mutex<Value>,
    /// Status returned by successive polls; `RUNNING` once exhausted.
    pub statuses: Mutex<VecDeque<String>>,
    pub slots_issued: AtomicUsize,
    pub uploads: Mutex<Vec<Upload>>,
    pub submissions: Mutex<Vec<Value>>,
    pub api_auth: Mutex<Vec<Option<String>>>,
    pub submit_without_job: AtomicBool,
    pub reject_put: AtomicBool,
    pub reject_slot: AtomicBool,
    pub reject_submit: AtomicBool,
    pub omit_job_once: AtomicBool,
}

impl FakeService {
    pub fn script(&self, statuses: &[&str]) {
        *self.statuses.lock().unwrap() = statuses.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_template(&self, fields: Value) {
        *self.template.lock().unwrap() = json!({ "name": "test", "fields": { "fieldAttrs": fields } });
    }

    pub fn image_url(&self) -> String {
        format!("{}/images/result.png", self.base_url.lock().unwrap())
    }

    pub fn upload_body_for(&self, resource_id: &str) -> Option<Vec<u8>> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.resource_id == resource_id)
            .map(|u| u.body.clone())
    }

    fn hit(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.api_auth.lock().unwrap().push(auth);
    }
}

type Shared = Arc<FakeService>;

async fn get_template(State(svc): State<Shared>, Path(id): Path<String>, headers: HeaderMap) -> impl IntoResponse {
    svc.hit();
    svc.record_auth(&headers);
    if id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "template not found"})));
    }
    (StatusCode::OK, Json(svc.template.lock().unwrap().clone()))
}

async fn upload_slot(State(svc): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    svc.hit();
    svc.record_auth(&headers);
    if svc.reject_slot.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "storage unavailable"})));
    }
    if body.get("expireSec") != Some(&json!(3600)) {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "expireSec required"})));
    }
    let n = svc.slots_issued.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("res-{}", n);
    let base = svc.base_url.lock().unwrap().clone();
    (
        StatusCode::OK,
        Json(json!({
            "resourceId": id,
            "putUrl": format!("{}/upload/{}", base, id),
            "headers": {"Content-Type": "image/png", "x-amz-meta-origin": "slot-header"}
        })),
    )
}

async fn put_upload(
    State(svc): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    svc.hit();
    if svc.reject_put.load(Ordering::SeqCst) {
        return StatusCode::FORBIDDEN;
    }
    svc.uploads.lock().unwrap().push(Upload {
        resource_id: id,
        headers,
        body: body.to_vec(),
    });
    StatusCode::OK
}

async fn submit_job(State(svc): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    svc.hit();
    svc.record_auth(&headers);
    svc.submissions.lock().unwrap().push(body);
    if svc.reject_submit.load(Ordering::SeqCst) {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": "unknown templateId"})));
    }
    if svc.submit_without_job.load(Ordering::SeqCst) {
        return (StatusCode::OK, Json(json!({"code": 400, "message": "invalid template"})));
    }
    (StatusCode::OK, Json(json!({"job": {"id": "job-1", "status": "PENDING"}})))
}

async fn poll_job(State(svc): State<Shared>, Path(id): Path<String>, headers: HeaderMap) -> impl IntoResponse {
    svc.hit();
    svc.record_auth(&headers);
    svc.polls.fetch_add(1, Ordering::SeqCst);
    if id != "job-1" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "no such job"})));
    }
    if svc.omit_job_once.swap(false, Ordering::SeqCst) {
        return (StatusCode::OK, Json(json!({"message": "busy"})));
    }
    let status = svc
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| "RUNNING".to_string());
    let body = if status == "SUCCESS" {
        json!({"job": {"id": id, "status": status, "successInfo": {"images": [{"url": svc.image_url()}]}}})
    } else {
        json!({"job": {"id": id, "status": status}})
    };
    (StatusCode::OK, Json(body))
}

async fn download(State(svc): State<Shared>, Path(name): Path<String>) -> impl IntoResponse {
    svc.hit();
    let n = svc.downloads.fetch_add(1, Ordering::SeqCst) + 1;
    if name == "gone.png" {
        return (StatusCode::GONE, Vec::new());
    }
    (StatusCode::OK, format!("png-bytes-{}", n).into_bytes())
}

/// Start the fake service; returns it and its base URL.
pub async fn spawn_service() -> (Shared, String) {
    let svc: Shared = Arc::new(FakeService::default());
    svc.set_template(json!([]));

    let app = Router::new()
        .route("/v1/workflows/:id", get(get_template))
        .route("/v1/resource/image", post(upload_slot))
        .route("/upload/:id", put(put_upload))
        .route("/v1/jobs/workflow/template", post(submit_job))
        .route("/v1/jobs/:id", get(poll_job))
        .route("/images/:name", get(download))
        .with_state(svc.clone());

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let server = axum::Server::from_tcp(listener)
        .expect("server from listener")
        .serve(app.into_make_service());
    tokio::spawn(server);

    let base = format!("http://{}", addr);
    *svc.base_url.lock().unwrap() = base.clone();
    (svc, base)
}

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(10),
        timeout: Some(Duration::from_secs(10)),
        max_attempts: None,
    }
}

pub fn client_for(base: &str, output_dir: &std::path::Path) -> ApiClient {
    ApiClient::new(
        Config::new(base, TOKEN)
            .with_output_dir(output_dir)
            .with_poll_policy(fast_poll()),
    )
}

pub fn write_file(dir: &std::path::Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

pub fn field_attrs(submission: &Value) -> HashMap<(String, String), Value> {
    submission["fields"]["fieldAttrs"]
        .as_array()
        .expect("fieldAttrs array")
        .iter()
        .map(|f| {
            (
                (
                    f["nodeId"].as_str().unwrap_or_default().to_string(),
                    f["fieldName"].as_str().unwrap_or_default().to_string(),
                ),
                f["fieldValue"].clone(),
            )
        })
        .collect()
}
