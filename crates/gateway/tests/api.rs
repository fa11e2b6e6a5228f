use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use gateway::{AppState, GatewayConfig, router};
use image::RgbImage;
use pipeline::detector::shared;
use pipeline::notify::{LogSink, NotificationDispatcher};
use pipeline::source::SyntheticSource;
use pipeline::{
    Detector, FrameSource, LoopSettings, RawDetection, SessionController, SourceError, SourceOpener,
    SourceSpec,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "test-boundary";

struct DeerDetector;

impl Detector for DeerDetector {
    fn name(&self) -> &str {
        "deer"
    }

    fn detect(&mut self, _frame: &RgbImage, _threshold: f32) -> anyhow::Result<Vec<RawDetection>> {
        Ok(vec![RawDetection::new([4.0, 4.0, 24.0, 20.0], "deer", 0.9)])
    }
}

/// Any uploaded file decodes to ten synthetic frames, unless it starts with
/// `garbage`. Only `/dev/video0` exists, and it can be held by one source at
/// a time.
#[derive(Default)]
struct FakeOpener {
    camera_busy: Arc<AtomicBool>,
}

impl SourceOpener for FakeOpener {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        let path = match spec {
            SourceSpec::File(path) => path,
            SourceSpec::Device { index: 0, .. } => {
                if self.camera_busy.swap(true, Ordering::SeqCst) {
                    return Err(SourceError::Unavailable {
                        target: spec.description(),
                        reason: "device or resource busy".into(),
                    });
                }
                return Ok(Box::new(FakeCamera {
                    frames: SyntheticSource::new(100_000, 64, 48),
                    busy: Arc::clone(&self.camera_busy),
                    released: false,
                }));
            }
            _ => {
                return Err(SourceError::Unavailable {
                    target: spec.description(),
                    reason: "device not present".into(),
                });
            }
        };
        let contents = std::fs::read(path).map_err(|e| SourceError::Unavailable {
            target: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if contents.starts_with(b"garbage") {
            return Err(SourceError::Unavailable {
                target: path.display().to_string(),
                reason: "invalid data found when processing input".into(),
            });
        }
        Ok(Box::new(SyntheticSource::new(10, 64, 48)))
    }
}

struct FakeCamera {
    frames: SyntheticSource,
    busy: Arc<AtomicBool>,
    released: bool,
}

impl FrameSource for FakeCamera {
    fn is_ready(&self) -> bool {
        !self.released
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        self.frames.next_frame()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.busy.store(false, Ordering::SeqCst);
        }
        self.frames.release();
    }

    fn describe(&self) -> String {
        "device:/dev/video0".into()
    }
}

struct TestApp {
    app: Router,
    upload_dir: TempDir,
}

fn test_app() -> TestApp {
    let upload_dir = TempDir::new().unwrap();
    let settings = LoopSettings {
        frame_interval: Duration::from_millis(1),
        stop_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let config = GatewayConfig {
        upload_dir: upload_dir.path().to_path_buf(),
        stream_interval: Duration::from_millis(5),
        loop_settings: settings.clone(),
        ..Default::default()
    };

    let notifier = NotificationDispatcher::spawn(Arc::new(LogSink), 8).unwrap();
    let controller = SessionController::new(shared(DeerDetector), Arc::new(notifier), settings);
    let state = AppState::new(Arc::new(controller), Arc::new(FakeOpener::default()), config);

    TestApp {
        app: router(state),
        upload_dir,
    }
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", name, value).as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

async fn wait_until_finished(app: &Router) -> Value {
    for _ in 0..500 {
        let (_, status) = send_json(app, get("/status")).await;
        if status["finished"] == Value::Bool(true) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never finished");
}

#[tokio::test]
async fn health_reports_ok() {
    let test = test_app();
    let (status, body) = send(&test.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn upload_without_file_part_is_rejected() {
    let test = test_app();
    let (status, body) = send_json(&test.app, upload_request(&[Part::Text("confidence", "0.5")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file part");
}

#[tokio::test]
async fn upload_with_empty_filename_is_rejected() {
    let test = test_app();
    let (status, body) = send_json(&test.app, upload_request(&[Part::File("", b"data")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No selected file");
}

#[tokio::test]
async fn upload_with_unsupported_extension_is_rejected() {
    let test = test_app();
    let (status, body) = send_json(&test.app, upload_request(&[Part::File("notes.txt", b"hello")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not allowed"));
    assert_eq!(file_count(test.upload_dir.path()), 0);
}

#[tokio::test]
async fn upload_with_bad_sample_rate_is_rejected() {
    let test = test_app();
    let request = upload_request(&[
        Part::File("clip.mp4", b"video"),
        Part::Text("sample_rate", "0"),
    ]);
    let (status, _) = send_json(&test.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(file_count(test.upload_dir.path()), 0);
}

#[tokio::test]
async fn undecodable_upload_is_unprocessable_and_removed() {
    let test = test_app();
    let (status, body) = send_json(&test.app, upload_request(&[Part::File("clip.mp4", b"garbage bytes")])).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    assert_eq!(file_count(test.upload_dir.path()), 0);

    let (_, status) = send_json(&test.app, get("/status")).await;
    assert_eq!(status["state"], "idle");
}

#[tokio::test]
async fn queries_without_session_are_not_found() {
    let test = test_app();

    let (status, body) = send_json(&test.app, get("/detections")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No active detection session");

    let (status, _) = send_json(&test.app, get("/detections/123_0")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_when_idle_succeeds() {
    let test = test_app();
    let (status, body) = send_json(&test.app, post("/stop")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], false);
    assert_eq!(body["message"], "No active detection session");
}

#[tokio::test]
async fn stream_without_session_explains_itself() {
    let test = test_app();
    let (status, body) = send(&test.app, get("/stream")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("No active video feed"));
}

#[tokio::test]
async fn upload_runs_detection_end_to_end() {
    let test = test_app();

    let request = upload_request(&[
        Part::File("Trail.MP4", b"fake video"),
        Part::Text("confidence", "0.3"),
        Part::Text("sample_rate", "2"),
    ]);
    let (status, body) = send_json(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stream_url"], "/stream");
    assert_eq!(body["filename"], "Trail.MP4");
    let upload_id = body["upload_id"].as_str().unwrap().to_string();
    assert!(test.upload_dir.path().join(format!("{}.mp4", upload_id)).exists());

    let status = wait_until_finished(&test.app).await;
    assert_eq!(status["session_id"], upload_id.as_str());
    assert_eq!(status["frames_read"], 10);
    assert_eq!(status["frames_processed"], 5);

    let (status, list) = send_json(&test.app, get("/detections?limit=50")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 5);
    let first = &list["detections"][0];
    assert_eq!(first["class_name"], "deer");
    assert!(first["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));

    let (status, limited) = send_json(&test.app, get("/detections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(limited["count"], 5);

    let id = first["id"].as_str().unwrap();
    let (status, single) = send_json(&test.app, get(&format!("/detections/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["id"], id);

    let (status, _) = send_json(&test.app, get("/detections/0_99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, stopped) = send_json(&test.app, post("/stop")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["stopped"], true);
    assert_eq!(stopped["message"], "Detection stopped");

    let (status, _) = send_json(&test.app, get("/detections")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_with_session_serves_mjpeg() {
    let test = test_app();
    let (status, _) = send_json(&test.app, upload_request(&[Part::File("clip.webm", b"video")])).await;
    assert_eq!(status, StatusCode::OK);

    let response = test.app.clone().oneshot(get("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    drop(response);

    let (status, _) = send_json(&test.app, post("/stop")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn camera_rejects_bad_sample_rate() {
    let test = test_app();
    let (status, _) = send_json(&test.app, post("/camera?sample_rate=zero")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_camera_is_unprocessable() {
    let test = test_app();
    let (status, body) = send_json(&test.app, post("/camera?device=3")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));

    let (_, status) = send_json(&test.app, get("/status")).await;
    assert_eq!(status["state"], "idle");
}

#[tokio::test]
async fn camera_restart_releases_the_device_first() {
    let test = test_app();

    let (status, body) = send_json(&test.app, post("/camera?confidence=0.4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "device:/dev/video0");

    let (status, body) = send_json(&test.app, post("/camera")).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["session_id"], "camera-0");

    let (status, _) = send_json(&test.app, post("/stop")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stream_ends_when_session_finished_without_frames() {
    let test = test_app();
    let request = upload_request(&[
        Part::File("short.mp4", b"video"),
        Part::Text("sample_rate", "100"),
    ]);
    let (status, _) = send_json(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let status = wait_until_finished(&test.app).await;
    assert_eq!(status["has_frame"], false);

    let (status, body) = tokio::time::timeout(Duration::from_secs(5), send(&test.app, get("/stream")))
        .await
        .expect("stream should end on its own");
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}
