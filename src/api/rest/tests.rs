use super::stream_controller::{FRAME_RECEIVED_HEADER, FRAME_SEQUENCE_HEADER};
use super::{router, AppState};
use crate::config::{AlertConfig, ApiConfig, Config, DatabaseConfig};
use crate::db::repositories::EventsRepository;
use crate::db::DatabaseService;
use crate::error::Error;
use crate::messaging::WhatsAppNotifier;
use crate::services::frame_buffer::tests::encoded;
use crate::services::{ChatProvider, ChatRelay, EventGateway, FrameBuffer, StreamPublisher};
use crate::test_support::unreachable_url;
use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use hyper::body::HttpBody;
use image::ImageFormat;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct CannedChat;

#[async_trait]
impl ChatProvider for CannedChat {
    fn name(&self) -> &str {
        "Canned"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt == "fail" {
            return Err(Error::ChatProvider("quota exceeded".to_string()).into());
        }
        Ok(format!("You asked: {}", prompt))
    }
}

struct TestApp {
    _dir: TempDir,
    app: Router,
    db: Arc<DatabaseService>,
    frames: FrameBuffer,
}

async fn test_app() -> Result<TestApp> {
    test_app_with(ApiConfig::default()).await
}

/// Relay wired like production, with the alert endpoint pointing nowhere
async fn test_app_with(api: ApiConfig) -> Result<TestApp> {
    let dir = TempDir::new()?;
    let config = Config {
        api,
        database: DatabaseConfig {
            path: dir.path().join("events.db"),
            ..DatabaseConfig::default()
        },
        alerts: AlertConfig {
            api_url: Some(unreachable_url()),
            api_token: Some("token".to_string()),
            timeout_ms: 500,
            ..AlertConfig::default()
        },
        ..Config::default()
    };

    let db = Arc::new(DatabaseService::new(&config.database).await?);
    let frames = FrameBuffer::new(config.streaming.jpeg_quality);
    let gateway = EventGateway::new(
        EventsRepository::new(db.pool.clone()),
        frames.clone(),
        Arc::new(WhatsAppNotifier::new(&config.alerts)?),
        &config.events,
    );
    let state = AppState {
        db: db.clone(),
        gateway,
        frames: frames.clone(),
        publisher: StreamPublisher::new(frames.clone(), &config.streaming),
        chat: ChatRelay::new(Arc::new(CannedChat)),
    };

    Ok(TestApp {
        _dir: dir,
        app: router(state, &config.api),
        db,
        frames,
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

#[tokio::test]
async fn intrusion_scenario() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send(
        &t.app,
        post_json(
            "/event",
            json!({"event_type": "intrusion", "confidence": 0.87, "bbox": [1, 2, 3, 4]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "event_id": 1}));

    let (status, body) = send(&t.app, get("/events/recent?limit=1")).await?;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(event["timestamp"].is_i64());
    let mut without_timestamp = event.clone();
    without_timestamp.as_object_mut().unwrap().remove("timestamp");
    assert_eq!(
        without_timestamp,
        json!({
            "id": 1,
            "event_type": "intrusion",
            "confidence": 0.87,
            "bbox": [1, 2, 3, 4],
            "source": "camera1",
            "meta": {}
        })
    );
    Ok(())
}

#[tokio::test]
async fn recent_defaults_to_newest_first() -> Result<()> {
    let t = test_app().await?;

    for i in 1..=5 {
        let (status, _) = send(
            &t.app,
            post_json(
                "/event",
                json!({
                    "event_type": format!("e{}", i),
                    "confidence": 0.5,
                    "bbox": [10, 20, 30, 40],
                    "source": "lobby-cam",
                    "meta": {"camera": "lobby"}
                }),
            ),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&t.app, get("/events/recent")).await?;
    let events = body["events"].as_array().unwrap();
    let types: Vec<_> = events.iter().map(|e| e["event_type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["e5", "e4", "e3", "e2", "e1"]);
    assert_eq!(events[0]["meta"], json!({"camera": "lobby"}));
    assert_eq!(events[0]["bbox"], json!([10, 20, 30, 40]));
    assert_eq!(events[0]["source"], json!("lobby-cam"));
    Ok(())
}

#[tokio::test]
async fn invalid_event_bodies_are_rejected() -> Result<()> {
    let t = test_app().await?;

    let bad = [
        json!({"confidence": 0.5, "bbox": []}),
        json!({"event_type": "x", "confidence": "high", "bbox": []}),
        json!({"event_type": "x", "confidence": 0.5, "bbox": "1,2,3,4"}),
        json!({"event_type": "x", "confidence": 0.5, "bbox": [], "meta": [1]}),
    ];
    for body in bad {
        let (status, error) = send(&t.app, post_json("/event", body)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["status"], json!(400));
    }

    let (status, _) = send(&t.app, get("/events/recent?limit=-5")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&t.app, get("/events/recent?limit=many")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&t.app, get("/events/recent")).await?;
    assert_eq!(body["events"], json!([]));
    Ok(())
}

#[tokio::test]
async fn frame_upload_and_snapshot() -> Result<()> {
    let t = test_app().await?;

    let (status, _) = send(&t.app, get("/frame/latest")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, post_json("/frame", json!({"image": "@@@"}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&t.app, post_json("/frame", json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(t.frames.current().is_none());

    let image = base64::engine::general_purpose::STANDARD
        .encode(encoded(20, 10, [0, 128, 255], ImageFormat::Jpeg));
    let (status, body) = send(&t.app, post_json("/frame", json!({"image": image}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let response = t.app.clone().oneshot(get("/frame/latest")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let current = t.frames.current().unwrap();
    assert_eq!(
        response.headers()[FRAME_SEQUENCE_HEADER],
        current.sequence().to_string().as_str()
    );
    let received_at = response.headers()[FRAME_RECEIVED_HEADER].to_str()?;
    assert_eq!(
        chrono::DateTime::parse_from_rfc3339(received_at)?,
        current.received_at()
    );
    let jpeg = hyper::body::to_bytes(response.into_body()).await?;
    let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?;
    assert_eq!((decoded.width(), decoded.height()), (20, 10));
    Ok(())
}

/// Incompressible RGB noise, so the PNG stays close to its raw size
fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let image = image::RgbImage::from_fn(width, height, |_, _| {
        let mut channel = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        };
        image::Rgb([channel(), channel(), channel()])
    });
    let mut buf = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[tokio::test]
async fn large_frames_are_accepted() -> Result<()> {
    let t = test_app().await?;

    let image = base64::engine::general_purpose::STANDARD.encode(noise_png(1000, 1000));
    assert!(image.len() > 2 * 1024 * 1024);

    let (status, body) = send(&t.app, post_json("/frame", json!({"image": image}))).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let current = t.frames.current().unwrap();
    assert_eq!((current.width(), current.height()), (1000, 1000));
    Ok(())
}

#[tokio::test]
async fn oversized_frame_body_is_payload_too_large() -> Result<()> {
    let t = test_app_with(ApiConfig {
        max_frame_bytes: 1024,
        ..ApiConfig::default()
    })
    .await?;

    let image = base64::engine::general_purpose::STANDARD.encode(noise_png(32, 32));
    assert!(image.len() > 1024);

    let (status, body) = send(&t.app, post_json("/frame", json!({"image": image}))).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["status"], json!(413));
    assert!(t.frames.current().is_none());
    Ok(())
}

#[tokio::test]
async fn storage_failure_is_a_server_error() -> Result<()> {
    let t = test_app().await?;

    sqlx::query("DROP TABLE events").execute(&*t.db.pool).await?;

    let (status, body) = send(
        &t.app,
        post_json(
            "/event",
            json!({"event_type": "intrusion", "confidence": 0.9, "bbox": [1, 2, 3, 4]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], json!(500));
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Database error"));

    let (status, body) = send(&t.app, get("/events/recent")).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], json!(500));

    // the process keeps serving other routes
    let (status, _) = send(&t.app, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn null_source_is_rejected() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send(
        &t.app,
        post_json(
            "/event",
            json!({"event_type": "fall", "confidence": 0.4, "bbox": [], "source": null}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], json!(400));

    let (_, body) = send(&t.app, get("/events/recent")).await?;
    assert_eq!(body["events"], json!([]));
    Ok(())
}

#[tokio::test]
async fn video_streams_multipart_frames() -> Result<()> {
    let t = test_app().await?;

    let response = t.app.clone().oneshot(get("/video")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    let mut body = response.into_body();

    // no frame yet: the stream stays silent
    assert!(tokio::time::timeout(Duration::from_millis(100), body.data())
        .await
        .is_err());

    let image = base64::engine::general_purpose::STANDARD
        .encode(encoded(6, 6, [255, 255, 0], ImageFormat::Png));
    send(&t.app, post_json("/frame", json!({"image": image}))).await?;

    let chunk = tokio::time::timeout(Duration::from_secs(5), body.data())
        .await?
        .unwrap()?;
    assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    assert!(chunk.ends_with(b"\r\n"));
    assert_eq!(t.frames.viewer_count(), 1);

    drop(body);
    assert_eq!(t.frames.viewer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn event_succeeds_when_alert_provider_is_down() -> Result<()> {
    let t = test_app().await?;

    let mut last = 0;
    for _ in 0..3 {
        let (status, body) = send(
            &t.app,
            post_json(
                "/event",
                json!({"event_type": "fire", "confidence": 0.99, "bbox": [0, 0, 1, 1]}),
            ),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let id = body["event_id"].as_i64().unwrap();
        assert!(id > last);
        last = id;
    }
    Ok(())
}

#[tokio::test]
async fn chat_replies_even_when_provider_fails() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send(&t.app, post_json("/chat", json!({"text": "status?"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"reply": "You asked: status?"}));

    let (status, body) = send(&t.app, post_json("/chat", json!({"text": "fail"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["reply"],
        json!("Canned Error: quota exceeded")
    );

    let (status, _) = send(&t.app, post_json("/chat", json!({"message": "hi"}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn health_reports_components() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send(&t.app, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "ok", "database": true, "has_frame": false, "viewers": 0})
    );
    Ok(())
}

#[tokio::test]
async fn cors_allows_any_origin() -> Result<()> {
    let t = test_app().await?;

    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://dashboard.local")
        .body(Body::empty())?;
    let response = t.app.clone().oneshot(request).await?;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    Ok(())
}
