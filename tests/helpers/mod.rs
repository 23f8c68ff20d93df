//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing;
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use caption_queue::app_state::AppState;
use caption_queue::models::job::CaptionResult;
use caption_queue::routes;
use caption_queue::services::captioner::{Captioner, InferenceError, ModelHandle, ModelLoader};
use caption_queue::services::normalizer::{DecodedImage, InputNormalizer};
use caption_queue::services::queue::JobStore;
use caption_queue::services::worker::Worker;

pub const CAT_CAPTION: &str = "a cat sitting on a chair";

/// PNG-encoded solid image of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([90, 60, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("PNG encoding should succeed");
    out.into_inner()
}

pub fn png_base64(width: u32, height: u32) -> String {
    base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height))
}

/// Serve `/cat.png` from a local HTTP server; any other path is a 404.
pub async fn serve_image(png: Vec<u8>) -> SocketAddr {
    let app = Router::new().route(
        "/cat.png",
        routing::get(move || {
            let png = png.clone();
            async move { ([(header::CONTENT_TYPE, "image/png")], png).into_response() }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test image server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

/// Captioner that always returns the same text, optionally after a delay.
pub struct FixedCaptioner {
    pub caption: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Captioner for FixedCaptioner {
    async fn caption(&self, image: &DecodedImage) -> Result<CaptionResult, InferenceError> {
        tokio::time::sleep(self.delay).await;
        Ok(CaptionResult {
            caption: self.caption.to_string(),
            width: image.width(),
            height: image.height(),
        })
    }
}

pub struct FixedLoader {
    pub delay: Duration,
}

#[async_trait]
impl ModelLoader for FixedLoader {
    async fn load(&self) -> Result<Arc<dyn Captioner>, InferenceError> {
        Ok(Arc::new(FixedCaptioner {
            caption: CAT_CAPTION,
            delay: self.delay,
        }))
    }
}

pub fn test_worker(store: Arc<dyn JobStore>, inference_delay: Duration) -> Worker {
    Worker::new(
        store,
        Arc::new(
            InputNormalizer::new(Duration::from_secs(2), 10 * 1024 * 1024)
                .expect("HTTP client should build"),
        ),
        Arc::new(ModelHandle::new(FixedLoader {
            delay: inference_delay,
        })),
    )
}

/// Gateway router backed by `store`, with a private metrics recorder.
pub fn test_app(store: Arc<dyn JobStore>) -> Router {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    routes::router(AppState::new(store, 10 * 1024 * 1024), Arc::new(handle))
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

const BOUNDARY: &str = "caption-test-boundary";

/// Multipart part: (field name, optional filename, content).
pub type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

pub fn post_multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("valid request")
}

pub async fn body_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
