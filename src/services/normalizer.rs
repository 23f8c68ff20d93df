use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use reqwest::{Client, StatusCode, Url};
use std::io::Cursor;
use std::time::Duration;

/// Reason recorded when a remote image cannot be obtained.
pub const DOWNLOAD_FAILED: &str = "could not download image";
/// Reason recorded when an inline payload is not a decodable image.
pub const PAYLOAD_INVALID: &str = "could not decode payload";

/// Decoded 3-channel image handed to the captioner.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    /// Decode any supported format and convert it to RGB.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self {
            pixels: decoded.to_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[cfg(test)]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Re-encode as PNG for transport to an inference backend.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.pixels.clone()).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Where a raw job input points.
#[derive(Debug, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// An http(s) URL to download.
    Remote(Url),
    /// Base64 image bytes, with any `data:` prefix already stripped.
    Inline(&'a str),
}

/// Classify a job input.
///
/// A URL scheme is checked first: standard base64 has no `:`, so anything that
/// parses as an absolute URL cannot be an inline payload. `data:` URIs are
/// unwrapped to their base64 body.
pub fn classify(raw: &str) -> Result<ImageSource<'_>, DecodeError> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix("data:") {
        return match rest.split_once(',') {
            Some((header, body)) if header.ends_with(";base64") => Ok(ImageSource::Inline(body)),
            _ => Err(DecodeError::MalformedDataUri),
        };
    }

    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(ImageSource::Remote(url)),
        Ok(url) => Err(DecodeError::UnsupportedScheme(url.scheme().to_string())),
        Err(_) => Ok(ImageSource::Inline(raw)),
    }
}

/// Turns a job input into a decoded image.
pub struct InputNormalizer {
    http: Client,
    max_bytes: usize,
}

impl InputNormalizer {
    /// Fails only if the HTTP client cannot be built, which is a startup error.
    pub fn new(fetch_timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self { http, max_bytes })
    }

    pub async fn normalize(&self, raw: &str) -> Result<DecodedImage, DecodeError> {
        match classify(raw)? {
            ImageSource::Remote(url) => {
                tracing::info!(url = %url, "Downloading image");
                let bytes = self.fetch(url).await?;
                DecodedImage::from_bytes(&bytes).map_err(DecodeError::RemoteImage)
            }
            ImageSource::Inline(payload) => {
                tracing::info!(len = payload.len(), "Loading image from inline payload");
                decode_inline(payload)
            }
        }
    }

    /// Single attempt, bounded by the client timeout. The body is read in
    /// chunks and abandoned as soon as it passes `max_bytes`.
    async fn fetch(&self, url: Url) -> Result<Vec<u8>, DecodeError> {
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(DecodeError::Fetch)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DecodeError::Status {
                url: url.to_string(),
                status,
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(DecodeError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(DecodeError::Fetch)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(DecodeError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Strict base64 (canonical padding, whitespace ignored) followed by a full
/// image decode. Alphabet-valid text that is not an image is rejected here.
pub fn decode_inline(payload: &str) -> Result<DecodedImage, DecodeError> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    DecodedImage::from_bytes(&bytes).map_err(DecodeError::InlineImage)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Image download failed: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("Image download from {url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("Image exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Downloaded content is not a supported image: {0}")]
    RemoteImage(#[source] image::ImageError),

    #[error("Malformed data URI")]
    MalformedDataUri,

    #[error("Empty inline payload")]
    EmptyPayload,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Inline payload is not a supported image: {0}")]
    InlineImage(#[source] image::ImageError),
}

impl DecodeError {
    /// Short machine-readable reason stored on the failed job.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Fetch(_)
            | DecodeError::Status { .. }
            | DecodeError::TooLarge { .. }
            | DecodeError::UnsupportedScheme(_)
            | DecodeError::RemoteImage(_) => DOWNLOAD_FAILED,
            DecodeError::MalformedDataUri
            | DecodeError::EmptyPayload
            | DecodeError::Base64(_)
            | DecodeError::InlineImage(_) => PAYLOAD_INVALID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing, Router};
    use std::net::SocketAddr;

    fn png_base64(width: u32, height: u32) -> String {
        let image = RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let png = DecodedImage { pixels: image }.to_png().unwrap();
        base64::engine::general_purpose::STANDARD.encode(png)
    }

    #[test]
    fn test_classify_http_url_as_remote() {
        let source = classify("https://example.com/cat.jpg").unwrap();
        assert!(matches!(source, ImageSource::Remote(url) if url.host_str() == Some("example.com")));
    }

    #[test]
    fn test_classify_base64_as_inline() {
        assert_eq!(classify("aGVsbG8=").unwrap(), ImageSource::Inline("aGVsbG8="));
    }

    #[test]
    fn test_classify_alphabet_only_url_lookalike_is_not_remote() {
        // No scheme, so it never goes to the network; it fails as a payload.
        let source = classify("examplecomcatjpg").unwrap();
        assert_eq!(source, ImageSource::Inline("examplecomcatjpg"));
        assert_eq!(decode_inline("examplecomcatjpg").unwrap_err().reason(), PAYLOAD_INVALID);
    }

    #[test]
    fn test_classify_data_uri() {
        let source = classify("data:image/png;base64,AAAA").unwrap();
        assert_eq!(source, ImageSource::Inline("AAAA"));

        let err = classify("data:text/plain,hello").unwrap_err();
        assert_eq!(err.reason(), PAYLOAD_INVALID);
    }

    #[test]
    fn test_classify_other_scheme_rejected() {
        let err = classify("ftp://example.com/cat.jpg").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedScheme(ref s) if s == "ftp"));
        assert_eq!(err.reason(), DOWNLOAD_FAILED);
    }

    #[test]
    fn test_decode_inline_png_keeps_dimensions() {
        let image = decode_inline(&png_base64(7, 5)).unwrap();
        assert_eq!((image.width(), image.height()), (7, 5));
    }

    #[test]
    fn test_decode_inline_ignores_line_breaks() {
        let encoded = png_base64(3, 3);
        let (head, tail) = encoded.split_at(10);
        let wrapped = format!("{head}\n{tail}\n");
        assert!(decode_inline(&wrapped).is_ok());
    }

    #[test]
    fn test_decode_inline_rejects_bad_padding() {
        let err = decode_inline("aGVsbG8").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_inline_rejects_non_image_bytes() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"just some text");
        let err = decode_inline(&encoded).unwrap_err();
        assert!(matches!(err, DecodeError::InlineImage(_)));
        assert_eq!(err.reason(), PAYLOAD_INVALID);
    }

    #[test]
    fn test_decode_inline_empty() {
        assert!(matches!(decode_inline("  \n"), Err(DecodeError::EmptyPayload)));
    }

    #[test]
    fn test_grayscale_is_normalized_to_rgb() {
        let gray = image::GrayImage::from_pixel(4, 2, image::Luma([128]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let image = DecodedImage::from_bytes(png.get_ref()).unwrap();
        assert_eq!(image.pixels().get_pixel(0, 0), &image::Rgb([128, 128, 128]));
    }

    #[tokio::test]
    async fn test_unreachable_url_is_download_failure() {
        let normalizer = InputNormalizer::new(Duration::from_secs(2), 1024).unwrap();
        let err = normalizer
            .normalize("http://127.0.0.1:1/cat.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Fetch(_)));
        assert_eq!(err.reason(), DOWNLOAD_FAILED);
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        addr
    }

    /// Body sent without a Content-Length, one chunk at a time.
    fn chunked(chunks: Vec<Vec<u8>>) -> Body {
        Body::from_stream(futures::stream::iter(
            chunks.into_iter().map(Ok::<_, std::io::Error>),
        ))
    }

    #[tokio::test]
    async fn test_declared_oversize_is_rejected() {
        let app = Router::new().route("/big.png", routing::get(|| async { vec![0u8; 4096] }));
        let addr = serve(app).await;

        let normalizer = InputNormalizer::new(Duration::from_secs(2), 1024).unwrap();
        let err = normalizer
            .normalize(&format!("http://{addr}/big.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { limit: 1024 }));
        assert_eq!(err.reason(), DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_streamed_oversize_is_rejected() {
        let app = Router::new().route(
            "/big.png",
            routing::get(|| async { chunked(vec![vec![0u8; 64 * 1024]; 64]) }),
        );
        let addr = serve(app).await;

        let normalizer = InputNormalizer::new(Duration::from_secs(2), 1024).unwrap();
        let err = normalizer
            .normalize(&format!("http://{addr}/big.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { limit: 1024 }));
        assert_eq!(err.reason(), DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_streamed_image_within_limit_is_reassembled() {
        let image = RgbImage::from_pixel(9, 4, image::Rgb([0, 90, 200]));
        let png = DecodedImage { pixels: image }.to_png().unwrap();
        let limit = png.len();

        let app = Router::new().route(
            "/cat.png",
            routing::get(move || {
                let (head, tail) = png.split_at(png.len() / 2);
                let chunks = vec![head.to_vec(), tail.to_vec()];
                async move { chunked(chunks) }
            }),
        );
        let addr = serve(app).await;

        let normalizer = InputNormalizer::new(Duration::from_secs(2), limit).unwrap();
        let image = normalizer
            .normalize(&format!("http://{addr}/cat.png"))
            .await
            .unwrap();
        assert_eq!((image.width(), image.height()), (9, 4));
    }
}
