use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image_processing::{ExtractedImage, JPEG_MIME};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::ImageFormat;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Multipart field the service reads the upload from.
pub const UPLOAD_FIELD: &str = "file";

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Image generated successfully!";

/// Image-to-image models hosted by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Face2Comic,
    Comic2Face,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Face2Comic, Model::Comic2Face];

    /// Path segment used in the service's routes.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Face2Comic => "face2comic",
            Self::Comic2Face => "comic2face",
        }
    }

    /// File name the upload is sent under.
    pub fn upload_file_name(&self) -> &'static str {
        match self {
            Self::Face2Comic => "image.jpg",
            Self::Comic2Face => "comic.jpg",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Face2Comic => "Transform photos into comic-style illustrations",
            Self::Comic2Face => "Transform comic-style illustrations into realistic faces",
        }
    }

    fn route(&self, action: &str) -> String {
        format!("/api/{}/{}", self.slug(), action)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Model {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.slug() == wanted)
            .ok_or_else(|| AppError::config(format!("Unknown model '{}' (expected face2comic or comic2face)", s)))
    }
}

/// Body of a `generate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<GenerateData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateData {
    /// Base64 encoded result image.
    #[serde(default)]
    pub image: String,
}

/// Body of a `status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A decoded result image.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub message: String,
    /// Detected from content; `None` if unrecognised.
    pub format: Option<ImageFormat>,
}

impl GeneratedImage {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    /// File extension matching the detected format, `jpg` by default.
    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg")
    }
}

/// Validates a `generate` response body and decodes its image.
///
/// A response is usable only when `status` is `"success"` and it carries a
/// non-empty `data.image`.
pub fn parse_generate_response(body: &str) -> Result<GeneratedImage> {
    let response: GenerateResponse = serde_json::from_str(body)?;

    let image = match (&response.status[..], response.data) {
        ("success", Some(data)) if !data.image.trim().is_empty() => data.image,
        (status, _) => {
            let detail = if response.message.is_empty() {
                format!("status '{}' without an image", status)
            } else {
                format!("status '{}': {}", status, response.message)
            };
            return Err(AppError::invalid_response(detail));
        }
    };

    let bytes = BASE64.decode(image.trim())?;
    let message = if response.message.is_empty() {
        DEFAULT_SUCCESS_MESSAGE.to_string()
    } else {
        response.message
    };

    Ok(GeneratedImage {
        format: image::guess_format(&bytes).ok(),
        bytes,
        message,
    })
}

/// Client for the remote generation service.
///
/// One request per call: no retries, no caching.
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GenerationClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `route` to the base URL, keeping any path prefix the base has.
    pub fn endpoint(&self, route: &str) -> Result<Url> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), route);
        Url::parse(&joined).map_err(|e| AppError::config(format!("Invalid endpoint URL '{}': {}", joined, e)))
    }

    /// Lists the models the service exposes. The payload is passed through as-is.
    pub async fn models(&self) -> Result<serde_json::Value> {
        let url = self.endpoint("/models")?;
        log::info!("GET {}", url);
        let response = self.http.get(url).header(CONTENT_TYPE, "application/json").send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Asks whether `model` is loaded and ready.
    pub async fn status(&self, model: Model) -> Result<ModelStatus> {
        let url = self.endpoint(&model.route("status"))?;
        log::info!("GET {}", url);
        let response = self.http.get(url).header(CONTENT_TYPE, "application/json").send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Asks the service to load `model`.
    pub async fn setup(&self, model: Model) -> Result<serde_json::Value> {
        let url = self.endpoint(&model.route("setup"))?;
        log::info!("POST {}", url);
        let response = self.http.post(url).header(CONTENT_TYPE, "application/json").send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Uploads a cropped image to `model` and returns the decoded result.
    ///
    /// # Errors
    ///
    /// - [`AppError::Request`] on transport failure or timeout
    /// - [`AppError::Http`] on a non-success status
    /// - [`AppError::InvalidResponse`] if the body is not a successful result
    pub async fn generate(&self, model: Model, image: &ExtractedImage) -> Result<GeneratedImage> {
        let url = self.endpoint(&model.route("generate"))?;
        log::info!(
            "POST {} ({}x{}, {} bytes)",
            url,
            image.width,
            image.height,
            image.bytes.len()
        );

        let part = Part::bytes(image.bytes.clone())
            .file_name(model.upload_file_name())
            .mime_str(JPEG_MIME)?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self.http.post(url).multipart(form).send().await?;
        let body = Self::check(response).await?.text().await?;

        let generated = parse_generate_response(&body)?;
        log::info!("{} returned {} bytes: {}", model, generated.bytes.len(), generated.message);
        Ok(generated)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        log::error!("Service returned {}: {}", status, body);
        Err(AppError::Http { status: status.as_u16() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn client_for(url: &str) -> GenerationClient {
        let config = Config::from_lookup(|key| (key == "KAPROS_API_URL").then(|| url.to_string())).unwrap();
        GenerationClient::new(&config).unwrap()
    }

    #[test]
    fn routes_follow_service_layout() {
        let client = client_for("https://kaitdev-api-model-ai.hf.space");
        assert_eq!(
            client.endpoint(&Model::Comic2Face.route("generate")).unwrap().as_str(),
            "https://kaitdev-api-model-ai.hf.space/api/comic2face/generate"
        );
        assert_eq!(
            client.endpoint(&Model::Face2Comic.route("status")).unwrap().as_str(),
            "https://kaitdev-api-model-ai.hf.space/api/face2comic/status"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = client_for("http://localhost:8000/proxy/");
        assert_eq!(
            client.endpoint("/models").unwrap().as_str(),
            "http://localhost:8000/proxy/models"
        );
    }

    #[test]
    fn model_names_round_trip_through_text() {
        for model in Model::ALL {
            assert_eq!(model.to_string().parse::<Model>().unwrap(), model);
        }
        assert_eq!("Comic2Face".parse::<Model>().unwrap(), Model::Comic2Face);
        assert!("face2face".parse::<Model>().is_err());
        assert_eq!(Model::Comic2Face.upload_file_name(), "comic.jpg");
        assert_eq!(Model::Face2Comic.upload_file_name(), "image.jpg");
    }

    #[test]
    fn parses_successful_response() {
        let png_magic = BASE64.encode([0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let body = format!(
            r#"{{"status":"success","message":"done","data":{{"image":"{}"}}}}"#,
            png_magic
        );
        let result = parse_generate_response(&body).unwrap();
        assert_eq!(result.message, "done");
        assert_eq!(result.format, Some(ImageFormat::Png));
        assert_eq!(result.extension(), "png");
    }

    #[test]
    fn empty_message_gets_default() {
        let body = r#"{"status":"success","message":"","data":{"image":"AAAA"}}"#;
        let result = parse_generate_response(body).unwrap();
        assert_eq!(result.message, DEFAULT_SUCCESS_MESSAGE);
        assert_eq!(result.bytes, vec![0, 0, 0]);
        assert_eq!(result.extension(), "jpg");
    }

    #[test]
    fn rejects_non_success_status() {
        let body = r#"{"status":"error","message":"model not loaded","data":{"image":"AAAA"}}"#;
        match parse_generate_response(body) {
            Err(AppError::InvalidResponse(msg)) => assert!(msg.contains("model not loaded")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_or_empty_image() {
        for body in [
            r#"{"status":"success","message":"ok"}"#,
            r#"{"status":"success","message":"ok","data":{}}"#,
            r#"{"status":"success","message":"ok","data":{"image":""}}"#,
        ] {
            assert!(matches!(parse_generate_response(body), Err(AppError::InvalidResponse(_))), "{}", body);
        }
    }

    #[test]
    fn bad_base64_and_bad_json_are_reported() {
        let body = r#"{"status":"success","message":"ok","data":{"image":"@@@"}}"#;
        assert!(matches!(parse_generate_response(body), Err(AppError::Base64(_))));
        assert!(matches!(parse_generate_response("<html>"), Err(AppError::Json(_))));
    }

    #[test]
    fn status_message_is_optional() {
        let status: ModelStatus = serde_json::from_str(r#"{"status":"ready"}"#).unwrap();
        assert_eq!(status, ModelStatus { status: "ready".into(), message: None });
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Reads one HTTP/1.1 request, headers plus body.
    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = find(&buf, b"\r\n\r\n") else { continue };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let received = buf.len() - (end + 4);
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());

            let complete = match content_length {
                Some(len) => received >= len,
                None if head.contains("transfer-encoding: chunked") => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                break;
            }
        }
        buf
    }

    /// Answers a single request with `status` and a JSON `body`, handing
    /// back the raw request text.
    async fn serve_once(status: &'static str, body: String) -> (GenerationClient, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });

        let config = Config::from_lookup(|key| (key == "KAPROS_API_URL").then(|| format!("http://{}", addr))).unwrap();
        let client = GenerationClient {
            http: reqwest::Client::builder().no_proxy().timeout(config.timeout).build().unwrap(),
            base_url: config.api_url,
        };
        (client, handle)
    }

    fn sample_upload() -> ExtractedImage {
        ExtractedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 0xFF, 0xD9],
            width: 2,
            height: 2,
        }
    }

    #[tokio::test]
    async fn generate_posts_multipart_file_field() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let body = format!(
            r#"{{"status":"success","message":"ok","data":{{"image":"{}"}}}}"#,
            BASE64.encode(png)
        );
        let (client, server) = serve_once("200 OK", body).await;

        let result = client.generate(Model::Comic2Face, &sample_upload()).await.unwrap();
        assert_eq!(result.bytes, png.to_vec());
        assert_eq!(result.message, "ok");

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/comic2face/generate HTTP/1.1"), "{}", request);
        assert!(lower.contains("content-type: multipart/form-data; boundary="), "{}", request);
        assert!(lower.contains(r#"name="file"; filename="comic.jpg""#), "{}", request);
        assert!(lower.contains("content-type: image/jpeg"), "{}", request);
    }

    #[tokio::test]
    async fn face2comic_upload_uses_its_file_name() {
        let body = r#"{"status":"success","message":"","data":{"image":"AAAA"}}"#.to_string();
        let (client, server) = serve_once("200 OK", body).await;

        client.generate(Model::Face2Comic, &sample_upload()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/face2comic/generate "), "{}", request);
        assert!(request.to_ascii_lowercase().contains(r#"name="file"; filename="image.jpg""#), "{}", request);
    }

    #[tokio::test]
    async fn non_success_status_maps_to_http_error() {
        let (client, server) = serve_once("503 Service Unavailable", r#"{"detail":"loading"}"#.to_string()).await;

        let result = client.generate(Model::Comic2Face, &sample_upload()).await;
        assert!(matches!(result, Err(AppError::Http { status: 503 })), "{:?}", result);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn status_queries_model_route() {
        let (client, server) = serve_once("200 OK", r#"{"status":"ready","message":"loaded"}"#.to_string()).await;

        let status = client.status(Model::Face2Comic).await.unwrap();
        assert_eq!(status, ModelStatus { status: "ready".into(), message: Some("loaded".into()) });

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/face2comic/status HTTP/1.1"), "{}", request);
    }

    #[tokio::test]
    async fn setup_posts_to_model_route() {
        let (client, server) = serve_once("200 OK", r#"{"status":"ok"}"#.to_string()).await;

        let response = client.setup(Model::Comic2Face).await.unwrap();
        assert_eq!(response["status"], "ok");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/comic2face/setup HTTP/1.1"), "{}", request);
    }
}
