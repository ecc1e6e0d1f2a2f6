use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, error, info};

use super::wire::{AskBody, AskReply, ErrorReply, UploadReply};
use super::{AgentBackend, AskRequest, ProgressSink};
use crate::error::GatewayError;
use crate::upload::FileUpload;

/// Upload bodies are streamed in chunks of this size so progress can be reported.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Talks to the agent proxy over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl AgentBackend for HttpGateway {
    async fn ask(&self, request: AskRequest) -> Result<String, GatewayError> {
        let body = AskBody {
            function_id: request.function_id,
            content: request.content.trim().to_string(),
            api_key: request.api_key,
            file_id: request.file_id,
            deep_thinking: request.deep_thinking,
        };

        debug!("-> ask [{}] file={:?}", body.function_id, body.file_id);

        let response = self
            .client
            .post(self.url("ask"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(&text)
                .unwrap_or_else(|| format!("status code {}", status.as_u16()));
            error!("ask [{}] failed: {}", body.function_id, message);
            return Err(GatewayError::RequestFailed(message));
        }

        let reply: AskReply = serde_json::from_str(&text).map_err(|e| {
            error!("ask [{}] returned an unreadable body: {}", body.function_id, e);
            GatewayError::RequestFailed(format!("unreadable response: {}", e))
        })?;

        if let Some(code) = reply.error_code() {
            let message = reply.message.unwrap_or_else(|| "request failed".into());
            error!("ask [{}] rejected: {} ({})", body.function_id, message, code);
            return Err(GatewayError::RequestFailed(format!("{}: {}", code, message)));
        }

        let content = reply
            .content
            .ok_or_else(|| GatewayError::RequestFailed("response has no content".into()))?;

        debug!("<- ask [{}] {} chars", body.function_id, content.len());
        Ok(content)
    }

    async fn upload_file(
        &self,
        file: &FileUpload,
        api_key: &str,
        user_id: &str,
        progress: ProgressSink,
    ) -> Result<String, GatewayError> {
        info!("Uploading {} ({} bytes)", file.name, file.size());

        let total = file.size();
        let chunks = chunked(&file.bytes);
        progress(0);

        // Each chunk reports the cumulative share of the file once it is handed
        // to the transport.
        let body = stream::iter(chunks).map(move |(end, chunk)| {
            let percent = if total == 0 { 100 } else { (end * 100 / total) as u8 };
            progress(percent);
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;

        let form = Form::new()
            .part("file", part)
            .text("apiKey", api_key.to_string())
            .text("userId", user_id.to_string());

        let response = self
            .client
            .post(self.url("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(&text)
                .unwrap_or_else(|| format!("status code {}", status.as_u16()));
            error!("Upload of {} failed: {}", file.name, message);
            return Err(GatewayError::UploadFailed(message));
        }

        let reply: UploadReply = serde_json::from_str(&text)
            .map_err(|e| GatewayError::UploadFailed(format!("unreadable response: {}", e)))?;

        if reply.success == Some(false) {
            let message = reply.message.unwrap_or_else(|| "upload rejected".into());
            error!("Upload of {} rejected: {}", file.name, message);
            return Err(GatewayError::UploadFailed(message));
        }

        let file_id = reply.file_id().ok_or(GatewayError::MissingFileId)?;
        info!("Uploaded {} as {}", file.name, file_id);
        Ok(file_id)
    }
}

/// Split a buffer into owned chunks tagged with the byte offset they end at.
fn chunked(bytes: &[u8]) -> Vec<(u64, Vec<u8>)> {
    let mut end = 0u64;
    bytes
        .chunks(UPLOAD_CHUNK)
        .map(|chunk| {
            end += chunk.len() as u64;
            (end, chunk.to_vec())
        })
        .collect()
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorReply>(body)
        .ok()
        .and_then(|reply| reply.message)
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Multipart, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(base, Duration::from_secs(5)).unwrap()
    }

    fn request(content: &str) -> AskRequest {
        AskRequest {
            function_id: "writing".into(),
            content: content.into(),
            api_key: "app-1".into(),
            file_id: None,
            deep_thinking: Some(true),
        }
    }

    fn no_progress() -> ProgressSink {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn ask_sends_contract_body_and_returns_content() {
        let seen = Arc::new(Mutex::new(None::<Value>));
        let seen_clone = seen.clone();
        let router = Router::new().route(
            "/ask",
            post(move |Json(body): Json<Value>| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(json!({"content": "**answer**"}))
                }
            }),
        );
        let base = serve(router).await;

        let answer = gateway(&base).ask(request("  hello  ")).await.unwrap();
        assert_eq!(answer, "**answer**");

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            body,
            json!({"functionId": "writing", "content": "hello", "apiKey": "app-1", "deepThinking": true})
        );
    }

    #[tokio::test]
    async fn ask_maps_error_status_to_request_failed() {
        let router = Router::new().route(
            "/ask",
            post(|| async { (StatusCode::BAD_GATEWAY, Json(json!({"message": "upstream down"}))) }),
        );
        let base = serve(router).await;

        let err = gateway(&base).ask(request("hi")).await.unwrap_err();
        assert_eq!(err, GatewayError::RequestFailed("upstream down".into()));
    }

    #[tokio::test]
    async fn ask_rejects_unparseable_body() {
        let router = Router::new().route("/ask", post(|| async { "plain text" }));
        let base = serve(router).await;

        let err = gateway(&base).ask(request("hi")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn ask_treats_error_code_as_failure() {
        let router = Router::new().route(
            "/ask",
            post(|| async { Json(json!({"code": "invalid_input", "message": "bad key"})) }),
        );
        let base = serve(router).await;

        let err = gateway(&base).ask(request("hi")).await.unwrap_err();
        assert_eq!(err, GatewayError::RequestFailed("invalid_input: bad key".into()));
    }

    #[tokio::test]
    async fn ask_reports_network_failure() {
        // Nothing listens on a port we just released.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = gateway(&base).ask(request("hi")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn upload_sends_multipart_fields_and_returns_id() {
        let fields = Arc::new(Mutex::new(Vec::<(String, usize)>::new()));
        let fields_clone = fields.clone();
        let router = Router::new().route(
            "/upload",
            post(move |mut multipart: Multipart| {
                let fields = fields_clone.clone();
                async move {
                    while let Some(field) = multipart.next_field().await.unwrap() {
                        let name = field.name().unwrap_or_default().to_string();
                        let bytes = field.bytes().await.unwrap();
                        fields.lock().unwrap().push((name, bytes.len()));
                    }
                    Json(json!({"success": true, "data": {"id": "file-42"}}))
                }
            }),
        );
        let base = serve(router).await;

        let percents = Arc::new(Mutex::new(Vec::new()));
        let percents_clone = percents.clone();
        let progress: ProgressSink = Arc::new(move |p| percents_clone.lock().unwrap().push(p));

        let file = FileUpload::new("bill.pdf", "application/pdf", vec![7; UPLOAD_CHUNK * 2 + 10]);
        let id = gateway(&base)
            .upload_file(&file, "app-fin", "staff-1", progress)
            .await
            .unwrap();
        assert_eq!(id, "file-42");

        let fields = fields.lock().unwrap().clone();
        assert_eq!(
            fields,
            vec![
                ("file".to_string(), UPLOAD_CHUNK * 2 + 10),
                ("apiKey".to_string(), 7),
                ("userId".to_string(), 7),
            ]
        );

        let percents = percents.lock().unwrap().clone();
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn upload_without_id_is_missing_file_id() {
        let router = Router::new().route(
            "/upload",
            post(|| async { Json(json!({"success": true, "data": {}})) }),
        );
        let base = serve(router).await;

        let file = FileUpload::new("a.png", "image/png", vec![1, 2, 3]);
        let err = gateway(&base)
            .upload_file(&file, "k", "u", no_progress())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::MissingFileId);
    }

    #[tokio::test]
    async fn upload_error_status_is_upload_failed() {
        let router = Router::new().route(
            "/upload",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;

        let file = FileUpload::new("a.png", "image/png", vec![1]);
        let err = gateway(&base)
            .upload_file(&file, "k", "u", no_progress())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::UploadFailed("status code 500".into()));
    }

    #[test]
    fn chunks_end_at_cumulative_offsets() {
        let chunks = chunked(&vec![0u8; UPLOAD_CHUNK + 1]);
        let ends: Vec<u64> = chunks.iter().map(|(end, _)| *end).collect();
        assert_eq!(ends, vec![UPLOAD_CHUNK as u64, UPLOAD_CHUNK as u64 + 1]);
    }
}
