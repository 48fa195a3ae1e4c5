//! One outbound interface call.
//!
//! The [`RequestExecutor`] builds on a [`Transport`] (reqwest by default),
//! normalizes every response into an [`Envelope`] and reports exactly one log
//! record per call through the [`LogSink`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::{
    CallflowError, Result,
    model::HttpMethod,
    runtime::{LogLevel, LogSink},
    template::{Payload, reference},
};

/// Response bodies longer than this are cut in log records.
const LOG_BODY_LIMIT: usize = 2048;

/// Fully resolved request for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub payload: Payload,
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            payload,
            timeout: None,
        }
    }

    /// Adds `Authorization: Bearer <token>`; empty tokens are ignored.
    pub fn with_bearer(
        mut self,
        token: &str,
    ) -> Self {
        if !token.is_empty() {
            self.headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        self
    }

    /// Query pairs for GET/DELETE; nested values are sent as JSON text.
    pub fn query_pairs(&self) -> Result<Vec<(String, String)>> {
        match &self.payload {
            Payload::Json(map) => Ok(map.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), reference::value_to_string(v))).collect()),
            Payload::Form(_) => Err(CallflowError::Config(format!("{} {} cannot carry a multipart body", self.method.as_ref(), self.url))),
        }
    }
}

/// Raw HTTP answer before envelope normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Uniform `{code, message, data}` response shape of the called services.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Bodies carrying a `code` are read as envelopes; anything else is wrapped
    /// with the HTTP status as code.
    pub fn normalize(
        status: u16,
        body: &str,
    ) -> Self {
        let parsed = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()))
        };

        if let Value::Object(map) = &parsed
            && let Some(code) = map.get("code").and_then(envelope_code)
        {
            return Self {
                code,
                message: map.get("message").or_else(|| map.get("msg")).and_then(Value::as_str).unwrap_or_default().to_string(),
                data: map.get("data").cloned().unwrap_or(Value::Null),
            };
        }

        Self {
            code: status as i64,
            message: String::new(),
            data: parsed,
        }
    }
}

fn envelope_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The network seam. Implementations only move bytes; status and envelope
/// checks happen in [`RequestExecutor`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &OutboundRequest,
    ) -> Result<RawResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }

    fn build_request(
        &self,
        request: &OutboundRequest,
    ) -> Result<reqwest::RequestBuilder> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("accept"), HeaderValue::from_static("application/json"));
        for (key, value) in &request.headers {
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| CallflowError::Config(format!("invalid header name '{}': {}", key, err)))?,
                value.parse().map_err(|err: InvalidHeaderValue| CallflowError::Config(format!("invalid header value for '{}': {}", key, err)))?,
            );
        }

        let mut builder = self.client.request(request.method.into(), &request.url).headers(headers);

        if request.method.uses_query() {
            builder = builder.query(&request.query_pairs()?);
        } else {
            builder = match &request.payload {
                Payload::Json(map) => builder.json(map),
                Payload::Form(form) => builder.multipart(form.to_multipart()?),
            };
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
    ) -> Result<RawResponse> {
        let builder = self.build_request(request)?;
        let res = builder.send().await.map_err(|err| CallflowError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: error_chain(&err),
        })?;

        let status = res.status().as_u16();
        let body = res.text().await.map_err(|err| CallflowError::Transport {
            status: Some(status),
            message: error_chain(&err),
        })?;

        Ok(RawResponse {
            status,
            body,
        })
    }
}

/// `outer: cause: root cause`, the closest thing to a stack for transport errors.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    logs: Arc<dyn LogSink>,
    success_codes: Vec<i64>,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        logs: Arc<dyn LogSink>,
        success_codes: Vec<i64>,
    ) -> Self {
        Self {
            transport,
            logs,
            success_codes,
        }
    }

    /// Sends one request. Non-2xx statuses and envelope codes outside the
    /// success codes are failures. Each call emits exactly one log record.
    pub async fn send_request(
        &self,
        run_id: &str,
        nid: &str,
        request: &OutboundRequest,
    ) -> Result<Envelope> {
        let started = Instant::now();
        let outcome = self.dispatch(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut metadata = json!({
            "nid": nid,
            "method": request.method.as_ref(),
            "url": request.url,
            "elapsed_ms": elapsed_ms,
        });

        match outcome {
            Ok((status, envelope)) => {
                metadata["status"] = json!(status);
                metadata["code"] = json!(envelope.code);
                self.logs.add_log(run_id, LogLevel::Info, &format!("node '{}' interface call succeeded", nid), metadata);
                Ok(envelope)
            }
            Err((err, response)) => {
                metadata["status"] = json!(response.as_ref().map(|r| r.status).or(err.status()));
                metadata["response_body"] = json!(response.as_ref().map(|r| truncate(&r.body, LOG_BODY_LIMIT)));
                metadata["error"] = json!(err.to_string());
                metadata["error_kind"] = json!(error_kind(&err));
                self.logs.add_log(run_id, LogLevel::Error, &format!("node '{}' interface call failed", nid), metadata);
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &OutboundRequest,
    ) -> std::result::Result<(u16, Envelope), (CallflowError, Option<RawResponse>)> {
        let response = self.transport.send(request).await.map_err(|err| (err, None))?;

        if !(200..300).contains(&response.status) {
            let err = CallflowError::Transport {
                status: Some(response.status),
                message: format!("{} {} returned {}: {}", request.method.as_ref(), request.url, response.status, truncate(&response.body, 256)),
            };
            return Err((err, Some(response)));
        }

        let envelope = Envelope::normalize(response.status, &response.body);
        if !self.success_codes.contains(&envelope.code) && !(200..300).contains(&envelope.code) {
            let err = CallflowError::Envelope {
                code: envelope.code,
                message: envelope.message.clone(),
            };
            return Err((err, Some(response)));
        }

        Ok((response.status, envelope))
    }
}

fn error_kind(err: &CallflowError) -> &'static str {
    match err {
        CallflowError::Config(_) => "config",
        CallflowError::Transport {
            ..
        } => "transport",
        CallflowError::Envelope {
            ..
        } => "envelope",
        _ => "other",
    }
}

fn truncate(
    s: &str,
    limit: usize,
) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    use super::*;
    use crate::{
        runtime::LogChannel,
        template::{FormField, FormPayload},
    };

    fn executor(logs: Arc<LogChannel>) -> RequestExecutor {
        RequestExecutor::new(Arc::new(ReqwestTransport::new(reqwest::Client::new())), logs, vec![0, 200])
    }

    fn json_payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::Json(map),
            _ => Payload::Json(Map::new()),
        }
    }

    #[test]
    fn test_normalize_envelope() {
        let envelope = Envelope::normalize(200, r#"{"code": 0, "message": "ok", "data": {"id": "abc"}}"#);
        assert_eq!(envelope.code, 0);
        assert_eq!(envelope.message, "ok");
        assert_eq!(envelope.data, json!({ "id": "abc" }));

        let envelope = Envelope::normalize(200, r#"{"code": "500", "msg": "boom"}"#);
        assert_eq!(envelope.code, 500);
        assert_eq!(envelope.message, "boom");
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_normalize_wraps_plain_bodies() {
        assert_eq!(Envelope::normalize(201, r#"{"id": 7}"#).data, json!({ "id": 7 }));
        assert_eq!(Envelope::normalize(201, r#"{"id": 7}"#).code, 201);
        assert_eq!(Envelope::normalize(200, "plain text").data, json!("plain text"));
        assert_eq!(Envelope::normalize(204, "").data, Value::Null);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("叶片病害", 4), "叶...");
    }

    #[tokio::test]
    async fn test_post_json_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_json(json!({ "crop": "rice" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 200, "message": "ok", "data": { "taskId": "t-1" } })))
            .mount(&server)
            .await;

        let logs = Arc::new(LogChannel::new(16));
        let request = OutboundRequest::new(HttpMethod::POST, format!("{}/predict", server.uri()), json_payload(json!({ "crop": "rice" }))).with_bearer("secret");

        let envelope = executor(logs.clone()).send_request("run-1", "1", &request).await.unwrap();
        assert_eq!(envelope.data, json!({ "taskId": "t-1" }));

        let records = logs.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Info);
        assert_eq!(records[0].metadata["status"], json!(200));
    }

    #[tokio::test]
    async fn test_get_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/42/status"))
            .and(query_param("verbose", "true"))
            .and(query_param("filter", r#"{"crop":"rice"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "status": "done" } })))
            .mount(&server)
            .await;

        let request = OutboundRequest::new(
            HttpMethod::GET,
            format!("{}/jobs/42/status", server.uri()),
            json_payload(json!({ "verbose": true, "filter": { "crop": "rice" } })),
        );

        let envelope = executor(Arc::new(LogChannel::new(16))).send_request("run-1", "2", &request).await.unwrap();
        assert_eq!(envelope.data["status"], json!("done"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_transport_error_and_logged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let logs = Arc::new(LogChannel::new(16));
        let request = OutboundRequest::new(HttpMethod::POST, format!("{}/predict", server.uri()), json_payload(json!({})));

        let err = executor(logs.clone()).send_request("run-1", "1", &request).await.unwrap_err();
        assert!(matches!(err, CallflowError::Transport { status: Some(503), .. }));

        let records = logs.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].metadata["status"], json!(503));
        assert_eq!(records[0].metadata["response_body"], json!("upstream down"));
    }

    #[tokio::test]
    async fn test_failure_envelope_code() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 4001, "message": "invalid image" })))
            .mount(&server)
            .await;

        let logs = Arc::new(LogChannel::new(16));
        let request = OutboundRequest::new(HttpMethod::PUT, format!("{}/records/1", server.uri()), json_payload(json!({})));

        let err = executor(logs.clone()).send_request("run-1", "1", &request).await.unwrap_err();
        assert_eq!(
            err,
            CallflowError::Envelope {
                code: 4001,
                message: "invalid image".to_string()
            }
        );
        assert_eq!(logs.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "fileId": "f-1" } })))
            .mount(&server)
            .await;

        let form = FormPayload {
            fields: vec![
                FormField::File {
                    name: "image".to_string(),
                    filename: "leaf.jpg".to_string(),
                    content_type: Some("image/jpeg".to_string()),
                    data: vec![0xff, 0xd8, 0xff],
                },
                FormField::Text {
                    name: "crop".to_string(),
                    value: "rice".to_string(),
                },
            ],
        };
        let request = OutboundRequest::new(HttpMethod::POST, format!("{}/upload", server.uri()), Payload::Form(form));

        let envelope = executor(Arc::new(LogChannel::new(16))).send_request("run-1", "1", &request).await.unwrap();
        assert_eq!(envelope.data["fileId"], json!("f-1"));

        let received = server.received_requests().await.unwrap();
        let content_type = received[0].headers.get("content-type").unwrap().to_str().unwrap().to_string();
        assert!(content_type.starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains(r#"name="image"; filename="leaf.jpg""#));
        assert!(body.contains("rice"));
    }

    #[tokio::test]
    async fn test_form_on_get_is_config_error() {
        let request = OutboundRequest::new(HttpMethod::GET, "http://127.0.0.1:9/never", Payload::Form(FormPayload::default()));
        let err = executor(Arc::new(LogChannel::new(16))).send_request("run-1", "1", &request).await.unwrap_err();
        assert!(matches!(err, CallflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let request = OutboundRequest::new(HttpMethod::POST, "http://127.0.0.1:9/unreachable", Payload::Json(Map::new()));
        let err = executor(Arc::new(LogChannel::new(16))).send_request("run-1", "1", &request).await.unwrap_err();
        assert!(matches!(err, CallflowError::Transport { status: None, .. }));
    }
}
