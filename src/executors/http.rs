//! `http.request` block executor.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult,
    TimeoutPolicy,
};
use crate::error::ErrorCode;
use crate::executors::base::{require_inputs, ExecutionStats};
use crate::executors::BlockExecutor;

pub struct HttpBlockExecutor {
    client: reqwest::Client,
    timeouts: TimeoutPolicy,
    stats: ExecutionStats,
}

impl HttpBlockExecutor {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(10);
        if let Some(connect) = timeouts.http_connect_timeout() {
            builder = builder.connect_timeout(connect);
        }
        HttpBlockExecutor {
            client: builder.build().unwrap_or_default(),
            timeouts,
            stats: ExecutionStats::new(),
        }
    }

    fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("Invalid headers JSON: {e}"))?;
        let object = value
            .as_object()
            .ok_or_else(|| "Invalid headers JSON: expected an object".to_string())?;
        Ok(object
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect())
    }
}

#[async_trait]
impl BlockExecutor for HttpBlockExecutor {
    fn block_type(&self) -> &str {
        "http.request"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let start = Instant::now();
        let metadata = ResultMetadata::from_context(ctx);

        if let Err(result) = require_inputs(req, &metadata, &["url", "method"]) {
            self.stats.record_error(0);
            return result;
        }

        let url = req.input_or("url", "");
        let method = match req.input_or("method", "") {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "DELETE" => reqwest::Method::DELETE,
            other => {
                let latency_ms = start.elapsed().as_millis() as i64;
                self.stats.record_error(latency_ms);
                return StepResult::error(
                    ErrorCode::InvalidInput,
                    format!("Unsupported HTTP method: {other}"),
                    metadata,
                    latency_ms,
                );
            }
        };

        let headers = match Self::parse_headers(req.input_or("headers", "{}")) {
            Ok(headers) => headers,
            Err(message) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                self.stats.record_error(latency_ms);
                return StepResult::error(ErrorCode::InvalidFormat, message, metadata, latency_ms);
            }
        };

        let mut request = self
            .client
            .request(method, url)
            .timeout(self.timeouts.http_total_timeout(req.timeout_ms));
        for (key, value) in headers {
            request = request.header(&key, &value);
        }
        if let Some(body) = req.input("body") {
            request = request.body(body.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                self.stats.record_error(latency_ms);
                let code = if e.is_timeout() {
                    ErrorCode::ConnectionTimeout
                } else {
                    ErrorCode::NetworkError
                };
                return StepResult::error(
                    code,
                    format!("HTTP request failed: {e}"),
                    metadata,
                    latency_ms,
                );
            }
        };

        let status = response.status().as_u16();
        let header_map: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                self.stats.record_error(latency_ms);
                return StepResult::error(
                    ErrorCode::NetworkError,
                    format!("Failed to read response body: {e}"),
                    metadata,
                    latency_ms,
                );
            }
        };

        let latency_ms = start.elapsed().as_millis() as i64;
        let mut outputs = HashMap::new();
        outputs.insert("status_code".into(), status.to_string());
        outputs.insert("body".into(), body);
        outputs.insert(
            "headers".into(),
            serde_json::to_string(&header_map).unwrap_or_else(|_| "{}".into()),
        );

        if (200..300).contains(&status) {
            self.stats.record_success(latency_ms, 0, 0);
            StepResult::success(metadata, outputs, latency_ms)
        } else {
            self.stats.record_error(latency_ms);
            // Keep the parsed status in outputs so the retry layer can
            // classify 4xx vs 5xx independently of the error code.
            let mut result = StepResult::error(
                ErrorCode::HttpError,
                format!("HTTP request failed with status: {status}"),
                metadata,
                latency_ms,
            );
            result.outputs = outputs;
            result
        }
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}
