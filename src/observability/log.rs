//! Structured JSON-line logging with PII redaction.
//!
//! One JSON object per line on stdout; ERROR lines go to stderr. Correlation
//! fields sit at the top level; everything else lives under `context`, which
//! is the only part the redaction pass touches.

use std::io::Write;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::core::{BlockContext, ResultMetadata};

/// Keys whose values are replaced with `[REDACTED]` when they appear (as an
/// exact match or substring, case-insensitive) inside `context`.
const PII_KEYS: &[&str] = &[
    "password",
    "api_key",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
    "credit_card",
    "ssn",
    "email",
    "phone",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Correlation fields attached at the top level of a log line. Empty fields
/// are omitted.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub tenant_id: String,
    pub run_id: String,
    pub flow_id: String,
    pub step_id: String,
    pub trace_id: String,
}

impl From<&BlockContext> for Correlation {
    fn from(ctx: &BlockContext) -> Self {
        Correlation {
            tenant_id: ctx.tenant_id.clone(),
            run_id: ctx.run_id.clone(),
            flow_id: ctx.flow_id.clone(),
            step_id: ctx.step_id.clone(),
            trace_id: ctx.trace_id.clone(),
        }
    }
}

impl From<&ResultMetadata> for Correlation {
    fn from(meta: &ResultMetadata) -> Self {
        Correlation {
            tenant_id: meta.tenant_id.clone(),
            run_id: meta.run_id.clone(),
            flow_id: meta.flow_id.clone(),
            step_id: meta.step_id.clone(),
            trace_id: meta.trace_id.clone(),
        }
    }
}

/// ISO-8601 timestamp with 6-digit microseconds and a `Z` suffix.
pub fn iso8601_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn is_pii_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    PII_KEYS.iter().any(|pii| lower.contains(pii))
}

/// Replace PII values in place, recursing through nested objects and arrays.
pub fn redact_pii(value: &mut Value) {
    match value {
        Value::Object(object) => {
            for (key, entry) in object.iter_mut() {
                if is_pii_key(key) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact_pii(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_pii(item);
            }
        }
        _ => {}
    }
}

pub struct JsonLogger {
    worker_id: String,
}

impl JsonLogger {
    pub fn new(worker_id: impl Into<String>) -> Self {
        JsonLogger {
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn debug(&self, message: &str, corr: &Correlation, context: Value) {
        self.log(LogLevel::Debug, message, corr, context);
    }

    pub fn info(&self, message: &str, corr: &Correlation, context: Value) {
        self.log(LogLevel::Info, message, corr, context);
    }

    pub fn warn(&self, message: &str, corr: &Correlation, context: Value) {
        self.log(LogLevel::Warn, message, corr, context);
    }

    pub fn error(&self, message: &str, corr: &Correlation, context: Value) {
        self.log(LogLevel::Error, message, corr, context);
    }

    pub fn log(&self, level: LogLevel, message: &str, corr: &Correlation, context: Value) {
        let line = self.format(level, message, corr, context);
        if level == LogLevel::Error {
            let stderr = std::io::stderr();
            let _ = writeln!(stderr.lock(), "{line}");
        } else {
            let stdout = std::io::stdout();
            let _ = writeln!(stdout.lock(), "{line}");
        }
    }

    /// Render one log line. Exposed so the emitted shape is testable.
    pub fn format(
        &self,
        level: LogLevel,
        message: &str,
        corr: &Correlation,
        context: Value,
    ) -> String {
        let mut entry = Map::new();
        entry.insert("timestamp".into(), json!(iso8601_now()));
        entry.insert("level".into(), json!(level.as_str()));
        entry.insert("component".into(), json!("worker"));
        entry.insert("message".into(), json!(message));

        for (key, value) in [
            ("tenant_id", &corr.tenant_id),
            ("run_id", &corr.run_id),
            ("flow_id", &corr.flow_id),
            ("step_id", &corr.step_id),
            ("trace_id", &corr.trace_id),
        ] {
            if !value.is_empty() {
                entry.insert(key.into(), json!(value));
            }
        }

        let mut context_obj = match context {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            other => {
                let mut object = Map::new();
                object.insert("value".into(), other);
                object
            }
        };
        context_obj.insert("worker_id".into(), json!(self.worker_id));
        let mut context_value = Value::Object(context_obj);
        redact_pii(&mut context_value);
        entry.insert("context".into(), context_value);

        Value::Object(entry).to_string()
    }
}
