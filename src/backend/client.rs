//! Backend HTTP Client
//!
//! Talks to the code-generation backend over its four-endpoint contract:
//! `POST /chat`, `POST /implement`, `POST /self-update`, `GET /files`.
//! Every operation is a single request/response exchange with at-most-once
//! semantics; nothing here retries. A non-2xx status fails the call without
//! interpreting any partial body.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::WorkflowError;
use crate::types::{
    BackendClient, ChatOutcome, ImplementOutcome, SelfUpdateAction, TestReport, TestStatus,
};

// ---------------------------------------------------------------------------
// Request timeouts
// ---------------------------------------------------------------------------

/// Timeout for simple requests.
pub const TIMEOUT_SIMPLE: Duration = Duration::from_secs(120);
/// Timeout for complex code generation.
pub const TIMEOUT_COMPLEX: Duration = Duration::from_secs(600);
/// Timeout for large multi-file work.
pub const TIMEOUT_MASSIVE: Duration = Duration::from_secs(900);

/// Keywords indicating the backend will be doing heavy generation work.
static COMPLEX_KEYWORDS: &[&str] = &[
    "refactor",
    "implement",
    "create system",
    "build application",
    "full project",
    "multiple files",
    "complex",
    "advanced",
];

/// Score the request and pick a timeout: prompt length, context-file
/// count, and heavy-operation keywords each add to the complexity.
pub fn request_timeout(prompt: &str, context_files: &[String]) -> Duration {
    let mut score = 0u32;

    if prompt.len() > 1000 {
        score += 2;
    } else if prompt.len() > 500 {
        score += 1;
    }

    if context_files.len() > 3 {
        score += 2;
    } else if context_files.len() > 1 {
        score += 1;
    }

    let lowered = prompt.to_lowercase();
    if COMPLEX_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        score += 2;
    }

    if score >= 4 {
        TIMEOUT_MASSIVE
    } else if score >= 2 {
        TIMEOUT_COMPLEX
    } else {
        TIMEOUT_SIMPLE
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP implementation of the backend contract.
pub struct BackendHttpClient {
    pub api_url: String,
    http: Client,
}

impl BackendHttpClient {
    /// Create a client for the backend at `api_url` (e.g.
    /// `http://localhost:8000/api`).
    pub fn new(api_url: String) -> Self {
        Self {
            api_url,
            http: Client::new(),
        }
    }

    /// Send one request and unwrap the `{"response": ...}` envelope.
    /// An in-band `{"error": ...}` envelope fails the call the same way a
    /// transport failure would.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, WorkflowError> {
        let url = format!("{}{}", self.api_url, path);

        let mut builder = match method {
            "GET" => self.http.get(&url),
            _ => self.http.post(&url),
        };
        builder = builder
            .header("Content-Type", "application/json")
            .timeout(timeout);
        if let Some(b) = body {
            builder = builder.json(&b);
        }

        let resp = builder.send().await.map_err(|e| {
            WorkflowError::Transport(format!("{} {} failed: {}", method, path, e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            // Fail without partial interpretation of the body.
            return Err(WorkflowError::Transport(format!(
                "{} {} returned {}",
                method,
                path,
                status.as_u16()
            )));
        }

        let envelope: Value = resp.json().await.map_err(|e| {
            WorkflowError::Transport(format!("{} {} returned invalid JSON: {}", method, path, e))
        })?;

        // The backend reports in-band failures either at the top level or
        // nested inside the response payload.
        let reported = envelope
            .get("error")
            .or_else(|| envelope.get("response").and_then(|r| r.get("error")))
            .and_then(Value::as_str);
        if let Some(err) = reported {
            return Err(WorkflowError::Transport(format!(
                "{} {} reported: {}",
                method, path, err
            )));
        }

        debug!(%method, %path, "backend call succeeded");
        Ok(envelope)
    }
}

/// Map the backend's test-result payload onto a [`TestReport`].
/// A `no_tests` status means no report was produced.
fn parse_test_report(value: &Value) -> Option<TestReport> {
    let status = match value.get("status").and_then(Value::as_str)? {
        "passed" => TestStatus::Passed,
        "failed" => TestStatus::Failed,
        "no_tests" => return None,
        _ => TestStatus::Error,
    };

    let details = value
        .get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(TestReport { status, details })
}

/// Serialize a [`TestReport`] back into the backend's wire shape.
fn test_report_to_wire(report: &TestReport) -> Value {
    let status = match report.status {
        TestStatus::Passed => "passed",
        TestStatus::Failed => "failed",
        TestStatus::Error => "error",
    };
    json!({
        "status": status,
        "results": report.details,
        "all_passed": report.passed(),
    })
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BackendClient for BackendHttpClient {
    /// `POST /chat` with the prompt and the context files to include.
    async fn chat(
        &self,
        prompt: &str,
        files_to_include: &[String],
    ) -> Result<ChatOutcome, WorkflowError> {
        let timeout = request_timeout(prompt, files_to_include);
        debug!(timeout_secs = timeout.as_secs(), "chat request timeout selected");

        let body = json!({
            "prompt": prompt,
            "files_to_include": if files_to_include.is_empty() {
                Value::Null
            } else {
                json!(files_to_include)
            },
        });

        let envelope = self.request("POST", "/chat", Some(body), timeout).await?;
        let response = &envelope["response"];

        // A plain string response is a normal chat answer with no artifact.
        if let Some(text) = response.as_str() {
            return Ok(ChatOutcome {
                response_text: text.to_string(),
                ..Default::default()
            });
        }

        Ok(ChatOutcome {
            response_text: response
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            created_files: string_list(&response["created_files"]),
            code_files: string_list(&response["code_files"]),
            test_report: parse_test_report(&response["test_results"]),
            ready_for_implementation: response
                .get("ready_for_implementation")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// `POST /implement` for a non-self-update artifact that passed review.
    async fn implement(
        &self,
        sandbox_files: &[String],
        test_report: &TestReport,
    ) -> Result<ImplementOutcome, WorkflowError> {
        let body = json!({
            "sandbox_files": sandbox_files,
            "test_results": test_report_to_wire(test_report),
        });

        let envelope = self
            .request("POST", "/implement", Some(body), TIMEOUT_SIMPLE)
            .await?;
        let response = &envelope["response"];

        Ok(ImplementOutcome {
            status: response
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("failed")
                .to_string(),
            message: response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            files: string_list(&response["files"]),
        })
    }

    /// `POST /self-update` with `analyze_and_update` or `rollback`.
    async fn self_update(&self, action: SelfUpdateAction) -> Result<String, WorkflowError> {
        let action_str = match action {
            SelfUpdateAction::AnalyzeAndUpdate => "analyze_and_update",
            SelfUpdateAction::Rollback => "rollback",
        };

        let envelope = self
            .request(
                "POST",
                "/self-update",
                Some(json!({ "action": action_str })),
                TIMEOUT_COMPLEX,
            )
            .await?;

        Ok(envelope["response"].as_str().unwrap_or_default().to_string())
    }

    /// `GET /files`: the live files available for context selection.
    async fn list_files(&self) -> Result<Vec<String>, WorkflowError> {
        let envelope = self.request("GET", "/files", None, TIMEOUT_SIMPLE).await?;
        Ok(string_list(&envelope["files"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prompt_gets_simple_timeout() {
        assert_eq!(request_timeout("fix ui spacing", &[]), TIMEOUT_SIMPLE);
    }

    #[test]
    fn test_complex_keyword_and_context_escalate() {
        let files: Vec<String> = (0..4).map(|i| format!("file{i}.py")).collect();
        assert_eq!(
            request_timeout("please refactor the router", &files),
            TIMEOUT_MASSIVE
        );
    }

    #[test]
    fn test_moderate_request_gets_complex_timeout() {
        let files = vec!["a.py".to_string(), "b.py".to_string()];
        assert_eq!(
            request_timeout("implement a small helper", &files),
            TIMEOUT_COMPLEX
        );
        assert_eq!(
            request_timeout("implement a small helper", &[]),
            TIMEOUT_COMPLEX
        );
    }

    #[test]
    fn test_parse_test_report_statuses() {
        let passed = parse_test_report(&json!({"status": "passed", "results": ["ok"]}));
        assert_eq!(passed.unwrap().status, TestStatus::Passed);

        let errored = parse_test_report(&json!({"status": "crashed", "results": []}));
        assert_eq!(errored.unwrap().status, TestStatus::Error);

        assert!(parse_test_report(&json!({"status": "no_tests"})).is_none());
        assert!(parse_test_report(&json!(null)).is_none());
    }

    #[test]
    fn test_test_report_wire_round_trip() {
        let report = TestReport {
            status: TestStatus::Failed,
            details: vec!["test_x: FAILED".to_string()],
        };
        let wire = test_report_to_wire(&report);
        assert_eq!(wire["status"], "failed");
        assert_eq!(wire["all_passed"], false);
        assert_eq!(parse_test_report(&wire), Some(report));
    }
}
