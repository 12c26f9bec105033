//! Remote insight service client.
//!
//! Builds one structured prompt per analysis, posts it to the configured
//! service, and validates the JSON the model returns before it becomes
//! `Insights`. Transient failures retry with exponential backoff; anything
//! that survives retries surfaces as a typed error for the manager's
//! fallback chain.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    frequency_per_week, last_interaction, AnalysisBackend, AnalysisRun,
};
use crate::error::AnalysisError;
use crate::text;
use crate::types::{
    ActionPriority, AnalysisMode, CommunicationRecord, Highlight, Insights, ProcessingMetrics,
    RecommendedAction, Sentiment, Summary,
};

/// Confidence assumed when the service omits its own estimate.
pub const REMOTE_DEFAULT_CONFIDENCE: f64 = 0.9;

/// Model requested when the config carries no `modelVariant`.
const DEFAULT_MODEL_VARIANT: &str = "standard";

/// Prompt size cap. Keeps request bodies manageable while preserving the
/// most recent signals.
const MAX_PROMPT_BYTES: usize = 10_000;

/// Per-record body cap inside the prompt.
const RECORD_BODY_MAX_BYTES: usize = 600;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, AnalysisError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return Ok(request.send().await?);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if status_is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "insight service retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "insight service retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err.into());
            }
        }
    }
    Err(AnalysisError::BackendUnavailable {
        reason: "insight service retries exhausted".to_string(),
    })
}

// =============================================================================
// Wire shapes
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsightRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsightResponse {
    content: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// The insights JSON the model is asked to produce. Everything but the
/// summary is optional; the engine backfills mechanical facts itself.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInsights {
    summary: WireSummary,
    #[serde(default)]
    recommended_actions: Vec<WireAction>,
    #[serde(default)]
    highlights: Vec<Highlight>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSummary {
    text: String,
    #[serde(default)]
    topics: Vec<String>,
    sentiment: String,
    #[serde(default)]
    frequency_per_week: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAction {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

// =============================================================================
// Back end
// =============================================================================

#[derive(Debug)]
pub struct RemoteLlmBackend {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl Default for RemoteLlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteLlmBackend {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            retry,
        }
    }
}

#[async_trait]
impl AnalysisBackend for RemoteLlmBackend {
    fn method(&self) -> AnalysisMode {
        AnalysisMode::RemoteLlm
    }

    async fn analyze(
        &self,
        client_id: &str,
        records: &[CommunicationRecord],
        run: &AnalysisRun,
    ) -> Result<Insights, AnalysisError> {
        if records.is_empty() {
            return Err(AnalysisError::Validation(format!(
                "remote-llm analysis needs at least one communication for {}",
                client_id
            )));
        }
        let service_url = run.service_url.as_deref().ok_or_else(|| {
            AnalysisError::Configuration("remote-llm mode requires serviceUrl".to_string())
        })?;
        let api_key = run.api_key.as_deref().ok_or_else(|| {
            AnalysisError::Configuration("remote-llm mode requires apiKey".to_string())
        })?;

        let prompt = build_prompt(client_id, records);
        let model = run.model_variant.as_deref().unwrap_or(DEFAULT_MODEL_VARIANT);
        let endpoint = format!("{}/v1/insights", service_url.trim_end_matches('/'));
        let request = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&InsightRequest {
                model,
                prompt: &prompt,
                max_tokens: run.max_tokens,
                temperature: run.temperature,
            });

        let response = send_with_retry(request, &self.retry).await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AnalysisError::Configuration(format!(
                "insight service rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::BackendUnavailable {
                reason: format!(
                    "insight service returned {}: {}",
                    status,
                    text::truncate_bytes(&body, 200)
                ),
            });
        }

        let payload: InsightResponse = response.json().await?;
        let raw = extract_json(&payload.content).ok_or_else(|| {
            AnalysisError::BackendUnavailable {
                reason: "no JSON object in insight service output".to_string(),
            }
        })?;
        let wire: WireInsights =
            serde_json::from_str(raw).map_err(|err| AnalysisError::BackendUnavailable {
                reason: format!("insight service output failed schema parse: {}", err),
            })?;

        into_insights(wire, records, payload.usage.and_then(|u| u.total_tokens))
    }
}

// =============================================================================
// Prompt assembly
// =============================================================================

fn build_prompt(client_id: &str, records: &[CommunicationRecord]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are an assistant for a financial advisor. Analyze the \
         communications below for client {} and produce relationship \
         insights.\n\n",
        client_id
    ));
    prompt.push_str(
        "Return ONLY a JSON object, with no other text before or after.\n\
         The JSON must conform exactly to this schema:\n\n\
         ```json\n\
         {\n\
           \"summary\": {\n\
             \"text\": \"2-3 sentence relationship summary\",\n\
             \"topics\": [\"topic\"],\n\
             \"sentiment\": \"positive|neutral|negative\",\n\
             \"frequencyPerWeek\": 0.0\n\
           },\n\
           \"recommendedActions\": [\n\
             {\"title\": \"...\", \"rationale\": \"...\", \"priority\": \"low|medium|high\", \"dueDate\": \"YYYY-MM-DD\"}\n\
           ],\n\
           \"highlights\": [\n\
             {\"label\": \"...\", \"value\": \"...\"}\n\
           ],\n\
           \"confidence\": 0.0\n\
         }\n\
         ```\n\n\
         Communications, newest first:\n\n",
    );

    // Newest first so the budget cuts the oldest history, not the latest.
    let mut ordered: Vec<&CommunicationRecord> = records.iter().collect();
    ordered.sort_by_key(|r| std::cmp::Reverse(r.parsed_timestamp()));

    for record in ordered {
        let date = record
            .timestamp
            .split('T')
            .next()
            .unwrap_or(record.timestamp.as_str());
        let subject = record.subject.as_deref().unwrap_or("(no subject)");
        let entry = format!(
            "- [{} {} from {}] {}: {}\n",
            date,
            record.kind.as_str(),
            record.from,
            subject,
            text::truncate_bytes(&record.body, RECORD_BODY_MAX_BYTES)
        );
        if prompt.len() + entry.len() > MAX_PROMPT_BYTES {
            break;
        }
        prompt.push_str(&entry);
    }
    prompt
}

/// Extract a JSON object from model output. Handles markdown fences and
/// surrounding prose.
pub(crate) fn extract_json(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return Some(response[json_start..json_start + end].trim());
        }
    }
    if let Some(start) = response.find("```") {
        let after_fence = start + 3;
        if let Some(nl) = response[after_fence..].find('\n') {
            let json_start = after_fence + nl + 1;
            if let Some(end) = response[json_start..].find("```") {
                let candidate = response[json_start..json_start + end].trim();
                if candidate.starts_with('{') {
                    return Some(candidate);
                }
            }
        }
    }

    let trimmed = response.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    // JSON embedded in other text: scan for the first balanced object.
    if let Some(start) = response.find('{') {
        let candidate = &response[start..];
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;
        for (i, ch) in candidate.char_indices() {
            if escape {
                escape = false;
                continue;
            }
            if ch == '\\' && in_string {
                escape = true;
                continue;
            }
            if ch == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                depth -= 1;
                if depth == 0 {
                    return Some(&candidate[..=i]);
                }
            }
        }
    }
    None
}

// =============================================================================
// Validation
// =============================================================================

fn into_insights(
    wire: WireInsights,
    records: &[CommunicationRecord],
    tokens_used: Option<u32>,
) -> Result<Insights, AnalysisError> {
    let sentiment = Sentiment::parse(&wire.summary.sentiment).ok_or_else(|| {
        AnalysisError::BackendUnavailable {
            reason: format!(
                "insight service output failed validation: unknown sentiment {:?}",
                wire.summary.sentiment
            ),
        }
    })?;

    let mut topics: Vec<String> = Vec::new();
    for topic in wire.summary.topics {
        let trimmed = topic.trim().to_string();
        if !trimmed.is_empty() && !topics.iter().any(|t| t == &trimmed) {
            topics.push(trimmed);
        }
    }

    let frequency = wire
        .summary
        .frequency_per_week
        .map(|f| f.max(0.0))
        .unwrap_or_else(|| frequency_per_week(records));
    let confidence = wire
        .confidence
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(REMOTE_DEFAULT_CONFIDENCE);

    let recommended_actions = wire
        .recommended_actions
        .into_iter()
        .map(|action| RecommendedAction {
            id: action
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: action.title,
            rationale: action.rationale,
            priority: action
                .priority
                .as_deref()
                .and_then(ActionPriority::parse)
                .unwrap_or(ActionPriority::Medium),
            due_date: action.due_date,
        })
        .collect();

    Ok(Insights {
        summary: Summary {
            text: wire.summary.text,
            topics,
            sentiment,
            frequency_per_week: frequency,
        },
        // Mechanical facts stay local even in remote mode.
        last_interaction: last_interaction(records),
        recommended_actions,
        highlights: wire.highlights,
        processing_metrics: ProcessingMetrics {
            processing_time_ms: 0,
            tokens_used,
            confidence: Some(confidence),
            method: AnalysisMode::RemoteLlm,
        },
    })
}
