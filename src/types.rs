//! Canonical domain types shared across the engine.
//!
//! Every wire-facing shape serializes camelCase. Records arrive from the
//! source stores via the normalizer and flow through the analysis back ends
//! unchanged; timestamps are carried as RFC 3339 strings and parsed at point
//! of use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Communication records
// =============================================================================

/// One communication of any kind, in the canonical shape every back end
/// consumes. Meeting-only detail rides along in `meeting`; the body of a
/// meeting record is pre-flattened prose (description + agenda + notes) so
/// text-based back ends see all meeting content without special-casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationRecord {
    /// Unique within one client's record set.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommunicationKind,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    /// RFC 3339 instant. Records whose timestamp does not parse are dropped
    /// by the processing manager before dispatch, not here.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting: Option<MeetingDetails>,
}

impl CommunicationRecord {
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Tie-break weight when choosing the last interaction: meetings and
    /// emails outrank calendar entries, which outrank chat messages.
    pub fn kind_weight(&self) -> u8 {
        match self.kind {
            CommunicationKind::Meeting => 3,
            CommunicationKind::Email => 3,
            CommunicationKind::Event => 2,
            CommunicationKind::Chat => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationKind {
    Email,
    Event,
    Chat,
    Meeting,
}

impl CommunicationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationKind::Email => "email",
            CommunicationKind::Event => "event",
            CommunicationKind::Chat => "chat",
            CommunicationKind::Meeting => "meeting",
        }
    }
}

/// Meeting-only fields carried alongside the flattened body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingDetails {
    #[serde(default)]
    pub meeting_type: String,
    #[serde(default)]
    pub status: MeetingStatus,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
        }
    }
}

// =============================================================================
// Insights (engine output)
// =============================================================================

/// Complete analysis result for one client. Never partially populated: a
/// back end either returns all of this or a typed error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<LastInteraction>,
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
    pub processing_metrics: ProcessingMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub text: String,
    /// Duplicate-free, insertion-ordered.
    #[serde(default)]
    pub topics: Vec<String>,
    pub sentiment: Sentiment,
    /// Contact rate over the observed history span. Never negative.
    #[serde(default)]
    pub frequency_per_week: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

/// The most recent touch with the client, chosen by timestamp with
/// kind-weighted tie-breaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastInteraction {
    /// RFC 3339 timestamp of the winning record.
    pub when: String,
    #[serde(rename = "type")]
    pub kind: CommunicationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedAction {
    pub id: String,
    pub title: String,
    pub rationale: String,
    pub priority: ActionPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
}

impl ActionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPriority::Low => "low",
            ActionPriority::Medium => "medium",
            ActionPriority::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(ActionPriority::Low),
            "medium" => Some(ActionPriority::Medium),
            "high" => Some(ActionPriority::High),
            _ => None,
        }
    }
}

/// Short label/value pair surfaced alongside the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub processing_time_ms: u64,
    /// Only the remote back end reports token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    /// Nominal confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// The back end that actually produced this result, which differs from
    /// the requested mode when the fallback chain ran.
    pub method: AnalysisMode,
}

// =============================================================================
// Analysis modes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    RuleBased,
    LocalNlp,
    RemoteLlm,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::RuleBased => "rule-based",
            AnalysisMode::LocalNlp => "local-nlp",
            AnalysisMode::RemoteLlm => "remote-llm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "rule-based" => Some(AnalysisMode::RuleBased),
            "local-nlp" => Some(AnalysisMode::LocalNlp),
            "remote-llm" => Some(AnalysisMode::RemoteLlm),
            _ => None,
        }
    }
}

// =============================================================================
// Context events
// =============================================================================

/// Immutable value broadcast once per successful, non-superseded trigger.
/// Subscribers copy what they need; the event has no further lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEvent {
    pub client_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub insights: Insights,
    #[serde(default)]
    pub communications: Vec<CommunicationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_record(id: &str, timestamp: &str) -> CommunicationRecord {
        CommunicationRecord {
            id: id.to_string(),
            kind: CommunicationKind::Email,
            from: "client@example.com".to_string(),
            subject: Some("Checking in".to_string()),
            body: "Quick question about the account".to_string(),
            timestamp: timestamp.to_string(),
            meeting: None,
        }
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = email_record("e1", "2024-01-01T00:00:00Z");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "email");
        assert_eq!(json["from"], "client@example.com");
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
        // No meeting block for an email
        assert!(json.get("meeting").is_none());
    }

    #[test]
    fn test_record_roundtrip_with_meeting_details() {
        let record = CommunicationRecord {
            id: "m1".to_string(),
            kind: CommunicationKind::Meeting,
            from: "advisor@firm.com".to_string(),
            subject: Some("Quarterly review".to_string()),
            body: "Reviewed allocations".to_string(),
            timestamp: "2024-02-10T15:00:00Z".to_string(),
            meeting: Some(MeetingDetails {
                meeting_type: "review".to_string(),
                status: MeetingStatus::Completed,
                duration_minutes: 45,
                attendees: vec!["client@example.com".to_string()],
                ..Default::default()
            }),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: CommunicationRecord = serde_json::from_str(&json).unwrap();
        let meeting = back.meeting.unwrap();
        assert_eq!(meeting.status, MeetingStatus::Completed);
        assert_eq!(meeting.duration_minutes, 45);
        assert!(json.contains("\"durationMinutes\":45"));
    }

    #[test]
    fn test_parsed_timestamp() {
        let record = email_record("e1", "2024-01-01T12:30:00Z");
        let parsed = record.parsed_timestamp().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T12:30:00+00:00");

        let bad = email_record("e2", "not-a-date");
        assert!(bad.parsed_timestamp().is_none());
    }

    #[test]
    fn test_kind_weight_ordering() {
        let mut chat = email_record("c1", "2024-01-01T00:00:00Z");
        chat.kind = CommunicationKind::Chat;
        let mut event = email_record("v1", "2024-01-01T00:00:00Z");
        event.kind = CommunicationKind::Event;
        let email = email_record("e1", "2024-01-01T00:00:00Z");

        assert!(email.kind_weight() > event.kind_weight());
        assert!(event.kind_weight() > chat.kind_weight());
    }

    #[test]
    fn test_analysis_mode_strings() {
        assert_eq!(AnalysisMode::RuleBased.as_str(), "rule-based");
        assert_eq!(AnalysisMode::LocalNlp.as_str(), "local-nlp");
        assert_eq!(AnalysisMode::RemoteLlm.as_str(), "remote-llm");
        assert_eq!(AnalysisMode::parse("Remote-LLM"), Some(AnalysisMode::RemoteLlm));
        assert_eq!(AnalysisMode::parse("magic"), None);

        let json = serde_json::to_string(&AnalysisMode::LocalNlp).unwrap();
        assert_eq!(json, "\"local-nlp\"");
    }

    #[test]
    fn test_sentiment_parse() {
        assert_eq!(Sentiment::parse("negative"), Some(Sentiment::Negative));
        assert_eq!(Sentiment::parse(" Positive "), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse("meh"), None);
    }
}
