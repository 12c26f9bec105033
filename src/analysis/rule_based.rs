//! Deterministic rule-based analysis.
//!
//! Signed keyword sentiment, a fixed topic dictionary, and small if/then
//! action rules. No statistics, no network, no model. The manager's
//! fallback chain ends here, so this back end always succeeds, including
//! on an empty record set.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{
    frequency_per_week, last_interaction, time_bounds, AnalysisBackend, AnalysisRun, KindCounts,
};
use crate::error::AnalysisError;
use crate::text;
use crate::types::{
    ActionPriority, AnalysisMode, CommunicationKind, CommunicationRecord, Highlight, Insights,
    LastInteraction, MeetingStatus, ProcessingMetrics, RecommendedAction, Sentiment, Summary,
};

/// Fixed confidence reported by this back end. Low on purpose: the rules
/// never adapt to the client.
pub const RULE_BASED_CONFIDENCE: f64 = 0.4;

// Negative hits outweigh positive ones at equal counts.
const NEGATIVE_WEIGHT: i64 = 2;
const POSITIVE_WEIGHT: i64 = 1;

/// A client goes "quiet" after this many days without contact.
const STALE_CONTACT_DAYS: i64 = 30;

const NEGATIVE_TERMS: &[&str] = &[
    "worried", "worry", "concerned", "concern", "concerns", "crash", "crashed", "afraid",
    "anxious", "unhappy", "frustrated", "frustrating", "angry", "upset", "loss", "losses",
    "losing", "drop", "dropped", "decline", "declining", "volatile", "volatility", "risk",
    "risky", "problem", "problems", "issue", "issues", "complaint", "cancel", "cancelled",
    "delay", "delayed", "mistake", "error", "disappointed", "disappointing", "doubt",
    "uncertain", "uncertainty", "fear", "panic",
];

const POSITIVE_TERMS: &[&str] = &[
    "pleased", "confident", "happy", "glad", "great", "excellent", "good", "gain", "gains",
    "growth", "thanks", "thank", "appreciate", "appreciated", "excited", "optimistic",
    "satisfied", "wonderful", "perfect", "congrats", "congratulations", "delighted",
];

/// Keyword → topic category. Single words match whole tokens; phrases match
/// as substrings of the folded text. The local-NLP back end reuses this
/// table with hit-count ranking.
pub(crate) const TOPIC_RULES: &[(&str, &str)] = &[
    ("portfolio", "portfolio"),
    ("allocation", "portfolio"),
    ("allocations", "portfolio"),
    ("holdings", "portfolio"),
    ("rebalance", "portfolio"),
    ("rebalancing", "portfolio"),
    ("diversification", "portfolio"),
    ("investment", "portfolio"),
    ("investments", "portfolio"),
    ("retirement", "retirement"),
    ("retire", "retirement"),
    ("401k", "retirement"),
    ("ira", "retirement"),
    ("pension", "retirement"),
    ("social security", "retirement"),
    ("tax", "tax"),
    ("taxes", "tax"),
    ("deduction", "tax"),
    ("deductions", "tax"),
    ("irs", "tax"),
    ("estate", "estate planning"),
    ("inheritance", "estate planning"),
    ("beneficiary", "estate planning"),
    ("beneficiaries", "estate planning"),
    ("insurance", "insurance"),
    ("premium", "insurance"),
    ("premiums", "insurance"),
    ("coverage", "insurance"),
    ("market", "market outlook"),
    ("markets", "market outlook"),
    ("stocks", "market outlook"),
    ("equities", "market outlook"),
    ("recession", "market outlook"),
    ("inflation", "market outlook"),
    ("interest rate", "market outlook"),
    ("interest rates", "market outlook"),
    ("fees", "fees"),
    ("billing", "fees"),
    ("invoice", "fees"),
    ("pricing", "fees"),
];

#[derive(Debug, Default)]
pub struct RuleBasedBackend;

impl RuleBasedBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalysisBackend for RuleBasedBackend {
    fn method(&self) -> AnalysisMode {
        AnalysisMode::RuleBased
    }

    async fn analyze(
        &self,
        client_id: &str,
        records: &[CommunicationRecord],
        _run: &AnalysisRun,
    ) -> Result<Insights, AnalysisError> {
        Ok(analyze_records(client_id, records))
    }
}

fn analyze_records(client_id: &str, records: &[CommunicationRecord]) -> Insights {
    let sentiment = score_sentiment(records);
    let topics = detect_topics(records);
    let last = last_interaction(records);
    let counts = KindCounts::tally(records);

    let summary = Summary {
        text: summary_text(client_id, records, &counts, sentiment, &topics),
        topics: topics.clone(),
        sentiment,
        frequency_per_week: frequency_per_week(records),
    };
    let recommended_actions = generate_actions(sentiment, &topics, last.as_ref());
    let highlights = build_highlights(records, &counts, last.as_ref());

    Insights {
        summary,
        last_interaction: last,
        recommended_actions,
        highlights,
        processing_metrics: ProcessingMetrics {
            processing_time_ms: 0,
            tokens_used: None,
            confidence: Some(RULE_BASED_CONFIDENCE),
            method: AnalysisMode::RuleBased,
        },
    }
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

fn score_sentiment(records: &[CommunicationRecord]) -> Sentiment {
    let mut positive: i64 = 0;
    let mut negative: i64 = 0;
    for record in records {
        for token in tokens_of(record) {
            if NEGATIVE_TERMS.contains(&token.as_str()) {
                negative += NEGATIVE_WEIGHT;
            } else if POSITIVE_TERMS.contains(&token.as_str()) {
                positive += POSITIVE_WEIGHT;
            }
        }
    }
    if negative > positive {
        Sentiment::Negative
    } else if positive > negative {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

fn tokens_of(record: &CommunicationRecord) -> Vec<String> {
    let mut combined = String::new();
    if let Some(ref subject) = record.subject {
        combined.push_str(subject);
        combined.push(' ');
    }
    combined.push_str(&record.body);
    text::tokenize(&combined)
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Unique topic categories in first-hit order across the record set.
fn detect_topics(records: &[CommunicationRecord]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for record in records {
        let mut combined = record.subject.clone().unwrap_or_default();
        combined.push(' ');
        combined.push_str(&record.body);
        let folded = text::fold(&combined);
        let tokens = text::tokenize(&combined);

        for (keyword, category) in TOPIC_RULES {
            let hit = if keyword.contains(' ') {
                folded.contains(keyword)
            } else {
                tokens.iter().any(|t| t == keyword)
            };
            if hit && !topics.iter().any(|t| t == category) {
                topics.push((*category).to_string());
            }
        }
    }
    topics
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

fn summary_text(
    client_id: &str,
    records: &[CommunicationRecord],
    counts: &KindCounts,
    sentiment: Sentiment,
    topics: &[String],
) -> String {
    if records.is_empty() {
        return format!("No communications on record for {}.", client_id);
    }

    let span_phrase = match time_bounds(records) {
        Some((oldest, newest)) => {
            let days = (newest - oldest).num_days().max(0);
            if days >= 14 {
                format!("{} weeks", days / 7)
            } else {
                format!("{} days", days.max(1))
            }
        }
        None => "an unknown span".to_string(),
    };

    let mut breakdown: Vec<String> = Vec::new();
    if counts.emails > 0 {
        breakdown.push(count_phrase(counts.emails, "email", "emails"));
    }
    if counts.meetings > 0 {
        breakdown.push(count_phrase(counts.meetings, "meeting", "meetings"));
    }
    if counts.events > 0 {
        breakdown.push(count_phrase(counts.events, "calendar event", "calendar events"));
    }
    if counts.chats > 0 {
        breakdown.push(count_phrase(counts.chats, "chat message", "chat messages"));
    }

    let mut out = format!(
        "{} communications over {} ({})",
        counts.total(),
        span_phrase,
        breakdown.join(", ")
    );
    out.push_str(&format!("; overall sentiment {}", sentiment.as_str()));
    if !topics.is_empty() {
        out.push_str(&format!("; main topics: {}", topics.join(", ")));
    }
    out.push('.');
    out
}

fn count_phrase(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {}", singular)
    } else {
        format!("{} {}", count, plural)
    }
}

// ---------------------------------------------------------------------------
// Action rules
// ---------------------------------------------------------------------------

fn generate_actions(
    sentiment: Sentiment,
    topics: &[String],
    last: Option<&LastInteraction>,
) -> Vec<RecommendedAction> {
    let mut actions: Vec<RecommendedAction> = Vec::new();
    let has_topic = |name: &str| topics.iter().any(|t| t == name);

    if sentiment == Sentiment::Negative {
        actions.push(action(
            "Schedule a reassurance call",
            "Recent communications read negative; a direct conversation can address the concerns.",
            ActionPriority::High,
            Some(2),
        ));
    }
    if sentiment == Sentiment::Negative && has_topic("portfolio") {
        actions.push(action(
            "Prepare a portfolio performance review",
            "Portfolio concerns came up alongside negative sentiment; walk through the numbers together.",
            ActionPriority::High,
            Some(3),
        ));
    }
    if has_topic("retirement") {
        actions.push(action(
            "Review retirement plan allocations",
            "Retirement came up recently; confirm the plan still matches the client's horizon.",
            ActionPriority::Medium,
            Some(7),
        ));
    }
    if has_topic("tax") {
        actions.push(action(
            "Coordinate with the client's tax advisor",
            "Tax questions came up recently; align before giving planning guidance.",
            ActionPriority::Medium,
            Some(7),
        ));
    }
    if has_topic("insurance") {
        actions.push(action(
            "Confirm insurance coverage still fits",
            "Insurance came up recently; verify the coverage matches current circumstances.",
            ActionPriority::Low,
            None,
        ));
    }
    if let Some(last) = last {
        if let Ok(when) = chrono::DateTime::parse_from_rfc3339(&last.when) {
            let days_since = (Utc::now() - when.with_timezone(&Utc)).num_days();
            if days_since > STALE_CONTACT_DAYS {
                actions.push(action(
                    "Re-engage with a personal note",
                    "No contact in over a month; a short personal note keeps the relationship warm.",
                    ActionPriority::Medium,
                    Some(5),
                ));
            }
        }
    }

    actions
}

fn action(
    title: &str,
    rationale: &str,
    priority: ActionPriority,
    due_in_days: Option<i64>,
) -> RecommendedAction {
    RecommendedAction {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        rationale: rationale.to_string(),
        priority,
        due_date: due_in_days.map(|days| (Utc::now() + Duration::days(days))
            .format("%Y-%m-%d")
            .to_string()),
    }
}

// ---------------------------------------------------------------------------
// Highlights
// ---------------------------------------------------------------------------

fn build_highlights(
    records: &[CommunicationRecord],
    counts: &KindCounts,
    last: Option<&LastInteraction>,
) -> Vec<Highlight> {
    let mut highlights = vec![Highlight {
        label: "Communications".to_string(),
        value: counts.total().to_string(),
    }];
    if let Some(kind) = counts.most_active() {
        highlights.push(Highlight {
            label: "Most active channel".to_string(),
            value: kind.as_str().to_string(),
        });
    }
    let meetings_held = records
        .iter()
        .filter(|r| {
            r.kind == CommunicationKind::Meeting
                && r.meeting
                    .as_ref()
                    .map(|m| m.status == MeetingStatus::Completed)
                    .unwrap_or(false)
        })
        .count();
    if meetings_held > 0 {
        highlights.push(Highlight {
            label: "Meetings held".to_string(),
            value: meetings_held.to_string(),
        });
    }
    if let Some(last) = last {
        let date = last.when.split('T').next().unwrap_or(&last.when).to_string();
        highlights.push(Highlight {
            label: "Last contact".to_string(),
            value: date,
        });
    }
    highlights
}
