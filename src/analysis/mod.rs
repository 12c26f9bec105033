//! Analysis back ends.
//!
//! Three interchangeable strategies implement [`AnalysisBackend`]: the
//! deterministic rule engine, the in-process statistical pipeline, and the
//! remote insight service client. The manager owns dispatch, timeout, and
//! fallback; back ends own their analysis and return complete insights or a
//! typed error, never partial data.

pub mod local_nlp;
pub mod remote_llm;
pub mod rule_based;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ProcessingConfig;
use crate::error::AnalysisError;
use crate::text;
use crate::types::{AnalysisMode, CommunicationKind, CommunicationRecord, Insights, LastInteraction};

/// Span floor applied when computing contact frequency, in days.
const MIN_SPAN_DAYS: f64 = 7.0;

const SNIPPET_MAX_CHARS: usize = 120;

/// Per-call view of the configuration snapshot handed to a back end at
/// dispatch. Carries only the fields a back end may act on; a config update
/// that lands mid-call never changes these.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub model_variant: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub service_url: Option<String>,
    pub api_key: Option<String>,
}

impl From<&ProcessingConfig> for AnalysisRun {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            model_variant: config.model_variant.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            service_url: config.service_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// The mode this back end implements.
    fn method(&self) -> AnalysisMode;

    /// Analyze `records` for one client. The returned metrics carry a zero
    /// `processing_time_ms`; the manager stamps the measured value and the
    /// effective method.
    async fn analyze(
        &self,
        client_id: &str,
        records: &[CommunicationRecord],
        run: &AnalysisRun,
    ) -> Result<Insights, AnalysisError>;
}

// =============================================================================
// Shared heuristics
// =============================================================================

/// Oldest and newest parseable timestamps in the set.
pub fn time_bounds(records: &[CommunicationRecord]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for record in records {
        let Some(ts) = record.parsed_timestamp() else {
            continue;
        };
        bounds = Some(match bounds {
            None => (ts, ts),
            Some((oldest, newest)) => (oldest.min(ts), newest.max(ts)),
        });
    }
    bounds
}

/// Contact rate: record count over the observed span in days, floored at
/// seven days so a burst of messages does not blow the quotient up. Two
/// emails eight days apart come out at 0.25.
pub fn frequency_per_week(records: &[CommunicationRecord]) -> f64 {
    let count = records
        .iter()
        .filter(|r| r.parsed_timestamp().is_some())
        .count();
    if count == 0 {
        return 0.0;
    }
    let span_days = match time_bounds(records) {
        Some((oldest, newest)) => (newest - oldest).num_seconds() as f64 / 86_400.0,
        None => 0.0,
    };
    count as f64 / span_days.max(MIN_SPAN_DAYS)
}

/// The most recent touch: maximum timestamp, ties broken by kind weight
/// (meetings and emails over events over chat), then by earliest input
/// index. Records with unparseable timestamps never win.
pub fn last_interaction(records: &[CommunicationRecord]) -> Option<LastInteraction> {
    let mut best: Option<(DateTime<Utc>, u8, &CommunicationRecord)> = None;
    for record in records {
        let Some(ts) = record.parsed_timestamp() else {
            continue;
        };
        let weight = record.kind_weight();
        let replace = match &best {
            None => true,
            Some((best_ts, best_weight, _)) => {
                ts > *best_ts || (ts == *best_ts && weight > *best_weight)
            }
        };
        if replace {
            best = Some((ts, weight, record));
        }
    }
    best.map(|(_, _, record)| LastInteraction {
        when: record.timestamp.clone(),
        kind: record.kind,
        subject: record.subject.clone(),
        snippet: if record.body.trim().is_empty() {
            None
        } else {
            Some(text::snippet(&record.body, SNIPPET_MAX_CHARS))
        },
    })
}

/// Per-kind record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub emails: usize,
    pub events: usize,
    pub chats: usize,
    pub meetings: usize,
}

impl KindCounts {
    pub fn tally(records: &[CommunicationRecord]) -> Self {
        let mut counts = KindCounts::default();
        for record in records {
            match record.kind {
                CommunicationKind::Email => counts.emails += 1,
                CommunicationKind::Event => counts.events += 1,
                CommunicationKind::Chat => counts.chats += 1,
                CommunicationKind::Meeting => counts.meetings += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.emails + self.events + self.chats + self.meetings
    }

    /// The channel with the most records. Ties prefer the richer channel
    /// (meetings, then emails, then events, then chat).
    pub fn most_active(&self) -> Option<CommunicationKind> {
        if self.total() == 0 {
            return None;
        }
        // max_by_key keeps the last maximum, so list the richer channels last
        let ranked = [
            (self.chats, CommunicationKind::Chat),
            (self.events, CommunicationKind::Event),
            (self.emails, CommunicationKind::Email),
            (self.meetings, CommunicationKind::Meeting),
        ];
        ranked
            .into_iter()
            .max_by_key(|(count, _)| *count)
            .map(|(_, kind)| kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, kind: CommunicationKind, timestamp: &str) -> CommunicationRecord {
        CommunicationRecord {
            id: id.to_string(),
            kind,
            from: "client@example.com".to_string(),
            subject: Some(format!("Subject {}", id)),
            body: format!("Body of {}", id),
            timestamp: timestamp.to_string(),
            meeting: None,
        }
    }

    #[test]
    fn test_frequency_two_emails_eight_days_apart() {
        let records = vec![
            record("e1", CommunicationKind::Email, "2024-01-01T00:00:00Z"),
            record("e2", CommunicationKind::Email, "2024-01-09T00:00:00Z"),
        ];
        let freq = frequency_per_week(&records);
        assert!((freq - 0.25).abs() < 1e-9, "got {}", freq);
    }

    #[test]
    fn test_frequency_span_floor() {
        // Three records within a day still divide by the seven-day floor
        let records = vec![
            record("e1", CommunicationKind::Email, "2024-01-01T00:00:00Z"),
            record("e2", CommunicationKind::Email, "2024-01-01T06:00:00Z"),
            record("e3", CommunicationKind::Email, "2024-01-01T12:00:00Z"),
        ];
        let freq = frequency_per_week(&records);
        assert!((freq - 3.0 / 7.0).abs() < 1e-9, "got {}", freq);
    }

    #[test]
    fn test_frequency_empty_is_zero() {
        assert_eq!(frequency_per_week(&[]), 0.0);
    }

    #[test]
    fn test_last_interaction_picks_max_timestamp() {
        let records = vec![
            record("old", CommunicationKind::Email, "2024-01-01T00:00:00Z"),
            record("new", CommunicationKind::Email, "2024-01-09T00:00:00Z"),
        ];
        let last = last_interaction(&records).unwrap();
        assert_eq!(last.subject.as_deref(), Some("Subject new"));
        assert_eq!(last.when, "2024-01-09T00:00:00Z");
    }

    #[test]
    fn test_last_interaction_same_kind_tie_keeps_earliest_index() {
        let records = vec![
            record("first", CommunicationKind::Email, "2024-01-05T00:00:00Z"),
            record("second", CommunicationKind::Email, "2024-01-05T00:00:00Z"),
        ];
        let last = last_interaction(&records).unwrap();
        assert_eq!(last.subject.as_deref(), Some("Subject first"));
    }

    #[test]
    fn test_last_interaction_weight_breaks_cross_kind_tie() {
        let records = vec![
            record("chat", CommunicationKind::Chat, "2024-01-05T00:00:00Z"),
            record("mail", CommunicationKind::Email, "2024-01-05T00:00:00Z"),
        ];
        let last = last_interaction(&records).unwrap();
        assert_eq!(last.kind, CommunicationKind::Email);
    }

    #[test]
    fn test_last_interaction_skips_unparseable() {
        let records = vec![
            record("bad", CommunicationKind::Email, "not-a-date"),
            record("good", CommunicationKind::Chat, "2024-01-02T00:00:00Z"),
        ];
        let last = last_interaction(&records).unwrap();
        assert_eq!(last.kind, CommunicationKind::Chat);

        let only_bad = vec![record("bad", CommunicationKind::Email, "nope")];
        assert!(last_interaction(&only_bad).is_none());
    }

    #[test]
    fn test_kind_counts() {
        let records = vec![
            record("e1", CommunicationKind::Email, "2024-01-01T00:00:00Z"),
            record("e2", CommunicationKind::Email, "2024-01-02T00:00:00Z"),
            record("c1", CommunicationKind::Chat, "2024-01-03T00:00:00Z"),
        ];
        let counts = KindCounts::tally(&records);
        assert_eq!(counts.emails, 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.most_active(), Some(CommunicationKind::Email));
        assert_eq!(KindCounts::default().most_active(), None);
    }
}
