//! Statistical in-process analysis.
//!
//! Weighted lexicon sentiment with negation flipping, hit-count topic
//! ranking, and capitalized-run entity extraction. Everything runs on
//! tokenized text; no model files, no network.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use super::rule_based::TOPIC_RULES;
use super::{
    frequency_per_week, last_interaction, AnalysisBackend, AnalysisRun, KindCounts,
};
use crate::error::AnalysisError;
use crate::text;
use crate::types::{
    ActionPriority, AnalysisMode, CommunicationRecord, Highlight, Insights, ProcessingMetrics,
    RecommendedAction, Sentiment, Summary,
};

/// Fixed confidence reported by this back end.
pub const LOCAL_NLP_CONFIDENCE: f64 = 0.65;

/// Net token score per content token beyond which the set stops being neutral.
const SENTIMENT_EPSILON: f64 = 0.05;

/// A negation within this many preceding tokens flips a term's valence.
const NEGATION_WINDOW: usize = 2;

/// At most this many topics, dictionary categories and repeated terms combined.
const MAX_TOPICS: usize = 6;

const SENTIMENT_LEXICON: &[(&str, f64)] = &[
    ("worried", -2.0),
    ("worry", -2.0),
    ("concerned", -1.5),
    ("concern", -1.5),
    ("concerns", -1.5),
    ("crash", -2.0),
    ("crashed", -2.0),
    ("afraid", -2.0),
    ("anxious", -2.0),
    ("unhappy", -1.5),
    ("frustrated", -1.5),
    ("frustrating", -1.5),
    ("angry", -2.0),
    ("upset", -1.5),
    ("loss", -1.0),
    ("losses", -1.0),
    ("losing", -1.0),
    ("decline", -1.0),
    ("declining", -1.0),
    ("volatile", -1.0),
    ("volatility", -1.0),
    ("risk", -0.5),
    ("risky", -1.0),
    ("problem", -1.0),
    ("problems", -1.0),
    ("issue", -1.0),
    ("issues", -1.0),
    ("complaint", -1.5),
    ("disappointed", -1.5),
    ("disappointing", -1.5),
    ("doubt", -1.0),
    ("uncertain", -1.0),
    ("uncertainty", -1.0),
    ("fear", -1.5),
    ("panic", -2.0),
    ("mistake", -1.0),
    ("error", -1.0),
    ("pleased", 1.5),
    ("confident", 1.0),
    ("happy", 1.5),
    ("glad", 1.0),
    ("great", 1.0),
    ("excellent", 1.5),
    ("good", 0.5),
    ("gain", 1.0),
    ("gains", 1.0),
    ("growth", 1.0),
    ("thanks", 0.5),
    ("thank", 0.5),
    ("appreciate", 1.0),
    ("appreciated", 1.0),
    ("excited", 1.5),
    ("optimistic", 1.5),
    ("satisfied", 1.0),
    ("wonderful", 1.5),
    ("perfect", 1.5),
    ("delighted", 2.0),
];

const NEGATION_TOKENS: &[&str] = &[
    "not", "no", "never", "n't", "don't", "won't", "can't", "cannot", "isn't", "wasn't",
    "aren't", "didn't", "doesn't", "couldn't", "wouldn't", "shouldn't", "hardly", "barely",
];

fn re_entity_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?: [A-Z][a-z]+)+\b").unwrap())
}

#[derive(Debug, Default)]
pub struct LocalNlpBackend;

impl LocalNlpBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalysisBackend for LocalNlpBackend {
    fn method(&self) -> AnalysisMode {
        AnalysisMode::LocalNlp
    }

    async fn analyze(
        &self,
        client_id: &str,
        records: &[CommunicationRecord],
        _run: &AnalysisRun,
    ) -> Result<Insights, AnalysisError> {
        if records.is_empty() {
            return Err(AnalysisError::Validation(format!(
                "local-nlp analysis needs at least one communication for {}",
                client_id
            )));
        }
        Ok(analyze_records(records))
    }
}

fn analyze_records(records: &[CommunicationRecord]) -> Insights {
    let scored = score_records(records);
    let sentiment = scored.label();
    let topics = ranked_topics(records);
    let entities = extract_entities(records);
    let last = last_interaction(records);
    let counts = KindCounts::tally(records);
    let frequency = frequency_per_week(records);

    let mut summary_text = format!(
        "Scored {} communications; sentiment {} ({:+.2} per term)",
        counts.total(),
        sentiment.as_str(),
        scored.normalized()
    );
    if !topics.is_empty() {
        summary_text.push_str(&format!("; leading topics: {}", topics.join(", ")));
    }
    summary_text.push_str(&format!("; cadence {:.2}/week.", frequency));

    let recommended_actions = generate_actions(sentiment, frequency);
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
    if !entities.is_empty() {
        highlights.push(Highlight {
            label: "Entities mentioned".to_string(),
            value: entities.join(", "),
        });
    }

    Insights {
        summary: Summary {
            text: summary_text,
            topics,
            sentiment,
            frequency_per_week: frequency,
        },
        last_interaction: last,
        recommended_actions,
        highlights,
        processing_metrics: ProcessingMetrics {
            processing_time_ms: 0,
            tokens_used: None,
            confidence: Some(LOCAL_NLP_CONFIDENCE),
            method: AnalysisMode::LocalNlp,
        },
    }
}

// ---------------------------------------------------------------------------
// Sentiment scoring
// ---------------------------------------------------------------------------

struct ScoredSet {
    net: f64,
    content_tokens: usize,
}

impl ScoredSet {
    /// Net score per content token, so long threads do not drown a strong
    /// signal in filler.
    fn normalized(&self) -> f64 {
        self.net / (self.content_tokens.max(1) as f64)
    }

    fn label(&self) -> Sentiment {
        let normalized = self.normalized();
        if normalized > SENTIMENT_EPSILON {
            Sentiment::Positive
        } else if normalized < -SENTIMENT_EPSILON {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

fn score_records(records: &[CommunicationRecord]) -> ScoredSet {
    let mut net = 0.0;
    let mut content_tokens = 0usize;
    for record in records {
        let tokens = record_tokens(record);
        for (index, token) in tokens.iter().enumerate() {
            if !text::is_stopword(token) {
                content_tokens += 1;
            }
            let Some(weight) = term_weight(token) else {
                continue;
            };
            let negated = tokens[index.saturating_sub(NEGATION_WINDOW)..index]
                .iter()
                .any(|t| NEGATION_TOKENS.contains(&t.as_str()));
            net += if negated { -weight } else { weight };
        }
    }
    ScoredSet { net, content_tokens }
}

fn term_weight(token: &str) -> Option<f64> {
    SENTIMENT_LEXICON
        .iter()
        .find(|(term, _)| *term == token)
        .map(|(_, weight)| *weight)
}

fn record_tokens(record: &CommunicationRecord) -> Vec<String> {
    let mut combined = record.subject.clone().unwrap_or_default();
    combined.push(' ');
    combined.push_str(&record.body);
    text::tokenize(&combined)
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Dictionary categories ranked by hit count, then repeated content tokens.
fn ranked_topics(records: &[CommunicationRecord]) -> Vec<String> {
    let mut category_hits: HashMap<&str, usize> = HashMap::new();
    let mut category_order: Vec<&str> = Vec::new();
    let mut token_counts: HashMap<String, usize> = HashMap::new();

    for record in records {
        let tokens = record_tokens(record);
        let mut combined = record.subject.clone().unwrap_or_default();
        combined.push(' ');
        combined.push_str(&record.body);
        let folded = text::fold(&combined);

        for (keyword, category) in TOPIC_RULES {
            let hits = if keyword.contains(' ') {
                folded.matches(keyword).count()
            } else {
                tokens.iter().filter(|t| t.as_str() == *keyword).count()
            };
            if hits > 0 {
                if !category_order.contains(category) {
                    category_order.push(*category);
                }
                *category_hits.entry(*category).or_insert(0) += hits;
            }
        }

        for token in &tokens {
            if token.len() < 4 || text::is_stopword(token) || term_weight(token).is_some() {
                continue;
            }
            if dictionary_keyword(token) {
                continue;
            }
            *token_counts.entry(token.clone()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<&str> = category_order.clone();
    ranked.sort_by(|a, b| {
        let ha = category_hits.get(a).copied().unwrap_or(0);
        let hb = category_hits.get(b).copied().unwrap_or(0);
        hb.cmp(&ha).then_with(|| {
            let pa = category_order.iter().position(|c| c == a);
            let pb = category_order.iter().position(|c| c == b);
            pa.cmp(&pb)
        })
    });

    let mut topics: Vec<String> = ranked.into_iter().map(String::from).collect();

    let mut repeated: Vec<(String, usize)> = token_counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .collect();
    repeated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (token, _) in repeated {
        if topics.len() >= MAX_TOPICS {
            break;
        }
        if !topics.contains(&token) {
            topics.push(token);
        }
    }
    topics.truncate(MAX_TOPICS);
    topics
}

fn dictionary_keyword(token: &str) -> bool {
    TOPIC_RULES
        .iter()
        .any(|(keyword, _)| !keyword.contains(' ') && *keyword == token)
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Capitalized multi-word runs, most frequent first. Single capitalized words
/// are skipped as too noisy (sentence starts, salutations).
fn extract_entities(records: &[CommunicationRecord]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        let mut combined = record.subject.clone().unwrap_or_default();
        combined.push(' ');
        combined.push_str(&record.body);
        for found in re_entity_run().find_iter(&combined) {
            *counts.entry(found.as_str().to_string()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(3).map(|(name, _)| name).collect()
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn generate_actions(sentiment: Sentiment, frequency: f64) -> Vec<RecommendedAction> {
    let mut actions = Vec::new();
    if sentiment == Sentiment::Negative {
        actions.push(RecommendedAction {
            id: Uuid::new_v4().to_string(),
            title: "Follow up on negative sentiment".to_string(),
            rationale: "The weighted sentiment score for recent communications is negative."
                .to_string(),
            priority: ActionPriority::High,
            due_date: None,
        });
    }
    if frequency < 0.5 {
        actions.push(RecommendedAction {
            id: Uuid::new_v4().to_string(),
            title: "Schedule a touch-point".to_string(),
            rationale: "Contact cadence has dropped below one interaction every two weeks."
                .to_string(),
            priority: ActionPriority::Medium,
            due_date: None,
        });
    }
    actions
}
