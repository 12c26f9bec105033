//! Confidence-scored client resolution.
//!
//! Replaces first-match-wins cascades with a ranked scorer: every directory
//! entry is scored against the identifier and the best entry wins only when
//! it clears the resolution threshold. Signal strengths are ordered so an
//! exact email match always dominates an exact name match, which dominates
//! substring and fuzzy matches. Ambiguous weak matches resolve to nothing
//! rather than to an arbitrary candidate.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::text;

/// One directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Which strategy produced a match. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    Fuzzy,
    Substring,
    ExactName,
    ExactEmail,
}

/// Scored resolution result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedClient {
    pub client: Client,
    pub score: f64,
    pub signal: MatchSignal,
}

/// Minimum score a candidate must clear before it counts as a match.
pub const RESOLUTION_THRESHOLD: f64 = 0.60;

const SCORE_EXACT_EMAIL: f64 = 1.0;
const SCORE_EXACT_NAME: f64 = 0.90;
const SCORE_SUBSTRING_MAX: f64 = 0.75;
// Fuzzy scores are jaro_winkler scaled by this cap, so only near-identical
// strings (similarity ≥ 0.8) can clear the threshold at all.
const SCORE_FUZZY_MAX: f64 = 0.70;

pub trait ClientDirectory: Send + Sync {
    /// Snapshot of all known clients.
    fn clients(&self) -> Vec<Client>;
}

/// Directory held in memory behind a lock. Used by tests and by hosts that
/// keep the client book resident.
pub struct InMemoryDirectory {
    clients: parking_lot::RwLock<Vec<Client>>,
}

impl InMemoryDirectory {
    pub fn new(clients: Vec<Client>) -> Self {
        Self {
            clients: parking_lot::RwLock::new(clients),
        }
    }

    /// Insert or replace by client id.
    pub fn upsert(&self, client: Client) {
        let mut guard = self.clients.write();
        match guard.iter_mut().find(|c| c.id == client.id) {
            Some(existing) => *existing = client,
            None => guard.push(client),
        }
    }
}

impl ClientDirectory for InMemoryDirectory {
    fn clients(&self) -> Vec<Client> {
        self.clients.read().clone()
    }
}

/// Resolve a free-text identifier (bare address, bare name, or
/// `"Name" <addr>` form) against the directory.
///
/// Returns the highest-scoring candidate above [`RESOLUTION_THRESHOLD`], or
/// `None`. Two candidates tied on score and signal below the exact-email
/// tier are treated as ambiguous and refused; exact-email ties (duplicate
/// directory rows for one address) break by lexicographic client id.
pub fn resolve_client(directory: &dyn ClientDirectory, identifier: &str) -> Option<ResolvedClient> {
    let parsed = text::parse_identifier(identifier);
    parsed.resolution_key()?;

    let mut candidates: Vec<ResolvedClient> = directory
        .clients()
        .into_iter()
        .filter_map(|client| {
            score_candidate(&parsed, &client).map(|(score, signal)| ResolvedClient {
                client,
                score,
                signal,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.signal.cmp(&a.signal))
            .then(a.client.id.cmp(&b.client.id))
    });

    let best = candidates.first()?;
    if best.score < RESOLUTION_THRESHOLD {
        log::debug!(
            "Directory: no match for '{}' (best {:.2} via {:?})",
            identifier,
            best.score,
            best.signal
        );
        return None;
    }
    if let Some(runner) = candidates.get(1) {
        let tied = (best.score - runner.score).abs() < 1e-9 && runner.signal == best.signal;
        if tied && best.signal != MatchSignal::ExactEmail {
            log::debug!(
                "Directory: ambiguous resolution for '{}': '{}' and '{}' both score {:.2}, refusing",
                identifier,
                best.client.id,
                runner.client.id,
                best.score
            );
            return None;
        }
    }
    Some(candidates.swap_remove(0))
}

/// Score one candidate, returning the strongest applicable signal.
fn score_candidate(
    parsed: &text::ParsedIdentifier,
    client: &Client,
) -> Option<(f64, MatchSignal)> {
    if let Some(ref email) = parsed.email {
        if email.trim().eq_ignore_ascii_case(client.email.trim()) {
            return Some((SCORE_EXACT_EMAIL, MatchSignal::ExactEmail));
        }
    }
    if let Some(ref name) = parsed.display_name {
        if name.trim().eq_ignore_ascii_case(client.name.trim()) {
            return Some((SCORE_EXACT_NAME, MatchSignal::ExactName));
        }
    }

    // Weaker tiers compare the identifier's local part (separators folded to
    // spaces) against the client's name and email local part.
    let key = normalized_key(parsed);
    if key.len() < 3 {
        return None;
    }
    let client_name = normalize_separators(&text::fold(&client.name));
    let client_local = normalize_separators(&text::fold(text::local_part(&client.email)));

    let mut best: Option<(f64, MatchSignal)> = None;
    for target in [client_name.as_str(), client_local.as_str()] {
        if target.is_empty() {
            continue;
        }
        if let Some(score) = substring_score(&key, target) {
            best = stronger(best, (score, MatchSignal::Substring));
        }
        let similarity = strsim::jaro_winkler(&key, target);
        best = stronger(best, (similarity * SCORE_FUZZY_MAX, MatchSignal::Fuzzy));
    }
    best.filter(|(score, _)| *score > 0.0)
}

/// Containment score scaled by length ratio, so a four-letter fragment
/// inside a long name scores far below a full local-part match.
fn substring_score(key: &str, target: &str) -> Option<f64> {
    let (shorter, longer) = if key.len() <= target.len() {
        (key, target)
    } else {
        (target, key)
    };
    if shorter.len() < 3 || !longer.contains(shorter) {
        return None;
    }
    let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
    Some(SCORE_SUBSTRING_MAX * ratio)
}

fn stronger(
    current: Option<(f64, MatchSignal)>,
    candidate: (f64, MatchSignal),
) -> Option<(f64, MatchSignal)> {
    match current {
        Some(existing) if existing.0 >= candidate.0 => Some(existing),
        _ => Some(candidate),
    }
}

fn normalized_key(parsed: &text::ParsedIdentifier) -> String {
    let raw = match parsed.email.as_deref() {
        Some(email) => text::local_part(email).to_string(),
        None => parsed.display_name.clone().unwrap_or_default(),
    };
    normalize_separators(&text::fold(&raw))
}

fn normalize_separators(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c == '.' || c == '_' || c == '-' || c == '+' {
                ' '
            } else {
                c
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str, name: &str, email: &str) -> Client {
        Client {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    fn book() -> InMemoryDirectory {
        InMemoryDirectory::new(vec![
            client("c-jane", "Jane Doe", "jane.doe@firm.com"),
            client("c-janet", "Janet Doerr", "janet@doerr.io"),
            client("c-sam", "Sam Okafor", "sam.okafor@clients.example"),
        ])
    }

    #[test]
    fn test_exact_email_wins() {
        let dir = book();
        let resolved = resolve_client(&dir, "jane.doe@firm.com").unwrap();
        assert_eq!(resolved.client.id, "c-jane");
        assert_eq!(resolved.signal, MatchSignal::ExactEmail);
        assert_eq!(resolved.score, 1.0);
    }

    #[test]
    fn test_email_beats_name_and_substring() {
        // "Jane Doe" the name belongs to c-jane, but the address belongs to
        // a different client. The address must win.
        let dir = InMemoryDirectory::new(vec![
            client("c-jane", "Jane Doe", "jane.doe@firm.com"),
            client("c-shared", "Account Shared", "jane@firm.com"),
        ]);
        let resolved = resolve_client(&dir, "\"Jane Doe\" <jane@firm.com>").unwrap();
        assert_eq!(resolved.client.id, "c-shared");
        assert_eq!(resolved.signal, MatchSignal::ExactEmail);
    }

    #[test]
    fn test_exact_name_match() {
        let dir = book();
        let resolved = resolve_client(&dir, "Jane Doe").unwrap();
        assert_eq!(resolved.client.id, "c-jane");
        assert_eq!(resolved.signal, MatchSignal::ExactName);
    }

    #[test]
    fn test_personal_address_matches_by_local_part() {
        let dir = book();
        // Same person writing from a personal account
        let resolved = resolve_client(&dir, "jane.doe@gmail.com").unwrap();
        assert_eq!(resolved.client.id, "c-jane");
        assert!(resolved.signal == MatchSignal::Substring || resolved.signal == MatchSignal::Fuzzy);
        assert!(resolved.score >= RESOLUTION_THRESHOLD);
    }

    #[test]
    fn test_unknown_identifier_is_no_match() {
        let dir = book();
        assert!(resolve_client(&dir, "unknown@nowhere.test").is_none());
        assert!(resolve_client(&dir, "").is_none());
    }

    #[test]
    fn test_short_fragment_does_not_clear_threshold() {
        let dir = book();
        // "sa" is under the minimum key length; "sam" alone is a weak
        // fragment of "sam okafor"
        assert!(resolve_client(&dir, "sa@elsewhere.test").is_none());
        assert!(resolve_client(&dir, "sam@elsewhere.test").is_none());
    }

    #[test]
    fn test_ambiguous_name_refused() {
        let dir = InMemoryDirectory::new(vec![
            client("c-1", "Jane Doe", "jane@alpha.com"),
            client("c-2", "Jane Doe", "jane@beta.com"),
        ]);
        assert!(resolve_client(&dir, "Jane Doe").is_none());
    }

    #[test]
    fn test_duplicate_email_rows_break_by_id() {
        let dir = InMemoryDirectory::new(vec![
            client("c-b", "Jane Doe", "jane@firm.com"),
            client("c-a", "Jane D.", "jane@firm.com"),
        ]);
        let resolved = resolve_client(&dir, "jane@firm.com").unwrap();
        assert_eq!(resolved.client.id, "c-a");
    }

    #[test]
    fn test_fuzzy_catches_typo() {
        let dir = book();
        let resolved = resolve_client(&dir, "jane.doee@gmail.com").unwrap();
        assert_eq!(resolved.client.id, "c-jane");
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let dir = book();
        dir.upsert(client("c-jane", "Jane Doe-Nguyen", "jane.doe@firm.com"));
        let clients = dir.clients();
        assert_eq!(clients.len(), 3);
        assert_eq!(
            clients.iter().find(|c| c.id == "c-jane").unwrap().name,
            "Jane Doe-Nguyen"
        );
    }
}
