//! Communication source stores.
//!
//! The engine reads four external stores (email, calendar, chat, meetings)
//! through narrow traits; the normalizer is the only consumer. In-memory
//! implementations back the tests and any host that already holds the data.
//! Store records keep their source-specific field names; mapping into the
//! canonical shape happens in the normalizer.

use serde::{Deserialize, Serialize};

use crate::directory::Client;
use crate::types::MeetingStatus;

// =============================================================================
// Source record shapes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEmail {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// RFC 3339.
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// RFC 3339 start instant.
    pub start: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub text: String,
    /// RFC 3339.
    pub sent_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    pub id: String,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
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
    #[serde(default)]
    pub attendees: Vec<String>,
    /// RFC 3339 scheduled instant.
    pub scheduled_for: String,
}

// =============================================================================
// Store traits
// =============================================================================

pub trait EmailStore: Send + Sync {
    fn emails_for_client(&self, client: &Client) -> Vec<StoredEmail>;
}

pub trait CalendarStore: Send + Sync {
    fn entries_for_client(&self, client: &Client) -> Vec<CalendarEntry>;
}

pub trait ChatStore: Send + Sync {
    fn messages_for_client(&self, client: &Client) -> Vec<ChatMessage>;
}

pub trait MeetingStore: Send + Sync {
    fn meetings_for_client(&self, client: &Client) -> Vec<MeetingRecord>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// All four stores in one struct, keyed by client id. Snapshot reads only.
#[derive(Default)]
pub struct InMemorySources {
    emails: parking_lot::RwLock<Vec<(String, StoredEmail)>>,
    entries: parking_lot::RwLock<Vec<(String, CalendarEntry)>>,
    messages: parking_lot::RwLock<Vec<(String, ChatMessage)>>,
    meetings: parking_lot::RwLock<Vec<(String, MeetingRecord)>>,
}

impl InMemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_email(&self, client_id: &str, email: StoredEmail) {
        self.emails.write().push((client_id.to_string(), email));
    }

    pub fn add_entry(&self, client_id: &str, entry: CalendarEntry) {
        self.entries.write().push((client_id.to_string(), entry));
    }

    pub fn add_message(&self, client_id: &str, message: ChatMessage) {
        self.messages.write().push((client_id.to_string(), message));
    }

    pub fn add_meeting(&self, client_id: &str, meeting: MeetingRecord) {
        self.meetings.write().push((client_id.to_string(), meeting));
    }
}

fn collect_for<T: Clone>(
    rows: &parking_lot::RwLock<Vec<(String, T)>>,
    client_id: &str,
) -> Vec<T> {
    rows.read()
        .iter()
        .filter(|(id, _)| id == client_id)
        .map(|(_, row)| row.clone())
        .collect()
}

impl EmailStore for InMemorySources {
    fn emails_for_client(&self, client: &Client) -> Vec<StoredEmail> {
        collect_for(&self.emails, &client.id)
    }
}

impl CalendarStore for InMemorySources {
    fn entries_for_client(&self, client: &Client) -> Vec<CalendarEntry> {
        collect_for(&self.entries, &client.id)
    }
}

impl ChatStore for InMemorySources {
    fn messages_for_client(&self, client: &Client) -> Vec<ChatMessage> {
        collect_for(&self.messages, &client.id)
    }
}

impl MeetingStore for InMemorySources {
    fn meetings_for_client(&self, client: &Client) -> Vec<MeetingRecord> {
        collect_for(&self.meetings, &client.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        Client {
            id: "c-1".to_string(),
            name: "Jane Doe".to_string(),
            email: "jane@firm.com".to_string(),
        }
    }

    #[test]
    fn test_in_memory_rows_scoped_to_client() {
        let sources = InMemorySources::new();
        sources.add_email(
            "c-1",
            StoredEmail {
                id: "e1".to_string(),
                from: "jane@firm.com".to_string(),
                subject: "Hello".to_string(),
                body: "Quick question".to_string(),
                date: "2024-01-01T00:00:00Z".to_string(),
            },
        );
        sources.add_email(
            "c-2",
            StoredEmail {
                id: "e2".to_string(),
                from: "other@firm.com".to_string(),
                subject: "Other".to_string(),
                body: String::new(),
                date: "2024-01-02T00:00:00Z".to_string(),
            },
        );

        let client = test_client();
        let emails = sources.emails_for_client(&client);
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].id, "e1");
        assert!(sources.entries_for_client(&client).is_empty());
    }

    #[test]
    fn test_meeting_record_defaults() {
        let json = r#"{"id": "m1", "scheduledFor": "2024-03-01T10:00:00Z"}"#;
        let meeting: MeetingRecord = serde_json::from_str(json).unwrap();
        assert_eq!(meeting.status, MeetingStatus::Scheduled);
        assert_eq!(meeting.duration_minutes, 0);
        assert!(meeting.attendees.is_empty());
    }
}
