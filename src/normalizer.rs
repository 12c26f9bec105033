//! Communication normalizer.
//!
//! Merges a client's emails, calendar entries, chat messages, and meetings
//! into one ordered list of canonical records. Meetings flatten their
//! description, agenda, and notes into the body so text-based back ends see
//! all meeting content as prose. Nothing is filtered here; malformed
//! records pass through and the processing manager validates before
//! dispatch.

use std::sync::Arc;

use crate::directory::Client;
use crate::sources::{
    CalendarEntry, CalendarStore, ChatMessage, ChatStore, EmailStore, MeetingRecord, MeetingStore,
    StoredEmail,
};
use crate::types::{CommunicationKind, CommunicationRecord, MeetingDetails};

pub struct CommunicationLoader {
    emails: Arc<dyn EmailStore>,
    calendar: Arc<dyn CalendarStore>,
    chat: Arc<dyn ChatStore>,
    meetings: Arc<dyn MeetingStore>,
}

impl CommunicationLoader {
    pub fn new(
        emails: Arc<dyn EmailStore>,
        calendar: Arc<dyn CalendarStore>,
        chat: Arc<dyn ChatStore>,
        meetings: Arc<dyn MeetingStore>,
    ) -> Self {
        Self {
            emails,
            calendar,
            chat,
            meetings,
        }
    }

    /// Assemble the full communication set for one client, oldest first.
    /// Records whose timestamps do not parse sort to the front; input order
    /// is preserved among equal timestamps.
    pub fn load_for_client(&self, client: &Client) -> Vec<CommunicationRecord> {
        let emails = self.emails.emails_for_client(client);
        let entries = self.calendar.entries_for_client(client);
        let messages = self.chat.messages_for_client(client);
        let meetings = self.meetings.meetings_for_client(client);

        log::debug!(
            "Normalizer: {} emails, {} events, {} chats, {} meetings for client {}",
            emails.len(),
            entries.len(),
            messages.len(),
            meetings.len(),
            client.id
        );

        let mut records: Vec<CommunicationRecord> = Vec::with_capacity(
            emails.len() + entries.len() + messages.len() + meetings.len(),
        );
        records.extend(emails.into_iter().map(record_from_email));
        records.extend(entries.into_iter().map(record_from_entry));
        records.extend(messages.into_iter().map(record_from_message));
        records.extend(
            meetings
                .into_iter()
                .map(|m| record_from_meeting(client, m)),
        );

        // Stable sort keeps input order for ties and for unparseable
        // timestamps, which compare as None and land at the front.
        records.sort_by_key(|r| r.parsed_timestamp());
        records
    }
}

fn record_from_email(email: StoredEmail) -> CommunicationRecord {
    CommunicationRecord {
        id: email.id,
        kind: CommunicationKind::Email,
        from: email.from,
        subject: none_if_empty(email.subject),
        body: email.body,
        timestamp: email.date,
        meeting: None,
    }
}

fn record_from_entry(entry: CalendarEntry) -> CommunicationRecord {
    CommunicationRecord {
        id: entry.id,
        kind: CommunicationKind::Event,
        from: entry.organizer,
        subject: none_if_empty(entry.summary),
        body: entry.description,
        timestamp: entry.start,
        meeting: None,
    }
}

fn record_from_message(message: ChatMessage) -> CommunicationRecord {
    CommunicationRecord {
        id: message.id,
        kind: CommunicationKind::Chat,
        from: message.sender,
        subject: None,
        body: message.text,
        timestamp: message.sent_at,
        meeting: None,
    }
}

fn record_from_meeting(client: &Client, meeting: MeetingRecord) -> CommunicationRecord {
    let body = meeting_body(&meeting);
    // Meetings without an organizer are attributed to the client
    let from = if meeting.organizer.is_empty() {
        client.email.clone()
    } else {
        meeting.organizer
    };
    CommunicationRecord {
        id: meeting.id,
        kind: CommunicationKind::Meeting,
        from,
        subject: none_if_empty(meeting.title),
        body,
        timestamp: meeting.scheduled_for,
        meeting: Some(MeetingDetails {
            meeting_type: meeting.meeting_type,
            status: meeting.status,
            duration_minutes: meeting.duration_minutes,
            location: meeting.location,
            url: meeting.url,
            agenda: meeting.agenda,
            notes: meeting.notes,
            attendees: meeting.attendees,
        }),
    }
}

/// Description, agenda, and notes flattened into blank-line-separated prose.
fn meeting_body(meeting: &MeetingRecord) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !meeting.description.trim().is_empty() {
        parts.push(meeting.description.trim().to_string());
    }
    if let Some(agenda) = meeting.agenda.as_deref() {
        if !agenda.trim().is_empty() {
            parts.push(format!("Agenda: {}", agenda.trim()));
        }
    }
    if let Some(notes) = meeting.notes.as_deref() {
        if !notes.trim().is_empty() {
            parts.push(format!("Notes: {}", notes.trim()));
        }
    }
    parts.join("\n\n")
}

fn none_if_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::InMemorySources;
    use crate::types::MeetingStatus;

    fn test_client() -> Client {
        Client {
            id: "c-1".to_string(),
            name: "Jane Doe".to_string(),
            email: "jane@firm.com".to_string(),
        }
    }

    fn loader_with(sources: InMemorySources) -> CommunicationLoader {
        let sources = Arc::new(sources);
        CommunicationLoader::new(
            sources.clone(),
            sources.clone(),
            sources.clone(),
            sources,
        )
    }

    fn seed_email(sources: &InMemorySources, id: &str, date: &str) {
        sources.add_email(
            "c-1",
            StoredEmail {
                id: id.to_string(),
                from: "jane@firm.com".to_string(),
                subject: "Subject".to_string(),
                body: "Body".to_string(),
                date: date.to_string(),
            },
        );
    }

    #[test]
    fn test_merges_and_sorts_by_timestamp() {
        let sources = InMemorySources::new();
        seed_email(&sources, "e-new", "2024-03-01T00:00:00Z");
        seed_email(&sources, "e-old", "2024-01-01T00:00:00Z");
        sources.add_message(
            "c-1",
            ChatMessage {
                id: "m-mid".to_string(),
                sender: "jane@firm.com".to_string(),
                text: "ping".to_string(),
                sent_at: "2024-02-01T00:00:00Z".to_string(),
            },
        );

        let records = loader_with(sources).load_for_client(&test_client());
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["e-old", "m-mid", "e-new"]);
    }

    #[test]
    fn test_meeting_body_flattens_all_sections() {
        let sources = InMemorySources::new();
        sources.add_meeting(
            "c-1",
            MeetingRecord {
                id: "mt-1".to_string(),
                organizer: String::new(),
                title: "Quarterly review".to_string(),
                description: "Walked through holdings".to_string(),
                agenda: Some("Rebalance discussion".to_string()),
                notes: Some("Client asked about bonds".to_string()),
                meeting_type: "review".to_string(),
                status: MeetingStatus::Completed,
                duration_minutes: 60,
                location: None,
                url: None,
                attendees: vec!["jane@firm.com".to_string()],
                scheduled_for: "2024-02-10T15:00:00Z".to_string(),
            },
        );

        let records = loader_with(sources).load_for_client(&test_client());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, CommunicationKind::Meeting);
        assert!(record.body.contains("Walked through holdings"));
        assert!(record.body.contains("Agenda: Rebalance discussion"));
        assert!(record.body.contains("Notes: Client asked about bonds"));
        // Organizer fell back to the client address
        assert_eq!(record.from, "jane@firm.com");
        assert_eq!(record.meeting.as_ref().unwrap().duration_minutes, 60);
    }

    #[test]
    fn test_malformed_timestamps_kept_and_front_sorted() {
        let sources = InMemorySources::new();
        seed_email(&sources, "e-good", "2024-01-01T00:00:00Z");
        seed_email(&sources, "e-bad", "yesterday-ish");

        let records = loader_with(sources).load_for_client(&test_client());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "e-bad");
        assert_eq!(records[0].timestamp, "yesterday-ish");
    }

    #[test]
    fn test_empty_subject_becomes_none() {
        let sources = InMemorySources::new();
        sources.add_email(
            "c-1",
            StoredEmail {
                id: "e1".to_string(),
                from: "jane@firm.com".to_string(),
                subject: "  ".to_string(),
                body: "hi".to_string(),
                date: "2024-01-01T00:00:00Z".to_string(),
            },
        );
        let records = loader_with(sources).load_for_client(&test_client());
        assert_eq!(records[0].subject, None);
    }

    #[test]
    fn test_calendar_entry_maps_summary_to_subject() {
        let sources = InMemorySources::new();
        sources.add_entry(
            "c-1",
            CalendarEntry {
                id: "cal-1".to_string(),
                organizer: "advisor@firm.com".to_string(),
                summary: "Planning call".to_string(),
                description: "Annual goals".to_string(),
                start: "2024-01-05T09:00:00Z".to_string(),
            },
        );
        let records = loader_with(sources).load_for_client(&test_client());
        assert_eq!(records[0].kind, CommunicationKind::Event);
        assert_eq!(records[0].subject.as_deref(), Some("Planning call"));
        assert_eq!(records[0].body, "Annual goals");
    }
}
