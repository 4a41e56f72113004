use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;

use crate::config::AliasTable;
use crate::matching::{match_sender, MatchResult};
use crate::models::{
    AttendanceRecord, AttendanceStatus, ExcuseCandidate, ExpectedSlot, InboundMessage,
};

/// Reconcile expected slots against fetched messages.
///
/// For every (slot, expected fellow) pair, the first image-bearing
/// message on the slot's date whose sender resolves to that fellow
/// marks them present; repeat submissions are logged, never counted
/// twice. Image messages matching no expected fellow are dropped.
/// Every non-image message on a slot date becomes an excuse candidate,
/// once per message id, in chronological-then-arrival order.
pub fn resolve(
    slots: &[ExpectedSlot],
    messages_by_date: &BTreeMap<NaiveDate, Vec<InboundMessage>>,
    aliases: &AliasTable,
) -> (Vec<AttendanceRecord>, Vec<ExcuseCandidate>) {
    let mut records = Vec::new();

    for slot in slots {
        let day_messages = messages_by_date
            .get(&slot.date)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let with_image: Vec<&InboundMessage> = day_messages
            .iter()
            .filter(|m| m.has_image_attachment)
            .collect();

        for fellow in &slot.expected_fellows {
            let mut matched_email: Option<String> = None;
            for message in &with_image {
                let result = match_sender(
                    &message.sender_name,
                    &message.sender_email,
                    &slot.expected_fellows,
                    aliases,
                );
                if result != MatchResult::Matched(fellow.clone()) {
                    continue;
                }
                if matched_email.is_some() {
                    tracing::debug!(
                        fellow = fellow.as_str(),
                        message_id = message.message_id.as_str(),
                        date = %slot.date,
                        session = slot.session_id.as_str(),
                        "repeat submission, already marked present"
                    );
                    continue;
                }
                matched_email = Some(message.sender_email.clone());
            }

            let status = if matched_email.is_some() {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            };
            records.push(AttendanceRecord {
                date: slot.date,
                day_name: slot.day_name().to_string(),
                session_id: slot.session_id.clone(),
                time_window: slot.time_window.clone(),
                fellow: fellow.clone(),
                status,
                matched_email,
            });
        }
    }

    // Excuse candidates are keyed by date, not slot: repeated sessions
    // on one date must not duplicate them.
    let slot_dates: BTreeSet<NaiveDate> = slots.iter().map(|s| s.date).collect();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut excuses = Vec::new();
    for date in &slot_dates {
        let Some(messages) = messages_by_date.get(date) else {
            continue;
        };
        for message in messages {
            if message.has_image_attachment {
                continue;
            }
            if !seen_ids.insert(message.message_id.clone()) {
                continue;
            }
            excuses.push(ExcuseCandidate {
                message_id: message.message_id.clone(),
                date: message.date,
                sender_name: message.sender_name.clone(),
                sender_email: message.sender_email.clone(),
                body_snippet: message.body_snippet.clone(),
            });
        }
    }

    (records, excuses)
}
