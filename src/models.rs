use chrono::{NaiveDate, NaiveTime, Weekday};

use crate::config::ConfigError;

/// Which weekly schedule applies: the schedule document defines one
/// session plan per week type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeekType {
    Blue,
    Gold,
}

impl WeekType {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "blue" => Ok(WeekType::Blue),
            "gold" => Ok(WeekType::Gold),
            _ => Err(ConfigError::UnknownWeekType(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeekType::Blue => "blue",
            WeekType::Gold => "gold",
        }
    }
}

/// One scheduled session on a weekday: who is expected, and when.
#[derive(Debug, Clone)]
pub struct SessionDef {
    pub id: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub fellows: Vec<String>,
}

impl SessionDef {
    pub fn time_window(&self) -> String {
        format!(
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// One session on one concrete date, with its expected-fellow roster.
/// Produced by the schedule expander; immutable afterwards.
#[derive(Debug, Clone)]
pub struct ExpectedSlot {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub session_id: String,
    pub time_window: String,
    pub expected_fellows: Vec<String>,
}

impl ExpectedSlot {
    pub fn day_name(&self) -> &'static str {
        weekday_name(self.weekday)
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// A message fetched from the shared inbox, already reduced to the
/// fields the reconciliation cares about.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub date: NaiveDate,
    pub sender_name: String,
    pub sender_email: String,
    pub has_image_attachment: bool,
    pub body_snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// One report row: a (slot, expected fellow) pair with its outcome.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub day_name: String,
    pub session_id: String,
    pub time_window: String,
    pub fellow: String,
    pub status: AttendanceStatus,
    pub matched_email: Option<String>,
}

/// A non-image message to the inbox on a checked date: possibly an
/// absence explanation. One per distinct message id.
#[derive(Debug, Clone)]
pub struct ExcuseCandidate {
    pub message_id: String,
    pub date: NaiveDate,
    pub sender_name: String,
    pub sender_email: String,
    pub body_snippet: String,
}

impl ExcuseCandidate {
    pub fn sender_label(&self) -> String {
        if self.sender_name.is_empty() {
            self.sender_email.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender_email)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcuseSuggestion {
    Approve,
    Reject,
}

impl ExcuseSuggestion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExcuseSuggestion::Approve => "approve",
            ExcuseSuggestion::Reject => "reject",
        }
    }
}

/// Advisory annotation for an excuse candidate, produced by the
/// optional analysis collaborator.
#[derive(Debug, Clone)]
pub struct ExcuseAnalysis {
    pub reason: String,
    pub suggestion: ExcuseSuggestion,
    pub explanation: String,
}
