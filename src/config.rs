use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};
use serde::Deserialize;

use crate::models::{SessionDef, WeekType};

/// Fatal configuration problems. All of these abort the run before
/// any mail is fetched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("schedule not found: {0}")]
    ScheduleNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown week type: {0} (use 'blue' or 'gold')")]
    UnknownWeekType(String),
    #[error("schedule has no '{}' week", .0.as_str())]
    MissingWeek(WeekType),
    #[error("unknown weekday in schedule: {0}")]
    UnknownWeekday(String),
    #[error("session '{session}' on {day}: {reason}")]
    InvalidSession {
        day: String,
        session: String,
        reason: String,
    },
    #[error("duplicate session id '{session}' on {day}")]
    DuplicateSessionId { day: String, session: String },
    #[error("email {email} is claimed by both '{first}' and '{second}'")]
    AmbiguousAlias {
        email: String,
        first: String,
        second: String,
    },
}

/// Parsed, validated weekly schedule: week type -> weekday -> sessions
/// in declaration order. Loaded once, immutable for the run.
#[derive(Debug, Clone)]
pub struct WeekSchedule {
    plans: HashMap<WeekType, HashMap<Weekday, Vec<SessionDef>>>,
}

impl WeekSchedule {
    pub fn plan(
        &self,
        week: WeekType,
    ) -> Result<&HashMap<Weekday, Vec<SessionDef>>, ConfigError> {
        self.plans.get(&week).ok_or(ConfigError::MissingWeek(week))
    }
}

/// One canonical fellow with their known addresses and display-name
/// variants. Declaration order in fellows.json is preserved and acts
/// as the deterministic tie-break order during matching.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub name: String,
    pub emails: Vec<String>,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// First declared fellow (if any) that lists this address.
    pub fn fellow_for_email(&self, email: &str) -> Option<&str> {
        let needle = email.to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.emails.iter().any(|e| *e == needle))
            .map(|entry| entry.name.as_str())
    }

}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: String,
    start: String,
    end: String,
    #[serde(default)]
    fellows: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawAliasEntry {
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

pub fn load_schedule(config_dir: &Path) -> Result<WeekSchedule, ConfigError> {
    let path = config_dir.join("schedule.json");
    if !path.exists() {
        return Err(ConfigError::ScheduleNotFound(path));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse_schedule(&text, &path)
}

pub fn parse_schedule(text: &str, path: &Path) -> Result<WeekSchedule, ConfigError> {
    let raw: HashMap<String, HashMap<String, Vec<RawSession>>> =
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut plans = HashMap::new();
    for (week_key, days) in raw {
        let week = WeekType::parse(&week_key)?;
        let mut plan: HashMap<Weekday, Vec<SessionDef>> = HashMap::new();
        for (day_key, sessions) in days {
            let weekday = Weekday::from_str(&day_key)
                .map_err(|_| ConfigError::UnknownWeekday(day_key.clone()))?;
            let mut defs = Vec::with_capacity(sessions.len());
            for session in sessions {
                defs.push(validate_session(&day_key, session)?);
            }
            let mut seen = Vec::new();
            for def in &defs {
                if seen.contains(&def.id) {
                    return Err(ConfigError::DuplicateSessionId {
                        day: day_key.clone(),
                        session: def.id.clone(),
                    });
                }
                seen.push(def.id.clone());
            }
            plan.insert(weekday, defs);
        }
        plans.insert(week, plan);
    }

    Ok(WeekSchedule { plans })
}

fn validate_session(day: &str, raw: RawSession) -> Result<SessionDef, ConfigError> {
    if raw.id.trim().is_empty() {
        return Err(ConfigError::InvalidSession {
            day: day.to_string(),
            session: raw.id,
            reason: "empty session id".to_string(),
        });
    }
    let start = parse_time(day, &raw.id, &raw.start)?;
    let end = parse_time(day, &raw.id, &raw.end)?;
    if start >= end {
        return Err(ConfigError::InvalidSession {
            day: day.to_string(),
            session: raw.id,
            reason: format!("start {} is not before end {}", raw.start, raw.end),
        });
    }
    Ok(SessionDef {
        id: raw.id,
        start,
        end,
        fellows: raw.fellows,
    })
}

fn parse_time(day: &str, session: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| ConfigError::InvalidSession {
        day: day.to_string(),
        session: session.to_string(),
        reason: format!("bad time '{value}' (expected HH:MM)"),
    })
}

/// Load fellows.json. A missing file is fine: matching degrades to
/// name-only comparison.
pub fn load_fellows(config_dir: &Path) -> Result<AliasTable, ConfigError> {
    let path = config_dir.join("fellows.json");
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no fellows file, using name-only matching");
        return Ok(AliasTable::empty());
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse_fellows(&text, &path)
}

pub fn parse_fellows(text: &str, path: &Path) -> Result<AliasTable, ConfigError> {
    // serde_json's preserve_order keeps declaration order, which the
    // matcher relies on for deterministic tie-breaks.
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut entries = Vec::with_capacity(raw.len());
    let mut claimed: HashMap<String, String> = HashMap::new();
    for (name, value) in raw {
        let entry: RawAliasEntry =
            serde_json::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let emails: Vec<String> = entry
            .emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        for email in &emails {
            if let Some(first) = claimed.get(email) {
                return Err(ConfigError::AmbiguousAlias {
                    email: email.clone(),
                    first: first.clone(),
                    second: name.clone(),
                });
            }
            claimed.insert(email.clone(), name.clone());
        }
        entries.push(AliasEntry {
            name,
            emails,
            aliases: entry.aliases,
        });
    }

    Ok(AliasTable { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<WeekSchedule, ConfigError> {
        parse_schedule(text, Path::new("schedule.json"))
    }

    #[test]
    fn parses_a_valid_schedule() {
        let schedule = parse(
            r#"{
                "blue": {
                    "tuesday": [
                        {"id": "1", "start": "19:30", "end": "20:30", "fellows": ["Alice Chen"]},
                        {"id": "2", "start": "20:30", "end": "21:30", "fellows": ["Bob Park"]}
                    ]
                },
                "gold": {}
            }"#,
        )
        .unwrap();

        let plan = schedule.plan(WeekType::Blue).unwrap();
        let sessions = &plan[&Weekday::Tue];
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "1");
        assert_eq!(sessions[0].fellows, vec!["Alice Chen"]);
        assert_eq!(sessions[1].time_window(), "20:30-21:30");
    }

    #[test]
    fn rejects_start_not_before_end() {
        let err = parse(
            r#"{"blue": {"monday": [{"id": "1", "start": "10:00", "end": "09:00"}]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSession { .. }));
    }

    #[test]
    fn rejects_duplicate_session_ids_within_a_weekday() {
        let err = parse(
            r#"{"blue": {"monday": [
                {"id": "1", "start": "09:00", "end": "10:00"},
                {"id": "1", "start": "10:00", "end": "11:00"}
            ]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSessionId { .. }));
    }

    #[test]
    fn rejects_unknown_weekday_and_week_type() {
        let err = parse(r#"{"blue": {"someday": []}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWeekday(_)));

        let err = parse(r#"{"green": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWeekType(_)));
    }

    #[test]
    fn missing_week_plan_is_an_error() {
        let schedule = parse(r#"{"blue": {}}"#).unwrap();
        assert!(matches!(
            schedule.plan(WeekType::Gold),
            Err(ConfigError::MissingWeek(WeekType::Gold))
        ));
    }

    #[test]
    fn fellows_preserve_declaration_order_and_lowercase_emails() {
        let table = parse_fellows(
            r#"{
                "Alice Chen": {"emails": ["Alice@Example.com"], "aliases": ["Ali"]},
                "Bob Park": {"emails": ["bob@example.com"]}
            }"#,
            Path::new("fellows.json"),
        )
        .unwrap();

        assert_eq!(table.entries()[0].name, "Alice Chen");
        assert_eq!(table.entries()[1].name, "Bob Park");
        assert_eq!(table.fellow_for_email("ALICE@example.com"), Some("Alice Chen"));
        assert_eq!(table.fellow_for_email("nobody@example.com"), None);
        assert_eq!(table.entries()[0].aliases, ["Ali"]);
    }

    #[test]
    fn shared_email_across_fellows_is_rejected() {
        let err = parse_fellows(
            r#"{
                "Alice Chen": {"emails": ["shared@example.com"]},
                "Bob Park": {"emails": ["shared@example.com"]}
            }"#,
            Path::new("fellows.json"),
        )
        .unwrap_err();
        match err {
            ConfigError::AmbiguousAlias { email, first, second } => {
                assert_eq!(email, "shared@example.com");
                assert_eq!(first, "Alice Chen");
                assert_eq!(second, "Bob Park");
            }
            other => panic!("expected AmbiguousAlias, got {other:?}"),
        }
    }
}
