use std::collections::HashSet;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{AttendanceRecord, AttendanceStatus, ExcuseAnalysis, ExcuseCandidate};

/// Render the console report: per-slot attendance lines, a per-session
/// summary, and the excuse-email section with optional analysis.
pub fn build_report(
    week: &str,
    start: NaiveDate,
    end: NaiveDate,
    off_days: &[NaiveDate],
    records: &[AttendanceRecord],
    excuses: &[(ExcuseCandidate, Option<ExcuseAnalysis>)],
    analysis_enabled: bool,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Week: {week} | Range: {start} to {end}");
    if !off_days.is_empty() {
        let days: Vec<String> = off_days.iter().map(|d| d.to_string()).collect();
        let _ = writeln!(output, "Days off: {}", days.join(", "));
    }
    let _ = writeln!(output);

    let mut current_key: Option<(NaiveDate, String)> = None;
    for record in records {
        let key = (record.date, record.session_id.clone());
        if current_key.as_ref() != Some(&key) {
            current_key = Some(key);
            let _ = writeln!(
                output,
                "{} {} Session {} ({})",
                record.date, record.day_name, record.session_id, record.time_window
            );
        }
        let symbol = match record.status {
            AttendanceStatus::Present => "✓",
            AttendanceStatus::Absent => "✗",
        };
        let email_part = record
            .matched_email
            .as_deref()
            .map(|e| format!(" ({e})"))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "  {} {}: {}{}",
            symbol,
            record.fellow,
            record.status.as_str(),
            email_part
        );
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "Summary:");
    for line in session_summaries(records) {
        let _ = writeln!(output, "  {line}");
    }

    if !excuses.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Possible excuse emails (no image attached):");
        for (candidate, analysis) in excuses {
            let _ = writeln!(output, "  {}: {}", candidate.date, candidate.sender_label());
            match analysis {
                Some(analysis) => {
                    let _ = writeln!(
                        output,
                        "      reason: {} | suggestion: {} ({})",
                        analysis.reason,
                        analysis.suggestion.as_str(),
                        analysis.explanation
                    );
                }
                None if analysis_enabled => {
                    let _ = writeln!(output, "      reason: unavailable");
                }
                None => {}
            }
        }
    }

    output
}

/// One summary line per session, in record order: present/total with
/// absent names when any.
fn session_summaries(records: &[AttendanceRecord]) -> Vec<String> {
    let mut keys: Vec<(NaiveDate, String, String, String)> = Vec::new();
    let mut seen: HashSet<(NaiveDate, String)> = HashSet::new();
    for record in records {
        if seen.insert((record.date, record.session_id.clone())) {
            keys.push((
                record.date,
                record.day_name.clone(),
                record.session_id.clone(),
                record.time_window.clone(),
            ));
        }
    }

    let mut lines = Vec::with_capacity(keys.len());
    for (date, day_name, session_id, _time) in keys {
        let rows: Vec<&AttendanceRecord> = records
            .iter()
            .filter(|r| r.date == date && r.session_id == session_id)
            .collect();
        let present = rows
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count();
        let absent_names: Vec<&str> = rows
            .iter()
            .filter(|r| r.status == AttendanceStatus::Absent)
            .map(|r| r.fellow.as_str())
            .collect();

        let mut line = format!(
            "{} {} Session {}: {}/{} present",
            date,
            day_name,
            session_id,
            present,
            rows.len()
        );
        if !absent_names.is_empty() {
            line.push_str(&format!(" (absent: {})", absent_names.join(", ")));
        }
        lines.push(line);
    }
    lines
}

/// Write the CSV report. Email column is empty for absent rows.
pub fn write_csv<W: std::io::Write>(
    writer: W,
    records: &[AttendanceRecord],
) -> csv::Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(["date", "day", "session", "time", "fellow", "status", "email"])?;
    for record in records {
        w.write_record([
            record.date.to_string(),
            record.day_name.clone(),
            record.session_id.clone(),
            record.time_window.clone(),
            record.fellow.clone(),
            record.status.as_str().to_string(),
            record.matched_email.clone().unwrap_or_default(),
        ])?;
    }
    w.flush()?;
    Ok(())
}
