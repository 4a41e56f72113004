use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;

mod attendance;
mod config;
mod excuse;
mod gmail;
mod logger;
mod matching;
mod models;
mod report;
mod schedule;

use crate::excuse::ExcuseAnalyzer;
use crate::gmail::GmailClient;
use crate::models::{ExcuseAnalysis, ExcuseCandidate, WeekType};

#[derive(Parser)]
#[command(name = "mathcenter-attendance")]
#[command(about = "Check fellow attendance from photo emails to the shared inbox", long_about = None)]
struct Cli {
    /// Week type: blue or gold
    #[arg(long)]
    week: String,
    /// Dates that are off (holidays), e.g. --off 2026-02-20 2026-03-01
    #[arg(long, num_args = 0.., value_name = "DATE")]
    off: Vec<NaiveDate>,
    /// Start of date range (default: Sunday of the current week)
    #[arg(long, value_name = "YYYY-MM-DD")]
    start: Option<NaiveDate>,
    /// End of date range (default: Saturday of the current week)
    #[arg(long, value_name = "YYYY-MM-DD")]
    end: Option<NaiveDate>,
    /// Write the CSV report to this file (default: print only)
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Directory containing schedule.json, fellows.json, token.json
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
    /// Address of the shared inbox to reconcile against
    #[arg(long, default_value = "mathcenter@peddie.org")]
    mailbox: String,
    /// Skip excuse analysis even when GEMINI_API_KEY is set
    #[arg(long)]
    no_llm: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logger::init_logging();

    let cli = Cli::parse();
    let week = WeekType::parse(&cli.week)?;

    let today = chrono::Local::now().date_naive();
    let (default_start, default_end) = schedule::default_week(today);
    let mut start = cli.start.unwrap_or(default_start);
    let mut end = cli.end.unwrap_or(default_end);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let mut off_sorted = cli.off.clone();
    off_sorted.sort();
    off_sorted.dedup();
    let off_days: HashSet<NaiveDate> = off_sorted.iter().copied().collect();

    // Config is validated eagerly, before any mail is touched.
    let week_schedule = config::load_schedule(&cli.config_dir)?;
    let alias_table = config::load_fellows(&cli.config_dir)?;

    let slots = schedule::expand(&week_schedule, week, start, end, &off_days)?;
    if slots.is_empty() {
        println!("No sessions in the given date range (or all days are off).");
        return Ok(());
    }
    tracing::info!(
        week = week.as_str(),
        slots = slots.len(),
        "expanded schedule for {start} to {end}"
    );

    let client = GmailClient::connect(&cli.config_dir, &cli.mailbox)
        .await
        .context("Gmail connection failed")?;

    let dates: BTreeSet<NaiveDate> = slots.iter().map(|s| s.date).collect();
    let mut messages_by_date = BTreeMap::new();
    for date in dates {
        let messages = client
            .messages_for_date(date)
            .await
            .with_context(|| format!("failed to fetch messages for {date}"))?;
        messages_by_date.insert(date, messages);
    }

    let (records, candidates) = attendance::resolve(&slots, &messages_by_date, &alias_table);

    let analyzer = ExcuseAnalyzer::from_env(cli.no_llm);
    let analysis_enabled = analyzer.is_some();
    let mut excuses: Vec<(ExcuseCandidate, Option<ExcuseAnalysis>)> =
        Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let analysis = match &analyzer {
            Some(analyzer) => annotate(analyzer, &client, &candidate).await,
            None => None,
        };
        excuses.push((candidate, analysis));
    }

    let report_text = report::build_report(
        week.as_str(),
        start,
        end,
        &off_sorted,
        &records,
        &excuses,
        analysis_enabled,
    );
    print!("{report_text}");

    if let Some(path) = cli.output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        report::write_csv(file, &records)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nReport written to {}.", path.display());
    }

    Ok(())
}

/// Fetch the candidate's body and run the advisory analysis. Any
/// failure here degrades to "no annotation" for this candidate only.
async fn annotate(
    analyzer: &ExcuseAnalyzer,
    client: &GmailClient,
    candidate: &ExcuseCandidate,
) -> Option<ExcuseAnalysis> {
    let body = match client.message_body(&candidate.message_id).await {
        Ok(body) if !body.is_empty() => body,
        Ok(_) => candidate.body_snippet.clone(),
        Err(err) => {
            tracing::warn!(
                message_id = candidate.message_id.as_str(),
                error = %err,
                "body fetch failed, analyzing snippet instead"
            );
            candidate.body_snippet.clone()
        }
    };

    match analyzer.analyze(candidate, &body).await {
        Ok(analysis) => Some(analysis),
        Err(err) => {
            tracing::warn!(
                message_id = candidate.message_id.as_str(),
                error = %err,
                "excuse analysis failed"
            );
            None
        }
    }
}
