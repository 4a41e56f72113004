use std::env;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{ExcuseAnalysis, ExcuseCandidate, ExcuseSuggestion};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const SYSTEM_PROMPT: &str = r#"You are helping a math center coordinator evaluate emails from students/fellows who may be explaining an absence from a required session.

For each email sent to the math center (no attendance photo attached), you must:
1. Extract the reason the person gives for being absent (or state "No reason given" if unclear).
2. Suggest whether to APPROVE or REJECT the excuse based on the email content and the reason.
3. Give a brief explanation for your suggestion (one sentence).

Guidelines:
- Approve if the email clearly states a legitimate excuse (illness, family emergency, conflict, etc.) and appears to be from a student/fellow.
- Reject if the email is spam, unrelated, or does not clearly explain an absence.
- If the reason is vague or missing, lean toward reject unless the tone clearly indicates an excuse request.
- Respond only with valid JSON in this exact format, no other text:
{"reason": "...", "suggestion": "approve" or "reject", "explanation": "..."}"#;

/// Optional Gemini-backed excuse annotator. Construction is the
/// capability gate: no key or an explicit disable means no analyzer,
/// and the report renders candidates without annotations.
#[derive(Clone)]
pub struct ExcuseAnalyzer {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl ExcuseAnalyzer {
    pub fn from_env(disabled: bool) -> Option<Self> {
        if disabled {
            tracing::info!("excuse analysis disabled (--no-llm)");
            return None;
        }
        let Ok(api_key) = env::var("GEMINI_API_KEY") else {
            tracing::info!("GEMINI_API_KEY not set, skipping excuse analysis");
            return None;
        };
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Annotate one candidate. Failures are per-candidate and
    /// advisory: the caller logs and renders "unavailable".
    pub async fn analyze(
        &self,
        candidate: &ExcuseCandidate,
        body: &str,
    ) -> Result<ExcuseAnalysis> {
        let who = if !candidate.sender_name.is_empty() {
            candidate.sender_name.as_str()
        } else if !candidate.sender_email.is_empty() {
            candidate.sender_email.as_str()
        } else {
            "Unknown"
        };
        let email = if candidate.sender_email.is_empty() {
            "unknown"
        } else {
            candidate.sender_email.as_str()
        };
        let body = if body.is_empty() { "(empty)" } else { body };
        let prompt = format!(
            "{SYSTEM_PROMPT}\n\n---\n\nSender: {who}\nEmail address: {email}\n\nEmail body:\n---\n{body}\n---\n\nRespond with JSON only: {{\"reason\": \"...\", \"suggestion\": \"approve\" or \"reject\", \"explanation\": \"...\"}}"
        );

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("Gemini response read failed")?;
        if !status.is_success() {
            return Err(anyhow!("Gemini API error: {status} - {body}"));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Gemini response parse failed")?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| anyhow!("Gemini response missing candidates"))?;

        parse_analysis(text)
    }
}

/// Parse the model's JSON reply, tolerating markdown code fences.
fn parse_analysis(text: &str) -> Result<ExcuseAnalysis> {
    let cleaned: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    #[derive(Deserialize)]
    struct RawAnalysis {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        suggestion: String,
        #[serde(default)]
        explanation: String,
    }

    let raw: RawAnalysis =
        serde_json::from_str(cleaned.trim()).context("Gemini reply was not valid JSON")?;
    let suggestion = match raw.suggestion.to_lowercase().as_str() {
        "approve" => ExcuseSuggestion::Approve,
        _ => ExcuseSuggestion::Reject,
    };
    let reason = if raw.reason.is_empty() {
        "(none)".to_string()
    } else {
        raw.reason
    };
    Ok(ExcuseAnalysis {
        reason,
        suggestion,
        explanation: raw.explanation,
    })
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}
