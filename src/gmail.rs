use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::InboundMessage;

/// Gmail search clause for image attachments. The center only accepts
/// photos, so these extensions define "attendance submission".
const IMAGE_ATTACHMENT_QUERY: &str =
    "has:attachment (filename:jpg OR filename:jpeg OR filename:png OR filename:heic OR filename:gif)";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Failures at the mail boundary. All fatal for the run; the core
/// never retries retrieval.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gmail token not found at {0} (authorize the account first)")]
    TokenNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed token file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("token expired or revoked; re-authorize the mailbox")]
    AuthExpired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Gmail API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// OAuth token file, field-compatible with what Google's auth
/// libraries write to token.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(alias = "access_token")]
    token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    expiry: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn token_is_expired(token: &StoredToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry) => {
            match chrono::DateTime::parse_from_rfc3339(&expiry.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry))
            {
                // 60s of clock skew headroom.
                Ok(expiry) => expiry <= chrono::Utc::now() + Duration::seconds(60),
                Err(_) => true,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

/// Gmail REST client bound to one target mailbox.
pub struct GmailClient {
    http: reqwest::Client,
    access_token: String,
    mailbox: String,
}

impl GmailClient {
    /// Load token.json from the config directory, refreshing the
    /// access token (and persisting the refreshed file) when expired.
    pub async fn connect(config_dir: &Path, mailbox: &str) -> Result<Self, RetrievalError> {
        let path = config_dir.join("token.json");
        if !path.exists() {
            return Err(RetrievalError::TokenNotFound(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| RetrievalError::Io {
            path: path.clone(),
            source,
        })?;
        let mut token: StoredToken =
            serde_json::from_str(&text).map_err(|source| RetrievalError::Json {
                path: path.clone(),
                source,
            })?;

        let http = reqwest::Client::new();
        if token_is_expired(&token) {
            tracing::debug!("access token expired, refreshing");
            token = refresh_token(&http, token).await?;
            let serialized =
                serde_json::to_string_pretty(&token).map_err(|source| RetrievalError::Json {
                    path: path.clone(),
                    source,
                })?;
            std::fs::write(&path, serialized)
                .map_err(|source| RetrievalError::Io { path, source })?;
        }

        Ok(Self {
            http,
            access_token: token.token,
            mailbox: mailbox.to_string(),
        })
    }

    /// All messages to the mailbox on one date, with image-attachment
    /// detection done via a second search query.
    pub async fn messages_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<InboundMessage>, RetrievalError> {
        // Gmail's before: is exclusive; use the next day for an
        // inclusive single-date window.
        let after = date.format("%Y/%m/%d");
        let before = (date + Duration::days(1)).format("%Y/%m/%d");

        let image_query = format!("{IMAGE_ATTACHMENT_QUERY} after:{after} before:{before}");
        let all_query = format!("to:{} after:{after} before:{before}", self.mailbox);

        let image_ids: HashSet<String> = self.list_ids(&image_query).await?.into_iter().collect();
        let all_ids = self.list_ids(&all_query).await?;

        let mut messages = Vec::with_capacity(all_ids.len());
        for id in all_ids {
            let detail = self.fetch_metadata(&id).await?;
            let from_header = header_value(&detail, "From");
            let (email, name) = parse_from_header(&from_header);
            messages.push(InboundMessage {
                has_image_attachment: image_ids.contains(&id),
                message_id: id,
                date,
                sender_name: name,
                sender_email: email,
                body_snippet: detail.snippet,
            });
        }

        tracing::debug!(
            date = %date,
            total = messages.len(),
            with_image = messages.iter().filter(|m| m.has_image_attachment).count(),
            "fetched inbox messages"
        );
        Ok(messages)
    }

    /// Plain-text body of one message, for excuse analysis. Prefers
    /// text/plain MIME parts, falls back to tag-stripped text/html.
    /// Empty string when the message has no text body.
    pub async fn message_body(&self, message_id: &str) -> Result<String, RetrievalError> {
        let url = format!(
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/{message_id}"
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let detail: MessageDetail = check_response(resp).await?.json().await?;

        let Some(payload) = detail.payload else {
            return Ok(String::new());
        };
        if let Some(text) = extract_body_text(&payload, "text/plain") {
            return Ok(text.trim().to_string());
        }
        if let Some(html) = extract_body_text(&payload, "text/html") {
            let stripped = TAG_RE.replace_all(&html, " ");
            return Ok(stripped.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        Ok(String::new())
    }

    async fn list_ids(&self, query: &str) -> Result<Vec<String>, RetrievalError> {
        let resp = self
            .http
            .get("https://gmail.googleapis.com/gmail/v1/users/me/messages")
            .bearer_auth(&self.access_token)
            .query(&[("q", query), ("maxResults", "500")])
            .send()
            .await?;
        let list: MessageListResponse = check_response(resp).await?.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_metadata(&self, message_id: &str) -> Result<MessageDetail, RetrievalError> {
        let url = format!(
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/{message_id}"
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("format", "metadata"), ("metadataHeaders", "From")])
            .send()
            .await?;
        Ok(check_response(resp).await?.json().await?)
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(RetrievalError::AuthExpired);
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(RetrievalError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

async fn refresh_token(
    http: &reqwest::Client,
    token: StoredToken,
) -> Result<StoredToken, RetrievalError> {
    let refresh_token = token
        .refresh_token
        .as_deref()
        .ok_or(RetrievalError::AuthExpired)?;

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = http.post(&token.token_uri).form(&form).send().await?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        if body.contains("invalid_grant") {
            return Err(RetrievalError::AuthExpired);
        }
        return Err(RetrievalError::RefreshFailed(format!(
            "HTTP {status}: {body}"
        )));
    }

    let parsed: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| RetrievalError::RefreshFailed(e.to_string()))?;
    let access_token = parsed["access_token"]
        .as_str()
        .ok_or_else(|| RetrievalError::RefreshFailed("no access_token in response".to_string()))?;
    let expires_in = parsed["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + Duration::seconds(expires_in as i64);

    let mut refreshed = token;
    refreshed.token = access_token.to_string();
    refreshed.expiry = Some(expiry.to_rfc3339());
    Ok(refreshed)
}

fn header_value(detail: &MessageDetail, name: &str) -> String {
    detail
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or(&[])
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Split a From header into (email, display name). Either side may be
/// empty; addresses are lowercased.
pub fn parse_from_header(raw: &str) -> (String, String) {
    if let (Some(lt), Some(gt)) = (raw.find('<'), raw.rfind('>')) {
        if lt < gt {
            let email = raw[lt + 1..gt].trim().to_lowercase();
            let name = raw[..lt].trim().trim_matches('"').trim().to_string();
            return (email, name);
        }
    }
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        (trimmed.to_lowercase(), String::new())
    } else {
        (String::new(), trimmed.to_string())
    }
}

fn extract_body_text(payload: &Payload, target_mime: &str) -> Option<String> {
    if payload.mime_type == target_mime {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Some(text) = decode_body(data) {
                return Some(text);
            }
        }
    }
    for part in &payload.parts {
        if let Some(text) = extract_body_text(part, target_mime) {
            return Some(text);
        }
    }
    None
}

fn decode_body(data: &str) -> Option<String> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_header_with_display_name() {
        let (email, name) = parse_from_header("Jerry Liu <Jerry.Liu42@Students.Example.org>");
        assert_eq!(email, "jerry.liu42@students.example.org");
        assert_eq!(name, "Jerry Liu");
    }

    #[test]
    fn from_header_with_quoted_comma_name() {
        let (email, name) = parse_from_header("\"Liu, Jerry\" <jl@example.org>");
        assert_eq!(email, "jl@example.org");
        assert_eq!(name, "Liu, Jerry");
    }

    #[test]
    fn from_header_bare_address() {
        let (email, name) = parse_from_header("ALICE@example.com");
        assert_eq!(email, "alice@example.com");
        assert_eq!(name, "");
    }

    #[test]
    fn from_header_bare_name() {
        let (email, name) = parse_from_header("Front Desk");
        assert_eq!(email, "");
        assert_eq!(name, "Front Desk");
    }

    #[test]
    fn message_list_deserializes_with_and_without_messages() {
        let list: MessageListResponse = serde_json::from_str(
            r#"{"messages": [{"id": "m1"}, {"id": "m2"}], "resultSizeEstimate": 2}"#,
        )
        .unwrap();
        assert_eq!(list.messages.len(), 2);

        let empty: MessageListResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(empty.messages.is_empty());
    }

    #[test]
    fn body_text_prefers_text_plain_part() {
        use base64::Engine;
        let encode = |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s);
        let json = format!(
            r#"{{
                "id": "m1",
                "payload": {{
                    "mimeType": "multipart/alternative",
                    "parts": [
                        {{"mimeType": "text/html", "body": {{"data": "{}"}}}},
                        {{"mimeType": "text/plain", "body": {{"data": "{}"}}}}
                    ]
                }}
            }}"#,
            encode("<p>sick today</p>"),
            encode("sick today")
        );
        let detail: MessageDetail = serde_json::from_str(&json).unwrap();
        let payload = detail.payload.unwrap();
        assert_eq!(
            extract_body_text(&payload, "text/plain").as_deref(),
            Some("sick today")
        );
    }

    #[test]
    fn token_accepts_access_token_alias_and_defaults() {
        let token: StoredToken = serde_json::from_str(
            r#"{"access_token": "ya29.x", "refresh_token": "1//r", "client_id": "c"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "ya29.x");
        assert_eq!(token.token_uri, "https://oauth2.googleapis.com/token");
        assert!(token_is_expired(&token));
    }

    #[test]
    fn future_expiry_is_not_expired() {
        let future = chrono::Utc::now() + Duration::hours(1);
        let token: StoredToken = serde_json::from_str(&format!(
            r#"{{"token": "t", "refresh_token": "r", "client_id": "c", "expiry": "{}"}}"#,
            future.to_rfc3339()
        ))
        .unwrap();
        assert!(!token_is_expired(&token));
    }
}
