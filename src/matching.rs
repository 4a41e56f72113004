use crate::config::AliasTable;

/// Outcome of resolving a sender against a slot's expected fellows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched(String),
    NoMatch,
}

/// Reduce a display name or email local-part to a comparable key.
///
/// Rules, in order: case-fold, strip punctuation and collapse
/// whitespace, reorder "Last, First [Middle]" to "first last" (middle
/// names dropped from the key), split bare local-parts like
/// "jerry.liu42" on separators and digits. Total and idempotent:
/// unrecognized shapes degrade to their normalized token sequence.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if let Some((last_part, first_part)) = lowered.split_once(',') {
        let last = word_tokens(last_part);
        let mut first = word_tokens(first_part);
        if !last.is_empty() && !first.is_empty() {
            let mut key = vec![first.remove(0)];
            key.extend(last);
            return key.join(" ");
        }
    }
    word_tokens(&lowered).join(" ")
}

fn word_tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or("")
}

/// Resolve a sender to at most one expected fellow.
///
/// Priority chain, first hit wins:
/// 1. the sender address is a known email of an expected fellow,
/// 2. the normalized display name equals a configured alias of an
///    expected fellow (alias-table declaration order breaks ties),
/// 3. the normalized display name equals an expected fellow's name,
/// 4. the normalized email local-part equals an expected fellow's name.
pub fn match_sender(
    display_name: &str,
    email: &str,
    expected_fellows: &[String],
    aliases: &AliasTable,
) -> MatchResult {
    if let Some(fellow) = aliases.fellow_for_email(email) {
        if expected_fellows.iter().any(|f| f == fellow) {
            return MatchResult::Matched(fellow.to_string());
        }
    }

    let name_key = normalize_name(display_name);
    if !name_key.is_empty() {
        for entry in aliases.entries() {
            if !expected_fellows.iter().any(|f| *f == entry.name) {
                continue;
            }
            if entry.aliases.iter().any(|a| normalize_name(a) == name_key) {
                return MatchResult::Matched(entry.name.clone());
            }
        }
        for fellow in expected_fellows {
            if normalize_name(fellow) == name_key {
                return MatchResult::Matched(fellow.clone());
            }
        }
    }

    let local_key = normalize_name(local_part(email));
    if !local_key.is_empty() {
        for fellow in expected_fellows {
            if normalize_name(fellow) == local_key {
                return MatchResult::Matched(fellow.clone());
            }
        }
    }

    MatchResult::NoMatch
}
