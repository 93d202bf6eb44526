//! Cross-source conflict detection
//!
//! Team inquiries get roster extraction and pairwise set comparison;
//! freshness gaps decide between "outdated" and "contradictory". A source
//! with no roster at all is a low-severity missing-info signal.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use wiki_agent_core::{Conflict, ConflictKind, ConflictSeverity, IntentType};

use crate::AnalyzedSource;

/// Query markers for the team-inquiry heuristic
const TEAM_MARKERS: &[&str] = &["team", "members", "lead", "who is", "contact", "on-call"];

/// A source older than this relative to a fresher one is "outdated"
const OUTDATED_GAP_DAYS: i64 = 90;
/// Sources updated within this window of each other disagree "live"
const CONTEMPORARY_WINDOW_DAYS: i64 = 30;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
// Title-case pairs like "Jane Doe"; middle initials tolerated
static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?: [A-Z]\.)? [A-Z][a-z]+)\b").unwrap()
});

/// Extracted member list from one source
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub names: BTreeSet<String>,
    pub emails: BTreeSet<String>,
}

impl Roster {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.emails.is_empty()
    }

    /// Combined member set for comparison
    fn members(&self) -> BTreeSet<String> {
        self.names
            .iter()
            .cloned()
            .chain(self.emails.iter().cloned())
            .collect()
    }
}

/// Whether a query reads like a team inquiry
pub fn is_team_inquiry(query: &str, intent_type: IntentType) -> bool {
    if intent_type == IntentType::TeamInquiry {
        return true;
    }
    let lower = query.to_lowercase();
    TEAM_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pull candidate members (names, emails) out of a source text
pub fn extract_roster(text: &str) -> Roster {
    let mut roster = Roster::default();
    for m in EMAIL_RE.find_iter(text) {
        roster.emails.insert(m.as_str().to_lowercase());
    }
    for caps in NAME_RE.captures_iter(text) {
        if let Some(name) = caps.get(1) {
            roster.names.insert(name.as_str().to_string());
        }
    }
    roster
}

/// Detects conflicts across the retrieved sources
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        query: &str,
        intent_type: IntentType,
        sources: &[AnalyzedSource],
        _now: DateTime<Utc>,
    ) -> Vec<Conflict> {
        if sources.len() < 2 || !is_team_inquiry(query, intent_type) {
            return Vec::new();
        }

        let rosters: Vec<(usize, Roster)> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (i, extract_roster(&s.text)))
            .collect();

        let mut conflicts = Vec::new();
        for i in 0..rosters.len() {
            for j in (i + 1)..rosters.len() {
                if let Some(conflict) = self.compare_pair(
                    query,
                    (&sources[rosters[i].0], &rosters[i].1),
                    (&sources[rosters[j].0], &rosters[j].1),
                ) {
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }

    fn compare_pair(
        &self,
        query: &str,
        (source_a, roster_a): (&AnalyzedSource, &Roster),
        (source_b, roster_b): (&AnalyzedSource, &Roster),
    ) -> Option<Conflict> {
        // Only one side has a roster at all
        if roster_a.is_empty() != roster_b.is_empty() {
            let (with, without) = if roster_a.is_empty() {
                (source_b, source_a)
            } else {
                (source_a, source_b)
            };
            return Some(Conflict {
                topic: topic_for(query),
                sources: vec![with.url.clone(), without.url.clone()],
                kind: ConflictKind::MissingInfo,
                severity: ConflictSeverity::Low,
                suggestion: format!(
                    "only \"{}\" lists members; treat \"{}\" as incomplete on this topic",
                    with.title, without.title
                ),
            });
        }
        if roster_a.is_empty() || roster_b.is_empty() {
            return None;
        }

        let members_a = roster_a.members();
        let members_b = roster_b.members();
        if members_a == members_b {
            return None;
        }

        // Order the pair fresher-first
        let (fresh, fresh_members, stale, stale_members) =
            if source_a.last_modified >= source_b.last_modified {
                (source_a, &members_a, source_b, &members_b)
            } else {
                (source_b, &members_b, source_a, &members_a)
            };
        let age_gap = fresh.last_modified - stale.last_modified;

        let fresh_only: Vec<&String> = fresh_members.difference(stale_members).collect();

        if !fresh_only.is_empty() && age_gap >= Duration::days(OUTDATED_GAP_DAYS) {
            return Some(Conflict {
                topic: topic_for(query),
                sources: vec![fresh.url.clone(), stale.url.clone()],
                kind: ConflictKind::Outdated,
                severity: ConflictSeverity::Med,
                suggestion: format!(
                    "\"{}\" is {} days older and omits {}; prefer \"{}\"",
                    stale.title,
                    age_gap.num_days(),
                    fresh_only
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    fresh.title
                ),
            });
        }

        if age_gap <= Duration::days(CONTEMPORARY_WINDOW_DAYS) {
            return Some(Conflict {
                topic: topic_for(query),
                sources: vec![fresh.url.clone(), stale.url.clone()],
                kind: ConflictKind::Contradictory,
                severity: ConflictSeverity::High,
                suggestion: format!(
                    "\"{}\" and \"{}\" were updated within {} days of each other yet list \
                     different members; verify with the team",
                    fresh.title,
                    stale.title,
                    age_gap.num_days().max(1)
                ),
            });
        }

        None
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_for(query: &str) -> String {
    format!("membership: {}", query.trim())
}
