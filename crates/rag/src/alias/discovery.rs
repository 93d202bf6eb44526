//! Automatic alias discovery
//!
//! Runs over the full document set on every ingest round and on a
//! schedule. Each detector emits `(term_a, term_b, kind, confidence)`
//! candidates; observed pairs are persisted through the alias repository,
//! which reinforces edges seen before.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use wiki_agent_core::text::{content_words, is_acronym, is_stop_word_phrase, normalize_term, token_len};
use wiki_agent_core::{AliasEdge, AliasKind, Document, IntentPlan};
use wiki_agent_persistence::SqliteStore;

use crate::RagError;

/// Repeated body references needed for a header-content edge
const HEADER_CONTENT_MIN_MENTIONS: usize = 3;
/// Windows a term must appear in before it enters PMI counting
const PMI_MIN_WINDOW_COUNT: usize = 2;
/// Normalized-PMI threshold for a co-occurrence edge
const PMI_THRESHOLD: f32 = 0.5;

static PARENTHETICAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][A-Za-z0-9 /&'-]{1,60})\s*\(([^()]{2,60})\)").unwrap());
static DASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([A-Za-z][A-Za-z0-9 /&'-]{1,60})\s+[—–-]\s+([A-Za-z][A-Za-z0-9 '-]{1,40})\s*$")
        .unwrap()
});
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9._-]+)@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static TEAM_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Za-z][A-Za-z0-9-]*(?: [A-Za-z][A-Za-z0-9-]*)?) team\b").unwrap());
static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").unwrap());
static ACRONYM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,6}\b").unwrap());

/// One detector emission, before canonicalization
#[derive(Debug, Clone)]
pub struct DiscoveredEdge {
    pub term_a: String,
    pub term_b: String,
    pub kind: AliasKind,
    pub confidence: f32,
    pub document_id: Option<String>,
}

impl DiscoveredEdge {
    fn new(a: &str, b: &str, kind: AliasKind, confidence: f32, document_id: Option<&str>) -> Self {
        Self {
            term_a: a.to_string(),
            term_b: b.to_string(),
            kind,
            confidence,
            document_id: document_id.map(|d| d.to_string()),
        }
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryReport {
    pub documents_scanned: usize,
    pub candidates: usize,
    pub pairs_observed: usize,
}

/// Scans documents for alias relationships
pub struct AliasDiscovery {
    reinforcement_step: f32,
}

impl AliasDiscovery {
    pub fn new() -> Self {
        Self {
            reinforcement_step: wiki_agent_config::constants::alias::REINFORCEMENT_STEP,
        }
    }

    /// Full pass: detect candidates across `documents` and persist them.
    /// Re-running over an unchanged corpus yields the same edge set, with
    /// `last_seen` refreshed and confidence reinforced.
    pub async fn run(
        &self,
        store: &SqliteStore,
        documents: &[Document],
    ) -> Result<DiscoveryReport, RagError> {
        let mut report = DiscoveryReport {
            documents_scanned: documents.len(),
            ..Default::default()
        };

        let acronyms = known_acronyms(documents);
        let mut candidates: Vec<DiscoveredEdge> = Vec::new();
        for doc in documents {
            candidates.extend(detect_parenthetical(doc, &acronyms));
            candidates.extend(detect_dash(doc, &acronyms));
            candidates.extend(detect_header_content(doc, &acronyms));
            candidates.extend(detect_email_team(doc, &acronyms));
        }
        candidates.extend(detect_cooccurrence(documents, &acronyms));
        report.candidates = candidates.len();

        // One observation per canonical pair per pass: merge duplicates,
        // keeping the highest-confidence emission.
        let mut merged: HashMap<(String, String), DiscoveredEdge> = HashMap::new();
        for candidate in candidates {
            let key = wiki_agent_core::alias::canonical_pair(&candidate.term_a, &candidate.term_b);
            merged
                .entry(key)
                .and_modify(|existing| {
                    if candidate.confidence > existing.confidence {
                        existing.kind = candidate.kind;
                        existing.confidence = candidate.confidence;
                    }
                    if existing.document_id.is_none() {
                        existing.document_id = candidate.document_id.clone();
                    }
                })
                .or_insert(candidate);
        }

        let now = Utc::now();
        // Deterministic persistence order
        let mut pairs: Vec<_> = merged.into_values().collect();
        pairs.sort_by(|a, b| (&a.term_a, &a.term_b).cmp(&(&b.term_a, &b.term_b)));

        for candidate in pairs {
            let mut edge = AliasEdge::new(
                &candidate.term_a,
                &candidate.term_b,
                candidate.kind,
                candidate.confidence,
                now,
            );
            if let Some(doc) = candidate.document_id {
                edge.provenance_docs.push(doc);
            }
            store
                .observe_alias_edge(&edge, self.reinforcement_step, now)
                .await?;
            report.pairs_observed += 1;
        }

        tracing::info!(
            documents = report.documents_scanned,
            candidates = report.candidates,
            pairs = report.pairs_observed,
            "Alias discovery pass complete"
        );
        Ok(report)
    }

    /// Record a conversational edge extracted by the intent analyzer
    pub async fn observe_conversational(
        &self,
        store: &SqliteStore,
        term_a: &str,
        term_b: &str,
    ) -> Result<bool, RagError> {
        let (Some(a), Some(b)) = (
            valid_endpoint(term_a, &HashSet::new()),
            valid_endpoint(term_b, &HashSet::new()),
        ) else {
            return Ok(false);
        };
        if a == b {
            return Ok(false);
        }
        let now = Utc::now();
        let edge = AliasEdge::new(&a, &b, AliasKind::Conversational, AliasKind::Conversational.base_confidence(), now);
        store
            .observe_alias_edge(&edge, self.reinforcement_step, now)
            .await?;
        Ok(true)
    }

    /// Candidate conversational pairs from an intent plan: the analyzer's
    /// search focus phrases tied to the entities it resolved them to.
    pub fn conversational_pairs(plan: &IntentPlan) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let entities: Vec<&String> = plan
            .mentioned_entities
            .teams
            .iter()
            .chain(plan.mentioned_entities.tools.iter())
            .collect();
        for entity in entities {
            for focus in &plan.search_focus {
                let entity_n = normalize_term(entity);
                let focus_n = normalize_term(focus);
                if entity_n != focus_n && !entity_n.is_empty() && !focus_n.is_empty() {
                    pairs.push((entity_n, focus_n));
                }
            }
        }
        pairs
    }
}

impl Default for AliasDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Uppercase tokens observed anywhere in the corpus count as acronyms
fn known_acronyms(documents: &[Document]) -> HashSet<String> {
    let mut acronyms = HashSet::new();
    for doc in documents {
        for m in ACRONYM_RE.find_iter(&doc.text) {
            acronyms.insert(m.as_str().to_lowercase());
        }
    }
    acronyms
}

/// Normalize an endpoint (lowercase, collapse whitespace, strip stop
/// words) and validate it: at least two tokens, or a known acronym.
fn valid_endpoint(raw: &str, acronyms: &HashSet<String>) -> Option<String> {
    let words = content_words(raw);
    if words.is_empty() {
        return None;
    }
    let normalized = words.join(" ");
    if words.len() >= 2 {
        return Some(normalized);
    }
    if is_acronym(&normalized) && (acronyms.contains(&normalized) || acronyms.is_empty()) {
        return Some(normalized);
    }
    None
}

fn emit_pair(
    a: &str,
    b: &str,
    kind: AliasKind,
    confidence: f32,
    doc: &Document,
    acronyms: &HashSet<String>,
) -> Option<DiscoveredEdge> {
    let a = valid_endpoint(a, acronyms)?;
    let b = valid_endpoint(b, acronyms)?;
    if a == b {
        return None;
    }
    Some(DiscoveredEdge::new(&a, &b, kind, confidence, Some(&doc.id)))
}

/// `X (Y)` within a sentence
fn detect_parenthetical(doc: &Document, acronyms: &HashSet<String>) -> Vec<DiscoveredEdge> {
    let mut edges = Vec::new();
    for caps in PARENTHETICAL_RE.captures_iter(&doc.text) {
        // The left side can swallow the sentence head; keep its tail
        let left = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let right = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let left_tail = trailing_phrase(left, 4);
        if let Some(edge) = emit_pair(
            &left_tail,
            right,
            AliasKind::Parenthetical,
            AliasKind::Parenthetical.base_confidence(),
            doc,
            acronyms,
        ) {
            edges.push(edge);
        }
    }
    edges
}

/// `X — Y` or `X - Y` on its own line with a short right side
fn detect_dash(doc: &Document, acronyms: &HashSet<String>) -> Vec<DiscoveredEdge> {
    let mut edges = Vec::new();
    for caps in DASH_RE.captures_iter(&doc.text) {
        let left = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let right = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if token_len(right) > 4 {
            continue;
        }
        if let Some(edge) = emit_pair(
            left,
            right,
            AliasKind::Dash,
            AliasKind::Dash.base_confidence(),
            doc,
            acronyms,
        ) {
            edges.push(edge);
        }
    }
    edges
}

/// A heading term whose section body repeatedly references another term
fn detect_header_content(doc: &Document, acronyms: &HashSet<String>) -> Vec<DiscoveredEdge> {
    let mut edges = Vec::new();

    let headings: Vec<(usize, String)> = HEADING_RE
        .captures_iter(&doc.text)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            Some((m.start(), m.as_str().trim().to_string()))
        })
        .collect();

    for (i, (start, heading)) in headings.iter().enumerate() {
        let section_end = headings
            .get(i + 1)
            .map(|(next_start, _)| *next_start)
            .unwrap_or(doc.text.len());
        let body = &doc.text[*start..section_end];

        // Count repeated capitalized terms and acronyms in the body
        let mut mentions: HashMap<String, usize> = HashMap::new();
        for m in ACRONYM_RE.find_iter(body) {
            *mentions.entry(m.as_str().to_lowercase()).or_default() += 1;
        }
        let heading_normalized = normalize_term(heading);
        for (term, count) in mentions {
            if count < HEADER_CONTENT_MIN_MENTIONS || heading_normalized.contains(&term) {
                continue;
            }
            if let Some(edge) = emit_pair(
                heading,
                &term,
                AliasKind::HeaderContent,
                AliasKind::HeaderContent.base_confidence(),
                doc,
                acronyms,
            ) {
                edges.push(edge);
            }
        }
    }
    edges
}

/// A `team@...` address co-mentioned with a team name
fn detect_email_team(doc: &Document, acronyms: &HashSet<String>) -> Vec<DiscoveredEdge> {
    let mut edges = Vec::new();
    // Sentence split on ". " so addresses keep their dots
    for sentence in doc.text.lines().flat_map(|line| line.split(". ")) {
        let Some(email) = EMAIL_RE.captures(sentence) else {
            continue;
        };
        let local = email.get(1).map(|m| m.as_str()).unwrap_or("");
        for team in TEAM_NAME_RE.captures_iter(sentence) {
            let name = team.get(1).map(|m| m.as_str()).unwrap_or("");
            let team_phrase = format!("{} team", name);
            if let Some(edge) = emit_pair(
                local,
                &team_phrase,
                AliasKind::EmailTeam,
                AliasKind::EmailTeam.base_confidence(),
                doc,
                acronyms,
            ) {
                edges.push(edge);
            }
        }
    }
    edges
}

/// High-PMI bigram/acronym pairs across paragraph windows
fn detect_cooccurrence(documents: &[Document], acronyms: &HashSet<String>) -> Vec<DiscoveredEdge> {
    // Term universe: acronyms plus adjacent content-word bigrams, the only
    // shapes that pass endpoint validation.
    let mut window_count = 0usize;
    let mut term_windows: HashMap<String, usize> = HashMap::new();
    let mut pair_windows: HashMap<(String, String), usize> = HashMap::new();

    for doc in documents {
        for window in doc.text.split("\n\n") {
            let terms = window_terms(window, acronyms);
            if terms.is_empty() {
                continue;
            }
            window_count += 1;
            let terms: Vec<&String> = terms.iter().collect();
            for term in &terms {
                *term_windows.entry((*term).clone()).or_default() += 1;
            }
            for i in 0..terms.len() {
                for j in (i + 1)..terms.len() {
                    let pair = wiki_agent_core::alias::canonical_pair(terms[i], terms[j]);
                    *pair_windows.entry(pair).or_default() += 1;
                }
            }
        }
    }

    if window_count == 0 {
        return Vec::new();
    }

    let n = window_count as f32;
    let mut edges = Vec::new();
    for ((a, b), joint) in pair_windows {
        if joint < PMI_MIN_WINDOW_COUNT {
            continue;
        }
        let (ca, cb) = match (term_windows.get(&a), term_windows.get(&b)) {
            (Some(ca), Some(cb)) if *ca >= PMI_MIN_WINDOW_COUNT && *cb >= PMI_MIN_WINDOW_COUNT => {
                (*ca as f32, *cb as f32)
            }
            _ => continue,
        };
        let p_joint = joint as f32 / n;
        let pmi = (p_joint / ((ca / n) * (cb / n))).ln();
        // Normalized PMI lands in [-1, 1]; 1 means perfect co-occurrence
        let npmi = if p_joint < 1.0 {
            pmi / -(p_joint.ln())
        } else {
            1.0
        };
        if npmi < PMI_THRESHOLD {
            continue;
        }
        let confidence =
            AliasKind::Cooccurrence.base_confidence() + 0.1 * npmi.clamp(0.0, 1.0);
        edges.push(DiscoveredEdge::new(
            &a,
            &b,
            AliasKind::Cooccurrence,
            confidence,
            None,
        ));
    }
    edges
}

/// Valid terms appearing in one co-occurrence window
fn window_terms(window: &str, acronyms: &HashSet<String>) -> HashSet<String> {
    let mut terms = HashSet::new();
    for m in ACRONYM_RE.find_iter(window) {
        let lower = m.as_str().to_lowercase();
        if acronyms.contains(&lower) {
            terms.insert(lower);
        }
    }
    let words = wiki_agent_core::text::content_words(window);
    for pair in words.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        if !is_stop_word_phrase(&bigram) {
            terms.insert(bigram);
        }
    }
    terms
}

/// Last `max_tokens` words of a phrase
fn trailing_phrase(raw: &str, max_tokens: usize) -> String {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let start = words.len().saturating_sub(max_tokens);
    words[start..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiki_agent_core::SourceKind;

    fn document(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_url: format!("https://wiki.example.com/{}", id),
            source_kind: SourceKind::Wiki,
            title: id.to_string(),
            text: text.to_string(),
            last_modified: Utc::now(),
            content_hash: Document::hash_content(text),
            tags: vec![],
        }
    }

    #[test]
    fn parenthetical_detects_acronym_alias() {
        let doc = document("d1", "The Site Reliability Engineering (SRE) group owns paging.");
        let acronyms = known_acronyms(std::slice::from_ref(&doc));
        let edges = detect_parenthetical(&doc, &acronyms);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, AliasKind::Parenthetical);
        assert_eq!(edges[0].confidence, 0.70);
        assert!(edges[0].term_a.contains("reliability engineering"));
        assert_eq!(edges[0].term_b, "sre");
    }

    #[test]
    fn parenthetical_rejects_stop_word_sides() {
        let doc = document("d1", "It was there (the one) all along.");
        let edges = detect_parenthetical(&doc, &HashSet::new());
        assert!(edges.is_empty());
    }

    #[test]
    fn dash_detects_short_right_side() {
        let doc = document("d1", "Payment Gateway - PG\n\nMore text follows here.");
        let acronyms = known_acronyms(std::slice::from_ref(&doc));
        let edges = detect_dash(&doc, &acronyms);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 0.55);
        assert_eq!(edges[0].term_b, "pg");
    }

    #[test]
    fn dash_skips_long_right_side() {
        let doc = document(
            "d1",
            "Release notes - the quarterly summary of every change we shipped lately",
        );
        let edges = detect_dash(&doc, &known_acronyms(std::slice::from_ref(&doc)));
        assert!(edges.is_empty());
    }

    #[test]
    fn header_content_links_heading_to_repeated_term() {
        let doc = document(
            "d1",
            "# Payment Gateway\n\nThe PG cluster handles checkout. PG deploys run nightly. \
             Alerts for PG go to the payments channel.",
        );
        let acronyms = known_acronyms(std::slice::from_ref(&doc));
        let edges = detect_header_content(&doc, &acronyms);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, AliasKind::HeaderContent);
        assert_eq!(edges[0].term_b, "pg");
        assert_eq!(edges[0].term_a, "payment gateway");
    }

    #[test]
    fn email_team_pairs_address_with_name() {
        let doc = document(
            "d1",
            "Contact stallions@example.com to reach the SRE team for escalations.",
        );
        let acronyms = known_acronyms(std::slice::from_ref(&doc));
        let edges = detect_email_team(&doc, &acronyms);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, AliasKind::EmailTeam);
        assert_eq!(edges[0].confidence, 0.65);
        assert!(edges[0].term_a == "stallions" || edges[0].term_b == "stallions");
        assert!(edges[0].term_a == "sre team" || edges[0].term_b == "sre team");
    }

    #[test]
    fn cooccurrence_requires_repeated_windows() {
        let text = "The ingest worker feeds the search cluster nightly.\n\n\
                    The ingest worker rebuilds the search cluster weekly.";
        let doc = document("d1", text);
        let edges = detect_cooccurrence(std::slice::from_ref(&doc), &HashSet::new());
        assert!(edges.iter().any(|e| {
            (e.term_a == "ingest worker" && e.term_b == "search cluster")
                || (e.term_b == "ingest worker" && e.term_a == "search cluster")
        }));
        for edge in &edges {
            assert!(edge.confidence >= 0.35 && edge.confidence <= 0.45 + 1e-6);
        }
    }

    #[tokio::test]
    async fn discovery_is_idempotent_up_to_reinforcement() {
        let store = wiki_agent_persistence::SqliteStore::connect_in_memory()
            .await
            .unwrap();
        let docs = vec![document(
            "d1",
            "The Site Reliability Engineering (SRE) group, also called Stallions Crew, owns paging.",
        )];
        let discovery = AliasDiscovery::new();

        let first = discovery.run(&store, &docs).await.unwrap();
        let edges_after_first = store.list_alias_edges(true).await.unwrap();

        let second = discovery.run(&store, &docs).await.unwrap();
        let edges_after_second = store.list_alias_edges(true).await.unwrap();

        assert_eq!(first.pairs_observed, second.pairs_observed);
        assert_eq!(edges_after_first.len(), edges_after_second.len());
        // Same pairs, reinforced
        for (a, b) in edges_after_first.iter().zip(&edges_after_second) {
            assert_eq!((&a.term_a, &a.term_b), (&b.term_a, &b.term_b));
            assert!(b.reinforcements > a.reinforcements);
            assert!(b.confidence >= a.confidence);
        }
    }

    #[test]
    fn conversational_pairs_come_from_plan_entities() {
        let mut plan = IntentPlan::default_on_failure();
        plan.mentioned_entities.teams = vec!["Stallions".into()];
        plan.search_focus = vec!["sre on-call".into()];
        let pairs = AliasDiscovery::conversational_pairs(&plan);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "stallions");
    }
}
