//! System-prompt assembly for the response generator
//!
//! Sections are named, editable templates assembled in a fixed order:
//! identity, priority protocol, format, context summary, retrieved
//! chunks, quality report, and the behavioral override last. Retrieved
//! context is budgeted in tokens; the lowest-ranked chunks drop first.

use wiki_agent_core::text::estimate_tokens;
use wiki_agent_core::{
    ChatMessage, Conflict, IntentPlan, ResponseDepth, ResponseFormat, SourceItem,
};

/// Editable section templates
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub identity: String,
    pub priority_protocol: String,
    pub no_sources: String,
    pub authors_note_preamble: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            identity: "You are the company documentation assistant; you answer questions from \
                       internal documentation."
                .to_string(),
            priority_protocol: "Ground every claim in the provided context. The retrieved \
                                documentation is your primary source; the conversation summary is \
                                secondary. When sources conflict, say so explicitly and prefer \
                                the fresher, more authoritative one. Cite source titles or URLs \
                                for factual claims."
                .to_string(),
            no_sources: "No authoritative source was found for this question. Say so explicitly \
                         before offering any general guidance."
                .to_string(),
            authors_note_preamble: "Behavioral note for this conversation (must not override the \
                                    grounding rules above):"
                .to_string(),
        }
    }
}

/// One retrieved chunk as the prompt sees it
#[derive(Debug, Clone)]
pub struct ContextChunk {
    pub source: SourceItem,
    pub text: String,
}

/// Everything the builder needs for one request
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub plan: Option<IntentPlan>,
    pub context_summary: String,
    pub chunks: Vec<ContextChunk>,
    pub conflicts: Vec<Conflict>,
    pub authors_note: Option<String>,
}

/// Assembles the generator's system prompt
pub struct ResponsePromptBuilder {
    templates: PromptTemplates,
    context_token_budget: usize,
}

impl ResponsePromptBuilder {
    pub fn new(templates: PromptTemplates, context_token_budget: usize) -> Self {
        Self {
            templates,
            context_token_budget,
        }
    }

    /// Build the system message for one request
    pub fn build_system(&self, inputs: &PromptInputs) -> ChatMessage {
        let mut sections: Vec<String> = Vec::new();

        sections.push(self.templates.identity.clone());
        sections.push(self.templates.priority_protocol.clone());
        sections.push(self.format_section(inputs.plan.as_ref()));

        if !inputs.context_summary.is_empty() {
            sections.push(format!(
                "Conversation so far:\n{}",
                inputs.context_summary
            ));
        }

        if inputs.chunks.is_empty() {
            sections.push(self.templates.no_sources.clone());
        } else {
            sections.push(self.context_section(&inputs.chunks));
        }

        if !inputs.conflicts.is_empty() {
            sections.push(self.quality_section(&inputs.conflicts));
        }

        if let Some(note) = &inputs.authors_note {
            sections.push(format!("{}\n{}", self.templates.authors_note_preamble, note));
        }

        ChatMessage::system(sections.join("\n\n"))
    }

    fn format_section(&self, plan: Option<&IntentPlan>) -> String {
        let style = plan.map(|p| p.response_style).unwrap_or_default();
        let format = match style.format {
            ResponseFormat::Prose => "flowing prose",
            ResponseFormat::Steps => "numbered steps",
            ResponseFormat::List => "a bulleted list",
            ResponseFormat::Code => "code with a short explanation",
        };
        let depth = match style.depth {
            ResponseDepth::Brief => "Keep it brief.",
            ResponseDepth::Normal => "Use a normal level of detail.",
            ResponseDepth::Detailed => "Be thorough and detailed.",
        };
        format!("Answer as {}. {}", format, depth)
    }

    /// Retrieved chunks in rank order, trimmed to the token budget by
    /// dropping the lowest-ranked first.
    fn context_section(&self, chunks: &[ContextChunk]) -> String {
        let mut lines = vec!["Retrieved documentation (ranked):".to_string()];
        let mut used_tokens = 0usize;
        let mut dropped = 0usize;

        for chunk in chunks {
            let entry = format!(
                "[{}]({}) authority {:.2}, updated {}\n{}",
                chunk.source.title,
                chunk.source.url,
                chunk.source.authority,
                chunk.source.last_modified.format("%Y-%m-%d"),
                chunk.text
            );
            let entry_tokens = estimate_tokens(&entry);
            if used_tokens + entry_tokens > self.context_token_budget && used_tokens > 0 {
                dropped += 1;
                continue;
            }
            used_tokens += entry_tokens;
            lines.push(entry);
        }

        if dropped > 0 {
            tracing::debug!(dropped, used_tokens, "Context budget trimmed chunks");
        }
        lines.join("\n\n")
    }

    fn quality_section(&self, conflicts: &[Conflict]) -> String {
        let mut lines =
            vec!["Source conflicts detected; surface these to the user:".to_string()];
        for conflict in conflicts {
            lines.push(format!(
                "- {} ({:?}, {:?} severity): {}",
                conflict.topic, conflict.kind, conflict.severity, conflict.suggestion
            ));
        }
        lines.join("\n")
    }
}

impl Default for ResponsePromptBuilder {
    fn default() -> Self {
        Self::new(
            PromptTemplates::default(),
            wiki_agent_config::constants::llm::CONTEXT_TOKEN_BUDGET,
        )
    }
}
