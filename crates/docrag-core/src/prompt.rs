//! Prompt assembly under a character budget.
//!
//! A [`PromptTemplate`] names four sections (system instructions, context,
//! history, query) and gives each a [`SectionBudget`]. [`PromptAssembler`]
//! renders them into a [`GenerationRequest`] whose total length never
//! exceeds the caller's budget:
//!
//! 1. `Required` sections are reserved first; if they alone exceed the
//!    budget, assembly fails with [`RagError::InvalidRequest`].
//! 2. `Capped(n)` sections get at most `n` characters of what remains.
//! 3. `Fill` sections share the rest, context before history.
//!
//! Context chunks are packed in rank order and a chunk that does not fit is
//! skipped, never truncated. History is taken most-recent-first and rendered
//! oldest-first. The output is a pure function of the inputs.

use serde::{Deserialize, Serialize};

use crate::citation::{marker, Citation};
use crate::error::RagError;
use crate::models::{HistoryTurn, RetrievalResult};

const SECTION_SEP: &str = "\n\n";
const CONTEXT_HEADER: &str = "Context:\n";
const HISTORY_HEADER: &str = "Conversation so far:\n";

pub const DEFAULT_SYSTEM: &str = "You are a documentation assistant. Answer the question using only \
the numbered context passages. Cite every passage you rely on with its marker, for example [^1]. \
If the context does not contain the answer, say that the information is not in the documentation.";

pub const DEFAULT_NO_CONTEXT: &str =
    "(No relevant documentation was found. Say that you cannot answer from the documentation.)";

/// How much of the overall budget a section may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionBudget {
    /// Always included in full; assembly fails if it cannot be.
    Required,
    /// Takes whatever the other sections leave.
    Fill,
    /// At most this many characters.
    Capped(usize),
}

/// Structure and budget policy of the rendered prompt.
///
/// System and query are single texts: `Capped(n)` truncates them to `n`
/// characters, `Required` and `Fill` include them whole. Context and
/// history are lists: `Required` means every item must fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default = "default_system")]
    pub system: String,
    #[serde(default = "default_no_context")]
    pub no_context_notice: String,
    #[serde(default = "default_required")]
    pub system_budget: SectionBudget,
    #[serde(default = "default_fill")]
    pub context_budget: SectionBudget,
    #[serde(default = "default_history_budget")]
    pub history_budget: SectionBudget,
    #[serde(default = "default_required")]
    pub query_budget: SectionBudget,
}

fn default_system() -> String {
    DEFAULT_SYSTEM.to_string()
}

fn default_no_context() -> String {
    DEFAULT_NO_CONTEXT.to_string()
}

fn default_required() -> SectionBudget {
    SectionBudget::Required
}

fn default_fill() -> SectionBudget {
    SectionBudget::Fill
}

fn default_history_budget() -> SectionBudget {
    SectionBudget::Capped(2000)
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system: default_system(),
            no_context_notice: default_no_context(),
            system_budget: default_required(),
            context_budget: default_fill(),
            history_budget: default_history_budget(),
            query_budget: default_required(),
        }
    }
}

/// A fully rendered request, ready for a [`crate::llm::LanguageModel`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    /// Retrieval results actually placed in the context, in marker order.
    pub included: Vec<RetrievalResult>,
    pub citations: Vec<Citation>,
    /// History turns that made it into the prompt, oldest first.
    pub history: Vec<HistoryTurn>,
}

impl GenerationRequest {
    /// Rendered length in characters (system + user).
    pub fn prompt_chars(&self) -> usize {
        chars(&self.system) + chars(&self.user)
    }
}

fn chars(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn render_chunk(n: usize, result: &RetrievalResult) -> String {
    let meta = &result.chunk.metadata;
    let heading = meta.heading_display();
    let location = if heading.is_empty() {
        meta.source_id.clone()
    } else {
        format!("{} > {}", meta.source_id, heading)
    };
    format!("{} ({})\n{}", marker(n), location, result.chunk.text)
}

fn render_turn(turn: &HistoryTurn) -> String {
    format!("{}: {}", turn.role.as_str(), turn.text)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListSection {
    Context,
    History,
}

pub struct PromptAssembler {
    template: PromptTemplate,
}

impl PromptAssembler {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Render `query`, `results` and `history` into at most `budget` characters.
    pub fn assemble(
        &self,
        query: &str,
        results: &[RetrievalResult],
        history: &[HistoryTurn],
        budget: usize,
    ) -> Result<GenerationRequest, RagError> {
        let t = &self.template;

        let system = match t.system_budget {
            SectionBudget::Capped(n) => truncate_chars(&t.system, n),
            _ => t.system.clone(),
        };
        let query_line = format!("Question: {}", query.trim());
        let query_text = match t.query_budget {
            SectionBudget::Capped(n) => truncate_chars(&query_line, n),
            _ => query_line,
        };

        // Context scaffolding is always rendered; reserve room for the notice
        // whether or not it ends up shown.
        let required = chars(&system)
            + chars(&query_text)
            + chars(SECTION_SEP)
            + chars(CONTEXT_HEADER)
            + chars(&t.no_context_notice);
        if required > budget {
            return Err(RagError::InvalidRequest(format!(
                "prompt budget of {} characters cannot hold the required sections ({} characters)",
                budget, required
            )));
        }
        let mut remaining = budget - required;

        let mut order = vec![
            (ListSection::Context, t.context_budget),
            (ListSection::History, t.history_budget),
        ];
        order.sort_by_key(|(_, policy)| match policy {
            SectionBudget::Required => 0,
            SectionBudget::Capped(_) => 1,
            SectionBudget::Fill => 2,
        });

        let mut context: Vec<(String, &RetrievalResult)> = Vec::new();
        let mut turns: Vec<&HistoryTurn> = Vec::new();

        for (section, policy) in order {
            let allowance = match policy {
                SectionBudget::Required | SectionBudget::Fill => remaining,
                SectionBudget::Capped(n) => n.min(remaining),
            };
            let used = match section {
                ListSection::Context => {
                    let (picked, used) = pack_context(results, allowance);
                    if policy == SectionBudget::Required && picked.len() < results.len() {
                        return Err(RagError::InvalidRequest(format!(
                            "context requires {} chunks but only {} fit the budget",
                            results.len(),
                            picked.len()
                        )));
                    }
                    context = picked;
                    used
                }
                ListSection::History => {
                    let (picked, used) = pack_history(history, allowance);
                    if policy == SectionBudget::Required && picked.len() < history.len() {
                        return Err(RagError::InvalidRequest(format!(
                            "history requires {} turns but only {} fit the budget",
                            history.len(),
                            picked.len()
                        )));
                    }
                    turns = picked;
                    used
                }
            };
            remaining -= used;
        }

        let context_block = if context.is_empty() {
            format!("{}{}", CONTEXT_HEADER, t.no_context_notice)
        } else {
            let entries: Vec<&str> = context.iter().map(|(s, _)| s.as_str()).collect();
            format!("{}{}", CONTEXT_HEADER, entries.join("\n"))
        };

        let mut blocks = vec![context_block];
        if !turns.is_empty() {
            let lines: Vec<String> = turns.iter().map(|t| render_turn(t)).collect();
            blocks.push(format!("{}{}", HISTORY_HEADER, lines.join("\n")));
        }
        blocks.push(query_text);
        let user = blocks.join(SECTION_SEP);

        let citations = context
            .iter()
            .enumerate()
            .map(|(i, (_, r))| Citation {
                marker: i + 1,
                source_id: r.chunk.metadata.source_id.clone(),
                chunk_id: r.chunk.id.clone(),
            })
            .collect();

        let request = GenerationRequest {
            system,
            user,
            included: context.into_iter().map(|(_, r)| r.clone()).collect(),
            citations,
            history: turns.into_iter().cloned().collect(),
        };
        debug_assert!(request.prompt_chars() <= budget);
        Ok(request)
    }
}

/// Pack chunks in rank order, skipping those that do not fit. Markers are
/// numbered by inclusion order.
fn pack_context(results: &[RetrievalResult], allowance: usize) -> (Vec<(String, &RetrievalResult)>, usize) {
    let mut picked = Vec::new();
    let mut used = 0;
    for result in results {
        let rendered = render_chunk(picked.len() + 1, result);
        let cost = chars(&rendered) + 1;
        if used + cost <= allowance {
            used += cost;
            picked.push((rendered, result));
        }
    }
    (picked, used)
}

/// Take turns newest-first until one does not fit; return them oldest-first.
fn pack_history(history: &[HistoryTurn], allowance: usize) -> (Vec<&HistoryTurn>, usize) {
    let overhead = chars(SECTION_SEP) + chars(HISTORY_HEADER);
    let mut picked = Vec::new();
    let mut used = 0;
    for turn in history.iter().rev() {
        let mut cost = chars(&render_turn(turn)) + 1;
        if picked.is_empty() {
            cost += overhead;
        }
        if used + cost > allowance {
            break;
        }
        used += cost;
        picked.push(turn);
    }
    picked.reverse();
    (picked, used)
}
