//! Prompt assembly and the source relevance policy.

use kbase_resolve::Passage;

use crate::types::PromptMessage;

/// Prior turns carried into the prompt.
pub const HISTORY_TURNS: usize = 10;

/// Scores below this are weak matches.
pub const RELEVANCE_FLOOR: f64 = 0.15;
/// A lone weak match is still cited when it beats this.
pub const WEAK_MATCH_FLOOR: f64 = 0.01;

const NO_ANSWER: &str = "Sorry, nothing relevant was found in the knowledge base.";

const SYSTEM_PROMPT: &str = "You are an enterprise knowledge-base assistant. Answer the user's \
question from the retrieved context below. If the context holds no relevant information or does \
not contain the answer, reply exactly: \"Sorry, nothing relevant was found in the knowledge base.\" \
Never invent facts. Keep answers professional and concise, in the language of the question.";

/// Passages worth citing, best first.
///
/// When even the best passage scores below [`RELEVANCE_FLOOR`], only that
/// one is kept, and only if it scores above [`WEAK_MATCH_FLOOR`]. Otherwise
/// every passage at or above the floor is kept.
pub fn select_sources(passages: &[Passage]) -> Vec<Passage> {
    let mut ranked: Vec<&Passage> = passages.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    match ranked.first() {
        None => Vec::new(),
        Some(best) if best.score < RELEVANCE_FLOOR => {
            if best.score > WEAK_MATCH_FLOOR {
                vec![(*best).clone()]
            } else {
                Vec::new()
            }
        }
        Some(_) => ranked
            .into_iter()
            .filter(|p| p.score >= RELEVANCE_FLOOR)
            .cloned()
            .collect(),
    }
}

/// System prompt with numbered context, then history, then the question.
pub fn build_messages(
    history: Vec<PromptMessage>,
    sources: &[Passage],
    question: &str,
) -> Vec<PromptMessage> {
    let mut system = String::from(SYSTEM_PROMPT);
    system.push_str("\n\nContext:\n");
    if sources.is_empty() {
        system.push_str("(no matching documents)\n");
        system.push_str(&format!("With no context, answer: \"{}\"\n", NO_ANSWER));
    }
    for (i, p) in sources.iter().enumerate() {
        let page = p
            .locator
            .page
            .map(|n| format!(", page {}", n))
            .unwrap_or_default();
        system.push_str(&format!("[{}] {}{}\n{}\n\n", i + 1, p.filename, page, p.snippet.trim()));
    }

    let skip = history.len().saturating_sub(HISTORY_TURNS);
    let mut messages = Vec::with_capacity(HISTORY_TURNS + 2);
    messages.push(PromptMessage::system(system));
    messages.extend(history.into_iter().skip(skip));
    messages.push(PromptMessage::user(question));
    messages
}
