//! Final answer prompts: persona, context, recent history and the question.

use crate::prompts::{self, PromptLibrary};
use crate::types::{Chunk, Language, Turn};

/// Text the router sees when a session has no turns yet.
pub const EMPTY_ROUTER_HISTORY: &str = "No history yet.";

/// Builds answer prompts from a [`PromptLibrary`].
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    library: PromptLibrary,
    history_turns: usize,
}

impl PromptAssembler {
    /// Assembler including at most `history_turns` recent turns.
    pub fn new(library: PromptLibrary, history_turns: usize) -> Self {
        Self {
            library,
            history_turns,
        }
    }

    /// Prompt for a knowledge-base answer citing numbered chunks.
    pub fn general_answer<'a, I>(
        &self,
        language: Language,
        question: &str,
        chunks: I,
        history: &[Turn],
    ) -> String
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let context = numbered_context(chunks);
        self.assemble(prompts::persona(language), language, &context, question, history)
    }

    /// Prompt for an answer grounded in uploaded document text.
    pub fn document_answer(
        &self,
        language: Language,
        question: &str,
        document_text: &str,
        history: &[Turn],
    ) -> String {
        self.assemble(
            prompts::document_persona(language),
            language,
            document_text,
            question,
            history,
        )
    }

    /// Prompt for an answer grounded in ranked chunks of an uploaded document.
    pub fn chunk_answer<'a, I>(
        &self,
        language: Language,
        question: &str,
        chunks: I,
        history: &[Turn],
    ) -> String
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let context = numbered_context(chunks);
        self.assemble(
            prompts::document_persona(language),
            language,
            &context,
            question,
            history,
        )
    }

    /// Recent history for the router, or [`EMPTY_ROUTER_HISTORY`].
    pub fn router_history(&self, history: &[Turn]) -> String {
        let lines = self.recent_lines(history);
        if lines.is_empty() {
            EMPTY_ROUTER_HISTORY.to_string()
        } else {
            lines
        }
    }

    /// `Chat History:` block with the last turns, oldest first; empty when there are none.
    pub fn history_block(&self, history: &[Turn]) -> String {
        let lines = self.recent_lines(history);
        if lines.is_empty() {
            String::new()
        } else {
            format!("Chat History:\n{lines}\n\n")
        }
    }

    fn recent_lines(&self, history: &[Turn]) -> String {
        let start = history.len().saturating_sub(self.history_turns);
        history[start..]
            .iter()
            .map(|turn| format!("User: {}\nAssistant: {}", turn.question, turn.response))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn assemble(
        &self,
        persona: &str,
        language: Language,
        context: &str,
        question: &str,
        history: &[Turn],
    ) -> String {
        let chat_history = self.history_block(history);
        match self
            .library
            .render_answer(language, persona, context, &chat_history, question)
        {
            Ok(prompt) => prompt,
            Err(error) => {
                tracing::warn!(%error, "Answer template failed; using plain prompt");
                plain_prompt(context, question)
            }
        }
    }
}

/// Minimal prompt used when the answer template cannot be rendered.
pub fn plain_prompt(context: &str, question: &str) -> String {
    format!("Context: {context}\nQuestion: {question}\nAnswer:")
}

/// `[i] original_content\nSource: name, page p` blocks separated by blank lines.
pub fn numbered_context<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a Chunk>,
{
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            format!(
                "[{}] {}\nSource: {}, page {}",
                index + 1,
                chunk.original_content,
                chunk.document_name,
                chunk.page
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
