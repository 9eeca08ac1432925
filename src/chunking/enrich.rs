//! Question generation for chunks.

use std::sync::{Arc, LazyLock};

use futures_util::{StreamExt, stream};
use regex::Regex;

use crate::llm::LlmClient;
use crate::prompts;
use crate::types::{Chunk, Language};

const MAX_QUESTIONS: usize = 10;

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"^\d+\.\s*(.*)$") {
    Ok(regex) => regex,
    Err(err) => panic!("Numbered-line regex is invalid: {err}"),
});

const SPANISH_MARKERS: [&str; 5] = [" de ", " la ", " el ", " en ", " que "];

/// Stop-word heuristic used to pick the question-generation language without a model call.
pub fn looks_spanish(text: &str) -> bool {
    let padded = format!(" {} ", text.to_lowercase());
    SPANISH_MARKERS.iter().any(|marker| padded.contains(marker))
}

/// Pull numbered questions out of a model response, skipping `[question]` placeholders.
pub fn parse_questions(response: &str) -> Vec<String> {
    response
        .lines()
        .filter_map(|line| {
            let captures = NUMBERED_LINE.captures(line.trim())?;
            let question = captures.get(1)?.as_str().trim();
            if question.is_empty() || question.contains(']') {
                None
            } else {
                Some(question.to_string())
            }
        })
        .take(MAX_QUESTIONS)
        .collect()
}

/// Appends generated questions to chunk content.
#[derive(Clone)]
pub struct QuestionEnricher {
    llm: Arc<dyn LlmClient>,
    min_length: usize,
    concurrency: usize,
}

impl QuestionEnricher {
    /// Enricher skipping chunks shorter than `min_length` characters.
    pub fn new(llm: Arc<dyn LlmClient>, min_length: usize, concurrency: usize) -> Self {
        Self {
            llm,
            min_length,
            concurrency: concurrency.max(1),
        }
    }

    /// Enrich every chunk, preserving order. Generation failures leave a chunk unenriched.
    pub async fn enrich(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        stream::iter(chunks)
            .map(|chunk| self.enrich_one(chunk))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn enrich_one(&self, mut chunk: Chunk) -> Chunk {
        let text = chunk.original_content.trim();
        if text.chars().count() < self.min_length {
            return chunk;
        }
        let language = if looks_spanish(text) {
            Language::Spanish
        } else {
            Language::English
        };
        let prompt = prompts::question_generation(language, text);
        match self.llm.generate(&prompt).await {
            Ok(response) => {
                let questions = parse_questions(&response);
                tracing::trace!(
                    header = %chunk.header,
                    page = chunk.page,
                    questions = questions.len(),
                    "Generated chunk questions"
                );
                chunk.enrich(questions);
            }
            Err(error) => {
                tracing::warn!(
                    header = %chunk.header,
                    page = chunk.page,
                    %error,
                    "Question generation failed; chunk left unenriched"
                );
            }
        }
        chunk
    }
}
