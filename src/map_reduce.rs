//! Window-by-window processing of documents too long for one prompt.
//!
//! The text is split into overlapping windows. Each window is answered (or translated) on its
//! own with bounded concurrency, and results are reassembled in window order. A window whose call
//! fails is replaced by a visible marker; only when every window fails does the run fail.

use std::sync::Arc;

use futures_util::{StreamExt, stream};

use crate::chunking::{ChunkingError, TextSplitter};
use crate::llm::{LlmClient, LlmError};
use crate::prompts;
use crate::types::Language;

const PARTIAL_SEPARATOR: &str = "\n\n---\n\n";

/// What each window is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapTask {
    /// Answer the user's request, then combine the partial answers.
    Answer {
        /// User request applied to every window.
        question: String,
    },
    /// Translate every window and concatenate.
    Translate {
        /// Output language.
        target: Language,
    },
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapReduceOutcome {
    /// Final text.
    pub response: String,
    /// Number of windows processed.
    pub windows: usize,
    /// Windows replaced by a failure marker.
    pub failed_windows: usize,
}

/// Marker standing in for a window that could not be processed.
pub fn failed_window_marker(language: Language, index: usize, total: usize) -> String {
    match language {
        Language::English => format!("[Section {index} of {total} could not be processed]"),
        Language::Spanish => format!("[No se pudo procesar la sección {index} de {total}]"),
    }
}

/// Map-reduce over document windows.
#[derive(Clone)]
pub struct MapReduceProcessor {
    llm: Arc<dyn LlmClient>,
    splitter: TextSplitter,
    concurrency: usize,
}

impl MapReduceProcessor {
    /// Processor with `window_size`-character windows sharing `overlap` characters.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        window_size: usize,
        overlap: usize,
        concurrency: usize,
    ) -> Result<Self, ChunkingError> {
        Ok(Self {
            llm,
            splitter: TextSplitter::new(window_size, overlap)?,
            concurrency: concurrency.max(1),
        })
    }

    /// Windows `text` would be split into.
    pub fn windows(&self, text: &str) -> Vec<String> {
        self.splitter.split(text)
    }

    /// Run `task` over `text`. `language` is the reply language for answers.
    pub async fn run(
        &self,
        text: &str,
        task: &MapTask,
        language: Language,
    ) -> Result<MapReduceOutcome, LlmError> {
        let windows = self.windows(text);
        let total = windows.len();
        let output_language = match task {
            MapTask::Answer { .. } => language,
            MapTask::Translate { target } => *target,
        };
        tracing::info!(windows = total, concurrency = self.concurrency, "Starting map-reduce");
        if total == 0 {
            return Ok(MapReduceOutcome {
                response: String::new(),
                windows: 0,
                failed_windows: 0,
            });
        }

        let results: Vec<Result<String, LlmError>> = stream::iter(windows.into_iter().enumerate())
            .map(|(position, window)| {
                let prompt = match task {
                    MapTask::Answer { question } => {
                        prompts::map_window(language, question, &window, position + 1, total)
                    }
                    MapTask::Translate { target } => prompts::translate_window(*target, &window),
                };
                async move { self.llm.generate(&prompt).await }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut partials = Vec::with_capacity(total);
        let mut markers = Vec::new();
        let mut last_error = None;
        for (position, result) in results.into_iter().enumerate() {
            let index = position + 1;
            match result {
                Ok(text) => partials.push(text),
                Err(error) => {
                    tracing::warn!(window = index, total, %error, "Window failed");
                    let marker = failed_window_marker(output_language, index, total);
                    partials.push(marker.clone());
                    markers.push(marker);
                    last_error = Some(error);
                }
            }
        }

        if markers.len() == total
            && let Some(error) = last_error
        {
            tracing::error!(windows = total, "Every window failed");
            return Err(error);
        }

        let response = match task {
            MapTask::Translate { .. } => partials.join("\n\n"),
            MapTask::Answer { question } => {
                let combined = self.reduce(language, question, &partials).await;
                ensure_markers(combined, &markers)
            }
        };
        Ok(MapReduceOutcome {
            response,
            windows: total,
            failed_windows: markers.len(),
        })
    }

    async fn reduce(&self, language: Language, question: &str, partials: &[String]) -> String {
        let total = partials.len();
        let labelled = partials
            .iter()
            .enumerate()
            .map(|(position, text)| format!("[Section {}/{total}]\n{text}", position + 1))
            .collect::<Vec<_>>()
            .join(PARTIAL_SEPARATOR);
        match self
            .llm
            .generate(&prompts::reduce(language, question, &labelled))
            .await
        {
            Ok(combined) => combined,
            Err(error) => {
                tracing::warn!(%error, "Combination call failed; returning partial results");
                partials.join(PARTIAL_SEPARATOR)
            }
        }
    }
}

fn ensure_markers(mut response: String, markers: &[String]) -> String {
    for marker in markers {
        if !response.contains(marker.as_str()) {
            response.push_str("\n\n");
            response.push_str(marker);
        }
    }
    response
}
