use std::sync::Arc;

use super::Classification;
use crate::llm::LlmClient;
use crate::prompts;
use crate::types::Language;

/// English/Spanish detection.
#[derive(Clone)]
pub struct LanguageDetector {
    llm: Arc<dyn LlmClient>,
}

impl LanguageDetector {
    /// Detector backed by `llm`.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Detect the language of `text`. Never fails; English is the default.
    pub async fn detect(&self, text: &str) -> Classification<Language> {
        if text.trim().is_empty() {
            return Classification::decided(Language::English);
        }
        match self.llm.generate(&prompts::language_detection(text)).await {
            Ok(raw) => {
                let language = if raw.to_lowercase().contains("spanish") {
                    Language::Spanish
                } else {
                    Language::English
                };
                Classification::parsed(language, raw)
            }
            Err(error) => {
                tracing::warn!(%error, "Language detection failed; defaulting to English");
                Classification::defaulted(Language::English, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        reply: Result<&'static str, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .map_err(|_| LlmError::GenerationFailed("boom".into()))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn detector(reply: Result<&'static str, ()>) -> (LanguageDetector, Arc<Fixed>) {
        let llm = Arc::new(Fixed {
            reply,
            calls: AtomicUsize::new(0),
        });
        (LanguageDetector::new(llm.clone()), llm)
    }

    #[tokio::test]
    async fn empty_text_skips_the_model() {
        let (detector, llm) = detector(Ok("spanish"));
        let result = detector.detect("   ").await;
        assert_eq!(result.category, Language::English);
        assert!(result.valid);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn spanish_anywhere_in_reply_wins() {
        let (detector, _) = detector(Ok("The language is Spanish."));
        let result = detector.detect("¿Cuándo debo presentar?").await;
        assert_eq!(result.category, Language::Spanish);
        assert_eq!(result.raw_response.as_deref(), Some("The language is Spanish."));
    }

    #[tokio::test]
    async fn anything_else_is_english() {
        let (detector, _) = detector(Ok("french"));
        assert_eq!(detector.detect("Bonjour").await.category, Language::English);
    }

    #[tokio::test]
    async fn failures_default_to_english() {
        let (detector, _) = detector(Err(()));
        let result = detector.detect("Hola").await;
        assert_eq!(result.category, Language::English);
        assert!(!result.valid);
    }
}
