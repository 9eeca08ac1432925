use std::sync::Arc;

use super::{Classification, normalize};
use crate::llm::LlmClient;
use crate::prompts;
use crate::types::Language;

/// Decides whether a document request is "translate this document".
#[derive(Clone)]
pub struct TranslationIntentDetector {
    llm: Arc<dyn LlmClient>,
}

impl TranslationIntentDetector {
    /// Detector backed by `llm`.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// `true` only for an affirmative answer; failures count as `false`.
    pub async fn detect(&self, message: &str) -> Classification<bool> {
        if message.trim().is_empty() {
            return Classification::decided(false);
        }
        match self.llm.generate(&prompts::translation_intent(message)).await {
            Ok(raw) => {
                let answer = normalize(&raw);
                let first = answer
                    .split(|c: char| !c.is_alphanumeric())
                    .find(|word| !word.is_empty())
                    .unwrap_or_default();
                let affirmative = matches!(first, "YES" | "SI");
                Classification::parsed(affirmative, raw)
            }
            Err(error) => {
                tracing::warn!(%error, "Translation intent check failed; assuming no");
                Classification::defaulted(false, None)
            }
        }
    }
}

/// Target language named in a translation request, else `detected`.
pub fn translation_target(message: &str, detected: Language) -> Language {
    let lowered = message.to_lowercase();
    if lowered.contains("english") || lowered.contains("inglés") || lowered.contains("ingles") {
        Language::English
    } else if lowered.contains("spanish") || lowered.contains("español") || lowered.contains("espanol") {
        Language::Spanish
    } else {
        detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct Reply(Option<&'static str>);

    #[async_trait]
    impl LlmClient for Reply {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| LlmError::GenerationFailed("500".into()))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    async fn detect(reply: Option<&'static str>) -> Classification<bool> {
        TranslationIntentDetector::new(Arc::new(Reply(reply)))
            .detect("Translate this document to Spanish")
            .await
    }

    #[tokio::test]
    async fn affirmative_answers() {
        assert!(detect(Some("YES")).await.category);
        assert!(detect(Some("Sí.")).await.category);
        assert!(detect(Some("yes, it is")).await.category);
    }

    #[tokio::test]
    async fn negative_and_failed_answers() {
        assert!(!detect(Some("NO")).await.category);
        assert!(!detect(Some("Not a translation; YES is wrong")).await.category);
        let failed = detect(None).await;
        assert!(!failed.category);
        assert!(!failed.valid);
    }

    #[test]
    fn target_comes_from_request_or_detection() {
        assert_eq!(
            translation_target("Traduce el documento al inglés", Language::Spanish),
            Language::English
        );
        assert_eq!(
            translation_target("Translate this into Spanish", Language::English),
            Language::Spanish
        );
        assert_eq!(translation_target("Translate it", Language::Spanish), Language::Spanish);
    }
}
