use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Classification, normalize};
use crate::llm::LlmClient;
use crate::prompts;
use crate::types::Language;

/// How much of a document a question needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Summary, overview, rewrite: the whole document.
    Holistic,
    /// A targeted fact or definition.
    Specific,
}

/// HOLISTIC/SPECIFIC classification of document questions.
#[derive(Clone)]
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    /// Classifier backed by `llm`.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify `question`, asking in `language`. Defaults to [`Intent::Specific`].
    pub async fn classify(&self, question: &str, language: Language) -> Classification<Intent> {
        let raw = match self.llm.generate(&prompts::intent(language, question)).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(%error, "Intent classification failed; assuming SPECIFIC");
                return Classification::defaulted(Intent::Specific, None);
            }
        };
        match parse_intent(&raw) {
            Some(intent) => Classification::parsed(intent, raw),
            None => {
                tracing::warn!(response = %raw, "Unparseable intent; assuming SPECIFIC");
                Classification::defaulted(Intent::Specific, Some(raw))
            }
        }
    }
}

fn parse_intent(raw: &str) -> Option<Intent> {
    let normalized = normalize(raw);
    if normalized.contains("HOLISTIC") {
        Some(Intent::Holistic)
    } else if normalized.contains("ESPECIFICO") || normalized.contains("SPECIFIC") {
        Some(Intent::Specific)
    } else {
        None
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
                .ok_or_else(|| LlmError::ProviderUnavailable("offline".into()))
        }

        async fn is_available(&self) -> bool {
            self.0.is_some()
        }
    }

    async fn classify(reply: Option<&'static str>) -> Classification<Intent> {
        IntentClassifier::new(Arc::new(Reply(reply)))
            .classify("Summarize this document", Language::English)
            .await
    }

    #[test]
    fn holistic_is_checked_first() {
        assert_eq!(parse_intent("HOLISTIC, not SPECIFIC"), Some(Intent::Holistic));
        assert_eq!(parse_intent("**Holístico**"), Some(Intent::Holistic));
        assert_eq!(parse_intent("específico"), Some(Intent::Specific));
        assert_eq!(parse_intent("specific."), Some(Intent::Specific));
        assert_eq!(parse_intent("maybe"), None);
    }

    #[tokio::test]
    async fn parses_model_output() {
        let result = classify(Some("HOLISTIC")).await;
        assert_eq!(result.category, Intent::Holistic);
        assert!(result.valid);
    }

    #[tokio::test]
    async fn unparseable_output_defaults_to_specific() {
        let result = classify(Some("I am not sure")).await;
        assert_eq!(result.category, Intent::Specific);
        assert!(!result.valid);
        assert_eq!(result.raw_response.as_deref(), Some("I am not sure"));
    }

    #[tokio::test]
    async fn call_failure_defaults_to_specific() {
        let result = classify(None).await;
        assert_eq!(result.category, Intent::Specific);
        assert!(!result.valid);
        assert!(result.raw_response.is_none());
    }
}
