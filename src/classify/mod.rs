//! Model-backed classifiers with deterministic defaults.
//!
//! Every classifier returns a [`Classification`]: the category, the raw model output when a call
//! was made, and whether that output actually parsed. A failed call or an unparseable answer
//! never surfaces as an error; the classifier's default category is used instead.

mod intent;
mod language;
mod router;
mod translation;

pub use intent::{Intent, IntentClassifier};
pub use language::LanguageDetector;
pub use router::{ModeRouter, ROUTER_FALLBACK_MODE, parse_route};
pub use translation::{TranslationIntentDetector, translation_target};

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<C> {
    /// Chosen category.
    pub category: C,
    /// Model output, when the model was asked.
    pub raw_response: Option<String>,
    /// `false` when the default was used because the call failed or the output did not parse.
    pub valid: bool,
}

impl<C> Classification<C> {
    /// Category parsed from model output.
    pub fn parsed(category: C, raw_response: String) -> Self {
        Self {
            category,
            raw_response: Some(raw_response),
            valid: true,
        }
    }

    /// Category decided without asking the model.
    pub fn decided(category: C) -> Self {
        Self {
            category,
            raw_response: None,
            valid: true,
        }
    }

    /// Default category after a failed call or unparseable output.
    pub fn defaulted(category: C, raw_response: Option<String>) -> Self {
        Self {
            category,
            raw_response,
            valid: false,
        }
    }
}

/// Upper-case and strip Spanish accents.
pub(crate) fn normalize(text: &str) -> String {
    text.trim()
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'Á' => 'A',
            'É' => 'E',
            'Í' => 'I',
            'Ó' => 'O',
            'Ú' | 'Ü' => 'U',
            other => other,
        })
        .collect()
}
