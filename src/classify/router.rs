use std::sync::Arc;

use super::Classification;
use crate::llm::LlmClient;
use crate::prompts;
use crate::types::Mode;

/// Mode used when the router's answer cannot be trusted.
pub const ROUTER_FALLBACK_MODE: Mode = Mode::DocumentQa;

const DOCUMENT_TOKEN: &str = "DOCUMENT_HANDLER";
const GENERAL_TOKEN: &str = "GENERAL_KNOWLEDGE_BASE";

/// Chooses between the uploaded document and the knowledge base.
#[derive(Clone)]
pub struct ModeRouter {
    llm: Arc<dyn LlmClient>,
}

impl ModeRouter {
    /// Router backed by `llm`.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Route `query`. Without a document in the session the answer is always
    /// [`Mode::GeneralQa`] and the model is not called.
    pub async fn route(
        &self,
        query: &str,
        history: &str,
        document_in_session: bool,
    ) -> Classification<Mode> {
        if !document_in_session {
            return Classification::decided(Mode::GeneralQa);
        }
        let raw = match self.llm.generate(&prompts::router(history, query)).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(%error, fallback = ?ROUTER_FALLBACK_MODE, "Routing call failed");
                return Classification::defaulted(ROUTER_FALLBACK_MODE, None);
            }
        };
        match parse_route(&raw) {
            Some(mode) => Classification::parsed(mode, raw),
            None => {
                tracing::warn!(response = %raw, fallback = ?ROUTER_FALLBACK_MODE, "Unparseable route");
                Classification::defaulted(ROUTER_FALLBACK_MODE, Some(raw))
            }
        }
    }
}

/// Exactly one routing token after keeping only `A-Z` and `_`.
pub fn parse_route(raw: &str) -> Option<Mode> {
    let cleaned: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || *c == '_')
        .collect();
    match (cleaned.contains(DOCUMENT_TOKEN), cleaned.contains(GENERAL_TOKEN)) {
        (true, false) => Some(Mode::DocumentQa),
        (false, true) => Some(Mode::GeneralQa),
        _ => None,
    }
}
