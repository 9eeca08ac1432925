use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Two settings were individually valid but contradict each other.
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
    /// `init_config` ran more than once.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Ollama runtime used for generation.
    pub llm_base_url: String,
    /// Generation model identifier.
    pub llm_model: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional embedding endpoint; defaults to the LLM base URL.
    pub embedding_url: Option<String>,
    /// Backend holding the permanent knowledge base.
    pub vector_store: VectorStoreKind,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for the knowledge base.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Endpoint of the layout parsing service. Knowledge-base ingestion requires it.
    pub layout_parser_url: Option<String>,
    /// Optional bearer token for the layout parser.
    pub layout_parser_api_key: Option<String>,
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Sections shorter than this are merged or discarded.
    pub min_section_text_length: usize,
    /// Header placeholder used before the first heading.
    pub default_header_text: String,
    /// Number of chunks returned for general questions.
    pub max_chunks_retrieved: usize,
    /// Number of recent turns rendered into prompts.
    pub context_history_messages: usize,
    /// Retained turns per session.
    pub max_turns_per_session: usize,
    /// Character count above which holistic questions use map-reduce.
    pub large_document_threshold: usize,
    /// Map-reduce window length in characters.
    pub map_reduce_window_size: usize,
    /// Overlap between map-reduce windows in characters.
    pub map_reduce_window_overlap: usize,
    /// Concurrent MAP calls.
    pub map_reduce_concurrency: usize,
    /// Concurrent question-generation calls during enrichment.
    pub enrichment_concurrency: usize,
    /// Whether uploads are chunked through the layout parser when one is configured.
    pub session_document_chunking: bool,
    /// Per-call timeout for external services.
    pub external_call_timeout_secs: u64,
    /// Retries after a transport failure or timeout.
    pub external_call_retries: u32,
    /// Optional directory holding answer template overrides.
    pub prompt_template_dir: Option<PathBuf>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic byte-hash vectors, useful offline.
    Hash,
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

/// Supported knowledge-base storage backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorStoreKind {
    /// Qdrant over HTTP.
    Qdrant,
    /// In-process brute-force store, lost on restart.
    Memory,
}

impl FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_QDRANT_URL: &str = "http://127.0.0.1:6333";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let llm_base_url = get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.into());
        let config = Self {
            embedding_url: get("EMBEDDING_URL"),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "llama3".into()),
            embedding_provider: match get("EMBEDDING_PROVIDER") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))?,
                None => EmbeddingProvider::Ollama,
            },
            embedding_model: get("EMBEDDING_MODEL").unwrap_or_else(|| "nomic-embed-text".into()),
            embedding_dimension: parse_or(&get, "EMBEDDING_DIMENSION", 768)?,
            vector_store: match get("VECTOR_STORE") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("VECTOR_STORE".into()))?,
                None => VectorStoreKind::Qdrant,
            },
            qdrant_url: get("QDRANT_URL").unwrap_or_else(|| DEFAULT_QDRANT_URL.into()),
            qdrant_collection_name: get("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "documents".into()),
            qdrant_api_key: get("QDRANT_API_KEY"),
            layout_parser_url: get("LAYOUT_PARSER_URL"),
            layout_parser_api_key: get("LAYOUT_PARSER_API_KEY"),
            chunk_size: parse_or(&get, "CHUNK_SIZE", 750)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", 75)?,
            min_section_text_length: parse_or(&get, "MIN_SECTION_TEXT_LENGTH", 50)?,
            default_header_text: get("DEFAULT_HEADER_TEXT")
                .unwrap_or_else(|| "General Content".into()),
            max_chunks_retrieved: parse_or(&get, "MAX_CHUNKS_RETRIEVED", 3)?,
            context_history_messages: parse_or(&get, "CONTEXT_HISTORY_MESSAGES", 6)?,
            max_turns_per_session: parse_or(&get, "MAX_TURNS_PER_SESSION", 50)?,
            large_document_threshold: parse_or(&get, "LARGE_DOCUMENT_THRESHOLD", 12_000)?,
            map_reduce_window_size: parse_or(&get, "MAP_REDUCE_WINDOW_SIZE", 600)?,
            map_reduce_window_overlap: parse_or(&get, "MAP_REDUCE_WINDOW_OVERLAP", 60)?,
            map_reduce_concurrency: parse_or(&get, "MAP_REDUCE_CONCURRENCY", 4)?,
            enrichment_concurrency: parse_or(&get, "ENRICHMENT_CONCURRENCY", 4)?,
            session_document_chunking: parse_flag(&get, "SESSION_DOCUMENT_CHUNKING")?,
            external_call_timeout_secs: parse_or(&get, "EXTERNAL_CALL_TIMEOUT_SECS", 120)?,
            external_call_retries: parse_or(&get, "EXTERNAL_CALL_RETRIES", 1)?,
            prompt_template_dir: get("PROMPT_TEMPLATE_DIR").map(PathBuf::from),
            server_port: get("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            llm_base_url,
        };
        config.validate()?;
        Ok(config)
    }

    /// Embedding endpoint, falling back to the generation runtime.
    pub fn embedding_base_url(&self) -> &str {
        self.embedding_url.as_deref().unwrap_or(&self.llm_base_url)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Inconsistent(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".into(),
            ));
        }
        if self.map_reduce_window_size == 0
            || self.map_reduce_window_overlap >= self.map_reduce_window_size
        {
            return Err(ConfigError::Inconsistent(
                "MAP_REDUCE_WINDOW_OVERLAP must be smaller than MAP_REDUCE_WINDOW_SIZE".into(),
            ));
        }
        if self.map_reduce_concurrency == 0 {
            return Err(ConfigError::InvalidValue("MAP_REDUCE_CONCURRENCY".into()));
        }
        if self.enrichment_concurrency == 0 {
            return Err(ConfigError::InvalidValue("ENRICHMENT_CONCURRENCY".into()));
        }
        if self.external_call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("EXTERNAL_CALL_TIMEOUT_SECS".into()));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|value| value.trim().to_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        llm_url = %config.llm_base_url,
        llm_model = %config.llm_model,
        embedding_provider = ?config.embedding_provider,
        vector_store = ?config.vector_store,
        collection = %config.qdrant_collection_name,
        layout_parser = config.layout_parser_url.is_some(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(get_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.chunk_size, 750);
        assert_eq!(config.chunk_overlap, 75);
        assert_eq!(config.min_section_text_length, 50);
        assert_eq!(config.default_header_text, "General Content");
        assert_eq!(config.max_chunks_retrieved, 3);
        assert_eq!(config.context_history_messages, 6);
        assert_eq!(config.large_document_threshold, 12_000);
        assert_eq!(config.map_reduce_window_size, 600);
        assert_eq!(config.qdrant_collection_name, "documents");
        assert_eq!(config.embedding_provider, EmbeddingProvider::Ollama);
        assert_eq!(config.vector_store, VectorStoreKind::Qdrant);
        assert!(!config.session_document_chunking);
        assert_eq!(config.embedding_base_url(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("CHUNK_SIZE", "400"),
            ("CHUNK_OVERLAP", "40"),
            ("EMBEDDING_PROVIDER", "HASH"),
            ("VECTOR_STORE", "memory"),
            ("SESSION_DOCUMENT_CHUNKING", "yes"),
            ("EMBEDDING_URL", "http://embed:11434"),
            ("SERVER_PORT", "8080"),
        ]))
        .expect("config");
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.chunk_overlap, 40);
        assert_eq!(config.embedding_provider, EmbeddingProvider::Hash);
        assert_eq!(config.vector_store, VectorStoreKind::Memory);
        assert!(config.session_document_chunking);
        assert_eq!(config.embedding_base_url(), "http://embed:11434");
        assert_eq!(config.server_port, Some(8080));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("LLM_MODEL", "   ")])).expect("config");
        assert_eq!(config.llm_model, "llama3");
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let error = Config::from_lookup(lookup(&[("CHUNK_SIZE", "large")])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "CHUNK_SIZE"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let error = Config::from_lookup(lookup(&[("CHUNK_SIZE", "50"), ("CHUNK_OVERLAP", "50")]))
            .unwrap_err();
        assert!(matches!(error, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn rejects_unknown_provider() {
        let error = Config::from_lookup(lookup(&[("EMBEDDING_PROVIDER", "openai")])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
    }
}
