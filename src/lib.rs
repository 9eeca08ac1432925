#![deny(missing_docs)]

//! Core library for docent, a conversational retrieval orchestrator.

/// HTTP routing and REST handlers.
pub mod api;
/// Answer prompt assembly.
pub mod assembler;
/// Service construction from configuration.
pub mod bootstrap;
/// Layout-aware chunking and question enrichment.
pub mod chunking;
/// Language, intent, mode and translation classifiers.
pub mod classify;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF and DOCX text extraction.
pub mod extract;
/// Knowledge-base ingestion.
pub mod ingest;
/// Layout parser client and block flattening.
pub mod layout;
/// Text generation client.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Map-reduce over long documents.
pub mod map_reduce;
/// Pipeline metrics helpers.
pub mod metrics;
/// Per-turn orchestration.
pub mod orchestrator;
/// Prompt text and answer templates.
pub mod prompts;
/// Timeouts and retries for external calls.
pub mod resilience;
/// Similarity ranking.
pub mod retrieval;
/// In-memory session state.
pub mod session;
/// Shared domain types.
pub mod types;
/// Vector store backends.
pub mod vector_store;
