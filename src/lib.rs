//! Phone Intelligence Library
//!
//! Multi-source phone-number intelligence: a cached number formatter, a
//! deterministic pattern-analysis engine, pluggable lookup sources and an
//! aggregator that queries them concurrently and merges their answers.
//!
//! # Modules
//!
//! - `aggregator`: Concurrent dispatch, field merge, confidence and reports.
//! - `circuit_breaker`: Per-source circuit breakers for network lookups.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `history`: In-memory observation history and change detection.
//! - `models`: Core data models.
//! - `pattern_analysis`: Related numbers, bulk blocks, sequences and carrier blocks.
//! - `phone`: Number parsing, formatting and carrier tables.
//! - `sources`: The `SourceAdapter` trait and every built-in source.

pub mod aggregator;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod models;
pub mod pattern_analysis;
pub mod phone;
pub mod sources;

pub use aggregator::{get_confidence_level, AggregatorConfig, IntelligenceAggregator};
pub use history::HistoryStore;
pub use pattern_analysis::PatternAnalysisEngine;
pub use phone::NumberFormatter;
pub use sources::{SourceAdapter, SourceReport};
