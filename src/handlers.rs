use crate::aggregator::{reputation_score, AggregatorConfig, IntelligenceAggregator};
use crate::config::Config;
use crate::errors::AppError;
use crate::history::{
    ChangeScoring, FieldChange, HistoryStore, Observation, OwnershipAnalysis, PortingEvent,
};
use crate::models::{AggregatedIntelligence, DataSource};
use crate::pattern_analysis::PatternAnalysisEngine;
use crate::phone::NumberFormatter;
use crate::sources::default_adapters;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    /// Cached parser shared with the local sources.
    pub formatter: NumberFormatter,
    pub aggregator: IntelligenceAggregator,
    pub history: Arc<HistoryStore>,
}

impl AppState {
    /// Wire the formatter, pattern engine and every enabled source.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let engine = PatternAnalysisEngine::default();
        let formatter = engine.formatter().clone();
        let adapters = default_adapters(&config, &formatter, &engine);
        let aggregator =
            IntelligenceAggregator::new(AggregatorConfig::from_config(&config)?, adapters)?;
        Ok(Self {
            config,
            formatter,
            aggregator,
            history: Arc::new(HistoryStore::new()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct InvestigateRequest {
    pub phone_number: String,
    /// ISO region for numbers without `+`; falls back to `DEFAULT_REGION`.
    pub country_code: Option<String>,
    /// Source names to query; every enabled source when absent.
    pub sources: Option<Vec<String>>,
    pub investigation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvestigateResponse {
    pub intelligence: AggregatedIntelligence,
    pub confidence_level: String,
    /// Reputation in `[0, 1]` derived from the merged fields.
    pub reputation_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    pub changes: Vec<FieldChange>,
    pub porting_events: Vec<PortingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub observations: Vec<Observation>,
    pub changes: Vec<FieldChange>,
    pub porting_events: Vec<PortingEvent>,
    pub ownership: OwnershipAnalysis,
    pub change_scoring: ChangeScoring,
}

fn region_for(state: &AppState, requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| state.config.default_region.clone())
}

fn requested_sources(names: Option<&[String]>) -> Result<Option<Vec<DataSource>>, AppError> {
    names
        .map(|names| {
            names
                .iter()
                .map(|name| name.parse::<DataSource>().map_err(AppError::BadRequest))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
}

async fn run_aggregation(
    state: &AppState,
    request: &InvestigateRequest,
) -> Result<AggregatedIntelligence, AppError> {
    if request.phone_number.trim().is_empty() {
        return Err(AppError::BadRequest("phone_number is required".to_string()));
    }
    let region = region_for(state, request.country_code.as_deref());
    let sources = requested_sources(request.sources.as_deref())?;
    Ok(state
        .aggregator
        .aggregate_intelligence(request.phone_number.trim(), &region, sources.as_deref())
        .await?)
}

/// Health check endpoint.
///
/// Returns the service status and the sources currently enabled.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "phone-intel",
            "version": env!("CARGO_PKG_VERSION"),
            "sources": state.aggregator.registered_sources(),
        })),
    )
}

/// POST /api/v1/investigate
///
/// Aggregates every requested source for one number and records the merged
/// values in the history store.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - JSON body with the number, optional region, sources and case id.
///
/// # Returns
///
/// * `Result<Json<InvestigateResponse>, AppError>` - The aggregation plus any
///   changes against earlier observations.
pub async fn investigate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvestigateRequest>,
) -> Result<Json<InvestigateResponse>, AppError> {
    tracing::info!(
        "POST /investigate - region: {:?}, sources: {:?}",
        request.country_code,
        request.sources
    );

    let intelligence = run_aggregation(&state, &request).await?;
    let region = region_for(&state, request.country_code.as_deref());

    // Unparseable numbers still get a result, just no history.
    let (observation, changes, porting_events) =
        match state.formatter.parse(request.phone_number.trim(), &region) {
            Ok(parsed) => {
                let observation = state
                    .history
                    .record_intelligence(parsed.e164(), &intelligence, request.investigation_id.clone())
                    .await;
                let changes = state.history.detect_changes(parsed.e164()).await;
                let porting = state.history.detect_porting(parsed.e164()).await;
                if !changes.is_empty() {
                    tracing::info!("Detected {} field changes since last observation", changes.len());
                }
                (Some(observation), changes, porting)
            }
            Err(e) => {
                tracing::warn!("Skipping history for unparseable number: {}", e);
                (None, Vec::new(), Vec::new())
            }
        };

    Ok(Json(InvestigateResponse {
        confidence_level: intelligence.confidence_level().to_string(),
        reputation_score: reputation_score(&intelligence.merged_data),
        intelligence,
        observation,
        changes,
        porting_events,
    }))
}

/// POST /api/v1/report
///
/// Same aggregation as `/investigate`, rendered as a plain-text report.
pub async fn report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvestigateRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("POST /report");
    let intelligence = run_aggregation(&state, &request).await?;
    let text = state.aggregator.generate_intelligence_report(&intelligence);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    ))
}

/// GET /api/v1/history/:number
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let region = region_for(&state, query.country_code.as_deref());
    let parsed = state
        .formatter
        .parse(&number, &region)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let observations = state.history.history(parsed.e164()).await;
    if observations.is_empty() {
        return Err(AppError::NotFound("No history recorded for this number".to_string()));
    }

    Ok(Json(HistoryResponse {
        observations,
        changes: state.history.detect_changes(parsed.e164()).await,
        porting_events: state.history.detect_porting(parsed.e164()).await,
        ownership: state.history.detect_ownership_changes(parsed.e164()).await,
        change_scoring: state.history.change_confidence_scoring(parsed.e164()).await,
    }))
}
