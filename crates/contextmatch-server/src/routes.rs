//! HTTP Routes
//!
//! Thin handlers over the pipeline. `POST /analyze` always answers 200
//! with a structured status envelope; HTTP error codes are reserved for
//! transport-level problems (malformed JSON and the like).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use contextmatch_core::telemetry::OperationSummary;
use contextmatch_core::{AnalyzeRequest, AnalyzeResponse, IndexStats, Pipeline};

/// Build the application router
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze/batch", post(analyze_batch))
        .route("/health", get(health))
        .route("/categories", get(categories))
        .route("/performance", get(performance))
        .with_state(pipeline)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    ready: bool,
    categories: usize,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    requests: Vec<AnalyzeRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    results: Vec<AnalyzeResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoriesResponse {
    stats: IndexStats,
    sources: Vec<String>,
}

async fn analyze(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<AnalyzeRequest>,
) -> Json<AnalyzeResponse> {
    Json(pipeline.analyze(request).await)
}

async fn analyze_batch(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResponse> {
    Json(BatchResponse {
        results: pipeline.analyze_batch(request.requests).await,
    })
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    let categories = pipeline.index().len();
    Json(HealthResponse {
        status: "ok",
        ready: categories > 0,
        categories,
        version: contextmatch_core::VERSION,
    })
}

async fn categories(State(pipeline): State<Arc<Pipeline>>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        stats: pipeline.index().stats(),
        sources: pipeline.index().sources(),
    })
}

async fn performance(State(pipeline): State<Arc<Pipeline>>) -> Json<Vec<OperationSummary>> {
    Json(pipeline.telemetry().summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextmatch_core::{
        AnalyzeStatus, ContentBundle, PipelineConfig, TaxonomyEntry,
    };

    fn pipeline_with_categories() -> Arc<Pipeline> {
        let pipeline = Pipeline::in_memory(PipelineConfig::default());
        pipeline
            .load_entries(vec![TaxonomyEntry {
                id: "auto-ev".into(),
                name: "Electric Vehicles".into(),
                description: "Battery electric cars and charging".into(),
                source: "iab".into(),
                keywords: vec!["electric".into(), "battery".into()],
                parent_id: None,
                level: 1,
            }])
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_health_reports_ready() {
        let pipeline = pipeline_with_categories();
        let Json(body) = health(State(pipeline)).await;
        assert!(body.ready);
        assert_eq!(body.categories, 1);
    }

    #[tokio::test]
    async fn test_health_not_ready_without_taxonomy() {
        let pipeline = Pipeline::in_memory(PipelineConfig::default());
        let Json(body) = health(State(pipeline)).await;
        assert!(!body.ready);
    }

    #[tokio::test]
    async fn test_analyze_envelope() {
        let pipeline = pipeline_with_categories();
        let request = AnalyzeRequest::new(ContentBundle::from_text(
            "https://example.com/ev",
            "electric battery charging news",
        ));

        let Json(body) = analyze(State(pipeline), Json(request)).await;
        assert_eq!(body.status, AnalyzeStatus::Success);
        assert!(!body.matches.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_batch_envelope() {
        let pipeline = pipeline_with_categories();
        let request = BatchRequest {
            requests: vec![
                AnalyzeRequest::new(ContentBundle::from_text(
                    "https://example.com/a",
                    "electric battery charging news",
                )),
                AnalyzeRequest::new(ContentBundle::from_text("https://example.com/b", "")),
            ],
        };

        let Json(body) = analyze_batch(State(pipeline), Json(request)).await;
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.results[0].source, "https://example.com/a");
        assert_eq!(body.results[0].status, AnalyzeStatus::Success);
        assert!(body.results[1].matches.is_empty());
    }

    #[tokio::test]
    async fn test_categories_endpoint() {
        let pipeline = pipeline_with_categories();
        let Json(body) = categories(State(pipeline)).await;
        assert_eq!(body.stats.total_records, 1);
        assert_eq!(body.sources, vec!["iab".to_string()]);
    }
}
