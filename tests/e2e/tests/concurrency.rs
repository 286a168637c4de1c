//! Concurrency behavior: in-flight dedup and reads during writes.

use std::sync::Arc;

use contextmatch_core::{AnalyzeRequest, AnalyzeResponse, AnalyzeStatus, TaxonomyEntry};
use tokio::task::JoinSet;

use contextmatch_e2e_tests::harness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_compute_once() {
    let pipeline = harness::loaded_pipeline();
    let request = AnalyzeRequest {
        bundle: harness::ev_article(),
        top_k: Some(3),
        min_confidence: 0.0,
    };

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        let request = request.clone();
        tasks.spawn(async move { pipeline.analyze(request).await });
    }

    let mut responses: Vec<AnalyzeResponse> = Vec::new();
    while let Some(result) = tasks.join_next().await {
        responses.push(result.expect("task join"));
    }

    assert_eq!(responses.len(), 8);
    for response in &responses {
        assert_eq!(response.status, AnalyzeStatus::Success);
        assert_eq!(response.matches, responses[0].matches);
    }

    // One leader computed; everyone else joined in-flight or hit the cache.
    assert_eq!(pipeline.telemetry().count("embedding"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_analysis_keeps_order_and_dedups_identical_entries() {
    let pipeline = harness::loaded_pipeline();

    let requests = vec![
        AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(3),
            min_confidence: 0.0,
        },
        AnalyzeRequest {
            bundle: harness::credit_article(),
            top_k: Some(3),
            min_confidence: 0.0,
        },
        AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(3),
            min_confidence: 0.0,
        },
    ];

    let responses = pipeline.analyze_batch(requests).await;

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].matches[0].category_id, "auto-ev");
    assert_eq!(responses[1].matches[0].category_id, "fin-credit");
    assert_eq!(responses[2].matches, responses[0].matches);

    // The duplicate entry joined in-flight work or hit the cache.
    assert_eq!(pipeline.telemetry().count("embedding"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_stay_consistent_during_inserts() {
    let pipeline = harness::loaded_pipeline();

    let mut tasks = JoinSet::new();

    for i in 0..5 {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            pipeline
                .insert_category(TaxonomyEntry {
                    id: format!("gaming-{i}"),
                    name: format!("Gaming Vertical {i}"),
                    description: "Video games, consoles and esports".to_string(),
                    source: "custom".to_string(),
                    keywords: vec!["gaming".to_string(), "esports".to_string()],
                    parent_id: None,
                    level: 1,
                })
                .expect("insert");
            true
        });
    }

    for i in 0..10 {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            let mut bundle = harness::credit_article();
            // Distinct fingerprints so every search really runs.
            bundle.text.push_str(&format!(" request {i}"));
            let response = pipeline
                .analyze(AnalyzeRequest {
                    bundle,
                    top_k: Some(3),
                    min_confidence: 0.0,
                })
                .await;
            matches!(response.status, AnalyzeStatus::Success)
                && response.matches[0].category_id == "fin-credit"
        });
    }

    while let Some(result) = tasks.join_next().await {
        assert!(result.expect("task join"));
    }

    // All inserts landed and are queryable.
    assert_eq!(
        pipeline.index().len(),
        harness::taxonomy_entries().len() + 5
    );
}
