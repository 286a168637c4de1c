//! Matching properties: normalization, ordering, relevance, latency.

use std::time::Instant;

use contextmatch_core::embedding::{Embedding, l2_normalize};
use contextmatch_core::{
    AnalyzeRequest, AnalyzeStatus, CategoryRecord, ContentBundle, FlatIndex, FusionLayer,
    Modality, ModalityEncoders, Pipeline, PipelineConfig, category_document,
};

use contextmatch_e2e_tests::harness;

#[tokio::test]
async fn fused_embeddings_are_unit_normalized() {
    let encoders = ModalityEncoders::with_defaults();
    let fusion = FusionLayer::default();

    let bundles = [
        harness::ev_article(),
        harness::credit_article(),
        harness::image_only_bundle(),
    ];

    for bundle in &bundles {
        let encoded = encoders.encode(bundle).await.expect("encode");
        let fused = fusion.fuse(&encoded.text, &encoded.image).expect("fuse");
        assert!(
            fused.embedding.is_normalized(),
            "norm was {} for {}",
            fused.embedding.norm(),
            bundle.source
        );
    }
}

#[tokio::test]
async fn ev_article_matches_ev_category_with_keyword_explanation() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(3),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    assert_eq!(response.matches[0].category_id, "auto-ev");
    assert!(
        response.matches[0]
            .explanation
            .iter()
            .any(|k| ["electric", "battery", "charging"].contains(&k.as_str())),
        "explanation was {:?}",
        response.matches[0].explanation
    );
}

#[tokio::test]
async fn ev_tax_credit_headline_ranks_ev_above_taxes() {
    // A headline touching two verticals surfaces both, with the dominant
    // topic ranked higher.
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: ContentBundle::from_text(
                "https://example.com/news/ev-tax-credits",
                "electric vehicle tax credits announced by automaker",
            ),
            top_k: Some(5),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    let ids: Vec<&str> = response
        .matches
        .iter()
        .map(|m| m.category_id.as_str())
        .collect();
    let ev_rank = ids.iter().position(|id| *id == "auto-ev");
    let tax_rank = ids.iter().position(|id| *id == "fin-taxes");
    assert!(ev_rank.is_some(), "auto-ev missing from top 5: {ids:?}");
    assert!(tax_rank.is_some(), "fin-taxes missing from top 5: {ids:?}");
    assert!(ev_rank < tax_rank, "expected auto-ev above fin-taxes: {ids:?}");
}

#[tokio::test]
async fn credit_article_matches_credit_category() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::credit_article(),
            top_k: Some(3),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.matches[0].category_id, "fin-credit");
}

#[tokio::test]
async fn repeated_analysis_is_deterministic() {
    // Two fresh pipelines, same taxonomy, same input: identical ranking.
    let a = harness::loaded_pipeline();
    let b = harness::loaded_pipeline();

    let request = AnalyzeRequest {
        bundle: harness::ev_article(),
        top_k: Some(5),
        min_confidence: 0.0,
    };

    let ra = a.analyze(request.clone()).await;
    let rb = b.analyze(request).await;
    assert_eq!(ra.matches, rb.matches);
}

#[tokio::test]
async fn category_document_round_trips_to_itself() {
    let pipeline = harness::loaded_pipeline();
    let target = harness::taxonomy_entries()
        .into_iter()
        .find(|e| e.id == "travel-cruise")
        .expect("fixture entry");

    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: ContentBundle::from_text("round-trip", category_document(&target)),
            top_k: Some(1),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.matches[0].category_id, "travel-cruise");
    assert!(
        response.matches[0].similarity > 0.99,
        "similarity was {}",
        response.matches[0].similarity
    );
}

#[tokio::test]
async fn image_only_content_uses_image_modality() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::image_only_bundle(),
            top_k: Some(3),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    assert_eq!(response.used_modalities, vec![Modality::Image]);
}

#[tokio::test]
async fn empty_content_yields_zero_matches() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest::new(ContentBundle::from_text("empty", "")))
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    assert!(response.matches.is_empty());
    assert!(response.used_modalities.is_empty());
}

#[tokio::test]
async fn query_before_taxonomy_load_reports_not_ready() {
    let pipeline = Pipeline::in_memory(PipelineConfig::default());
    let response = pipeline
        .analyze(AnalyzeRequest::new(harness::ev_article()))
        .await;
    assert_eq!(response.status, AnalyzeStatus::IndexNotReady);
}

#[tokio::test]
async fn not_ready_answer_clears_once_taxonomy_loads() {
    let pipeline = Pipeline::in_memory(PipelineConfig::default());
    let request = AnalyzeRequest {
        bundle: harness::ev_article(),
        top_k: Some(3),
        min_confidence: 0.0,
    };

    let before = pipeline.analyze(request.clone()).await;
    assert_eq!(before.status, AnalyzeStatus::IndexNotReady);

    pipeline
        .load_entries(harness::taxonomy_entries())
        .expect("taxonomy load");

    let after = pipeline.analyze(request).await;
    assert_eq!(after.status, AnalyzeStatus::Success);
    assert!(!after.cached);
    assert_eq!(after.matches[0].category_id, "auto-ev");
}

#[test]
fn flat_scan_p95_under_ten_ms_at_300_categories() {
    const DIMS: usize = 512;
    const CATEGORIES: usize = 300;
    const SEARCHES: usize = 1000;

    let index = FlatIndex::new(DIMS);
    let records: Vec<CategoryRecord> = (0..CATEGORIES)
        .map(|i| {
            let mut v: Vec<f32> = (0..DIMS).map(|j| ((i * DIMS + j) as f32).sin()).collect();
            l2_normalize(&mut v);
            CategoryRecord {
                id: format!("cat-{i:04}"),
                name: format!("Category {i}"),
                description: String::new(),
                source: "bench".to_string(),
                embedding: Embedding::new(v),
                keywords: vec![],
                parent_id: None,
                level: 0,
            }
        })
        .collect();
    index.bulk_load(records).expect("bulk load");

    let mut query: Vec<f32> = (0..DIMS).map(|j| (j as f32).cos()).collect();
    l2_normalize(&mut query);

    let mut latencies_ms: Vec<f64> = Vec::with_capacity(SEARCHES);
    for _ in 0..SEARCHES {
        let start = Instant::now();
        let results = index.search(&query, 5).expect("search");
        latencies_ms.push(start.elapsed().as_secs_f64() * 1000.0);
        assert_eq!(results.len(), 5);
    }

    latencies_ms.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
    let p95 = latencies_ms[(SEARCHES * 95) / 100 - 1];
    assert!(p95 < 10.0, "p95 search latency was {p95:.3} ms");
}

#[tokio::test]
async fn unmatchable_threshold_is_empty_success_not_error() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(5),
            min_confidence: 0.99,
        })
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    assert!(response.matches.is_empty());
}

#[tokio::test]
async fn min_confidence_filters_weak_matches() {
    let pipeline = harness::loaded_pipeline();
    let loose = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(6),
            min_confidence: 0.0,
        })
        .await;
    let strict = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(6),
            min_confidence: loose.matches[0].confidence,
        })
        .await;

    assert!(strict.matches.len() <= loose.matches.len());
    assert!(
        strict
            .matches
            .iter()
            .all(|m| m.confidence >= loose.matches[0].confidence)
    );
}
