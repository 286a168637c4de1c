//! Complete pipeline journeys: snapshot load, multimodal analysis,
//! degradation, caching, persistence.

use contextmatch_core::{
    AnalyzeRequest, AnalyzeStatus, Pipeline, PipelineConfig, RawImage,
};

use contextmatch_e2e_tests::harness;

#[tokio::test]
async fn snapshot_load_then_multimodal_analysis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let taxonomy = harness::write_taxonomy_file(&dir);

    let pipeline = Pipeline::in_memory(PipelineConfig::default());
    let loaded = pipeline
        .load_taxonomy_snapshot(&taxonomy)
        .expect("snapshot load");
    assert_eq!(loaded, harness::taxonomy_entries().len());

    let mut bundle = harness::ev_article();
    bundle.images.push(RawImage {
        bytes: harness::png_bytes(30, 120, 200),
        source_url: Some("https://example.com/hero.png".to_string()),
    });

    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle,
            top_k: Some(3),
            min_confidence: 0.0,
        })
        .await;

    assert_eq!(response.status, AnalyzeStatus::Success);
    assert_eq!(response.used_modalities.len(), 2);
    assert_eq!(response.matches[0].category_id, "auto-ev");
    assert!(!response.fingerprint.is_empty());
    assert!(response.performance.total_ms > 0.0);
    assert!(response.performance.search_ms >= 0.0);
}

#[tokio::test]
async fn undecodable_image_degrades_without_dropping_matches() {
    let pipeline = harness::loaded_pipeline();

    let mut bundle = harness::ev_article();
    bundle.images.push(RawImage {
        bytes: b"this is not an image".to_vec(),
        source_url: Some("https://example.com/broken.gif".to_string()),
    });
    bundle.images.push(RawImage {
        bytes: harness::png_bytes(10, 200, 10),
        source_url: None,
    });

    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle,
            top_k: Some(3),
            min_confidence: 0.0,
        })
        .await;

    assert!(matches!(response.status, AnalyzeStatus::Partial { .. }));
    assert_eq!(response.skipped_images, 1);
    assert_eq!(response.matches[0].category_id, "auto-ev");
}

#[tokio::test]
async fn partial_extraction_flag_degrades_status() {
    let pipeline = harness::loaded_pipeline();

    let mut bundle = harness::credit_article();
    bundle.layout.partial = true;

    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle,
            top_k: Some(2),
            min_confidence: 0.0,
        })
        .await;

    assert!(matches!(response.status, AnalyzeStatus::Partial { .. }));
    assert!(!response.matches.is_empty());
}

#[tokio::test]
async fn identical_content_served_from_cache() {
    let pipeline = harness::loaded_pipeline();
    let request = AnalyzeRequest {
        bundle: harness::credit_article(),
        top_k: Some(3),
        min_confidence: 0.0,
    };

    let first = pipeline.analyze(request.clone()).await;
    let second = pipeline.analyze(request).await;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.matches, second.matches);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(pipeline.telemetry().count("embedding"), 1);
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = Some(dir.path().to_path_buf());

    {
        let pipeline =
            Pipeline::open(data_dir.clone(), PipelineConfig::default()).expect("open");
        pipeline
            .load_entries(harness::taxonomy_entries())
            .expect("taxonomy load");
    }

    // Reopen without reloading the taxonomy.
    let pipeline = Pipeline::open(data_dir, PipelineConfig::default()).expect("reopen");
    assert_eq!(
        pipeline.index().len(),
        harness::taxonomy_entries().len()
    );

    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(1),
            min_confidence: 0.0,
        })
        .await;
    assert_eq!(response.status, AnalyzeStatus::Success);
    assert_eq!(response.matches[0].category_id, "auto-ev");
}

#[tokio::test]
async fn oversized_top_k_rejected_as_invalid_input() {
    let pipeline = harness::loaded_pipeline();
    let response = pipeline
        .analyze(AnalyzeRequest {
            bundle: harness::ev_article(),
            top_k: Some(500),
            min_confidence: 0.0,
        })
        .await;
    assert!(matches!(
        response.status,
        AnalyzeStatus::InvalidInput { .. }
    ));
    assert!(response.matches.is_empty());
}
