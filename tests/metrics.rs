mod support;

use std::{collections::HashSet, time::Duration};

use metrics_util::debugging::DebuggingRecorder;
use support::{ARTICLE, FAIL_MARKER, Harness, request};
use texpress::application::cache::{ResultCache, SourceKey};

#[tokio::test]
async fn pipeline_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Inline compiles: fallback activation, one success, one failure.
    let harness = Harness::fallback();
    harness.service.submit(request(ARTICLE)).await.expect("compile");
    harness
        .service
        .submit(request(&ARTICLE.replace("Hello", FAIL_MARKER)))
        .await
        .expect_err("engine error");
    harness.service.submit(request(ARTICLE)).await.expect("cache hit");
    harness.service.health().await;

    let cache = ResultCache::new(1, Duration::from_secs(60));
    cache.set(SourceKey::from_raw(1), "/api/v1/preview/a.pdf?token=a");
    cache.set(SourceKey::from_raw(2), "/api/v1/preview/b.pdf?token=b");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "texpress_cache_hit_total",
        "texpress_cache_miss_total",
        "texpress_cache_evict_total",
        "texpress_jobs_completed_total",
        "texpress_jobs_failed_total",
        "texpress_fallback_activations_total",
        "texpress_compile_ms",
        "texpress_queue_depth",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
