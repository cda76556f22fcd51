use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Duration, Utc};
use polars::prelude::*;
use taxiflow_core::error::PipelineError;
use taxiflow_core::tasks::{run_cached_task, run_task, TaskCache, TaskOptions};

fn sample_frame() -> DataFrame {
    DataFrame::new(vec![
        Series::new("passenger_count".into(), vec![Some(1i64), None, Some(3)]).into(),
        Series::new("store_and_fwd_flag".into(), vec![Some("N"), Some("Y"), None]).into(),
    ])
    .unwrap()
}

#[tokio::test]
async fn task_retries_until_it_succeeds() {
    let attempts = AtomicU32::new(0);
    let options = TaskOptions::new("flaky").with_retries(3);

    let value = run_task(&options, || async {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            Err(PipelineError::Validation(format!("attempt {attempt} failed")))
        } else {
            Ok(attempt)
        }
    })
    .await
    .expect("third attempt succeeds");

    assert_eq!(value, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn task_gives_up_after_configured_retries() {
    let attempts = AtomicU32::new(0);
    let options = TaskOptions::new("broken").with_retries(2);

    let result: Result<(), PipelineError> = run_task(&options, || async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::Validation("always".into()))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn task_without_retries_runs_once() {
    let attempts = AtomicU32::new(0);
    let options = TaskOptions::new("once");

    let result: Result<(), PipelineError> = run_task(&options, || async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::Validation("nope".into()))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_task_skips_second_run_with_same_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TaskCache::new(dir.path());
    let options = TaskOptions::new("fetch").with_cache_expiration(Duration::days(1));
    let runs = AtomicU32::new(0);
    let inputs = ("https://example.test/yellow.csv.gz", vec!["tpep_pickup_datetime"]);

    let first: DataFrame = run_cached_task(&options, &cache, &inputs, || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, PipelineError>(sample_frame())
    })
    .await
    .unwrap();
    let second: DataFrame = run_cached_task(&options, &cache, &inputs, || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, PipelineError>(sample_frame())
    })
    .await
    .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(first.equals_missing(&second));
}

#[tokio::test]
async fn different_inputs_miss_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TaskCache::new(dir.path());
    let options = TaskOptions::new("fetch").with_cache_expiration(Duration::days(1));
    let runs = AtomicU32::new(0);

    for month in [1, 2] {
        let _: DataFrame = run_cached_task(&options, &cache, &("yellow", 2021, month), || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PipelineError>(sample_frame())
        })
        .await
        .unwrap();
    }

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_entries_are_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TaskCache::new(dir.path());
    let inputs = ("yellow", 2021, 1);
    let key = TaskCache::key("fetch", &inputs).unwrap();
    cache
        .store(&key, "fetch", &sample_frame(), Utc::now() - Duration::days(2))
        .unwrap();

    let stale: Option<DataFrame> = cache.lookup(&key, Duration::days(1), Utc::now()).unwrap();
    assert!(stale.is_none());
    let fresh: Option<DataFrame> = cache.lookup(&key, Duration::days(3), Utc::now()).unwrap();
    assert!(fresh.is_some());

    let options = TaskOptions::new("fetch").with_cache_expiration(Duration::days(1));
    let runs = AtomicU32::new(0);
    let _: DataFrame = run_cached_task(&options, &cache, &inputs, || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, PipelineError>(sample_frame())
    })
    .await
    .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn cache_key_depends_on_task_name_and_inputs() {
    let a = TaskCache::key("fetch", &("u", 1)).unwrap();
    let b = TaskCache::key("fetch", &("u", 1)).unwrap();
    let c = TaskCache::key("extract", &("u", 1)).unwrap();
    let d = TaskCache::key("fetch", &("u", 2)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
    assert_eq!(a.len(), 64);
}

#[tokio::test(flavor = "current_thread")]
async fn cached_result_is_on_disk_for_a_fresh_cache_handle() {
    let dir = tempfile::tempdir().unwrap();
    let options = TaskOptions::new("fetch").with_cache_expiration(Duration::days(1));
    let inputs = ("yellow", 2021, 3);

    let computed: DataFrame = run_cached_task(&options, &TaskCache::new(dir.path()), &inputs, || async {
        Ok::<_, PipelineError>(sample_frame())
    })
    .await
    .unwrap();

    let key = TaskCache::key("fetch", &inputs).unwrap();
    let reopened: Option<DataFrame> = TaskCache::new(dir.path())
        .lookup(&key, Duration::days(1), Utc::now())
        .unwrap();
    assert!(reopened.unwrap().equals_missing(&computed));

    std::fs::write(dir.path().join(format!("{key}.bin")), b"not parquet").unwrap();
    let runs = AtomicU32::new(0);
    let _: DataFrame = run_cached_task(&options, &TaskCache::new(dir.path()), &inputs, || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, PipelineError>(sample_frame())
    })
    .await
    .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
