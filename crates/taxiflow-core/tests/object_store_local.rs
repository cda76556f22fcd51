use taxiflow_core::blocks::BucketBlock;
use taxiflow_core::object_store::ObjectStore;

#[tokio::test]
async fn local_store_round_trips_files() {
    let scratch = tempfile::tempdir().unwrap();
    let bucket_root = scratch.path().join("bucket");
    let store = ObjectStore::from_block(&BucketBlock::Local {
        root: bucket_root.clone(),
    })
    .await
    .unwrap();

    let source = scratch.path().join("yellow_tripdata_2021-01.parquet");
    std::fs::write(&source, b"PAR1 fake parquet bytes").unwrap();

    store
        .upload_from_path(&source, "yellow/yellow_tripdata_2021-01.parquet")
        .await
        .unwrap();
    store
        .upload_from_path(&source, "green/green_tripdata_2020-01.parquet")
        .await
        .unwrap();
    assert!(bucket_root.join("yellow/yellow_tripdata_2021-01.parquet").exists());

    let listed = store.list_prefix("yellow/").await.unwrap();
    assert_eq!(listed, vec!["yellow/yellow_tripdata_2021-01.parquet".to_string()]);
    assert_eq!(store.list_prefix("").await.unwrap().len(), 2);

    let dest = scratch.path().join("data/yellow/yellow_tripdata_2021-01.parquet");
    let downloaded = store
        .download_object_to_path("yellow/yellow_tripdata_2021-01.parquet", &dest)
        .await
        .unwrap();
    assert_eq!(downloaded, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), b"PAR1 fake parquet bytes");

    store.delete("yellow/yellow_tripdata_2021-01.parquet").await.unwrap();
    assert!(store.list_prefix("yellow/").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_object_is_an_error() {
    let scratch = tempfile::tempdir().unwrap();
    let store = ObjectStore::local(scratch.path().join("bucket"));
    let result = store
        .download_object_to_path("yellow/missing.parquet", &scratch.path().join("out.parquet"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn keys_cannot_escape_the_bucket() {
    let scratch = tempfile::tempdir().unwrap();
    let store = ObjectStore::local(scratch.path().join("bucket"));
    let source = scratch.path().join("file.bin");
    std::fs::write(&source, b"x").unwrap();
    assert!(store.upload_from_path(&source, "../escape.bin").await.is_err());
    assert!(!scratch.path().join("escape.bin").exists());
}

#[tokio::test]
async fn listing_an_empty_bucket_is_empty() {
    let scratch = tempfile::tempdir().unwrap();
    let store = ObjectStore::local(scratch.path().join("never-created"));
    assert!(store.list_prefix("yellow/").await.unwrap().is_empty());
}
