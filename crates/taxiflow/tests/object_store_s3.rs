use anyhow::{Context, Result};
use taxiflow_core::blocks::BucketBlock;
use taxiflow_core::object_store::ObjectStore;
use uuid::Uuid;

const REQUIRED_VARS: &[&str] = &[
    "TAXIFLOW_TEST_S3_BUCKET",
    "TAXIFLOW_TEST_S3_ENDPOINT",
    "TAXIFLOW_TEST_S3_ACCESS_KEY_ID",
    "TAXIFLOW_TEST_S3_SECRET_ACCESS_KEY",
];

#[tokio::test]
async fn s3_object_store_upload_download_and_delete() -> Result<()> {
    let Some(block) = block_from_env() else {
        eprintln!(
            "Skipping S3 object store test; set {} to enable",
            REQUIRED_VARS.join(", ")
        );
        return Ok(());
    };

    let store = ObjectStore::from_block(&block)
        .await
        .context("failed to build S3 object store")?;
    let prefix = format!("taxiflow-test/{}/", Uuid::new_v4());
    let key = format!("{prefix}yellow_tripdata_2021-01.parquet");
    let payload = b"taxiflow integration test";

    let scratch = tempfile::tempdir()?;
    let source = scratch.path().join("upload.parquet");
    std::fs::write(&source, payload)?;

    store
        .upload_from_path(&source, &key)
        .await
        .context("upload to S3 failed")?;

    let listed = store
        .list_prefix(&prefix)
        .await
        .context("list prefix failed")?;
    assert_eq!(listed, vec![key.clone()]);

    let dest = scratch.path().join("data/yellow/download.parquet");
    store
        .download_object_to_path(&key, &dest)
        .await
        .context("download from S3 failed")?;
    assert_eq!(std::fs::read(&dest)?, payload);

    store.delete(&key).await.context("cleanup delete failed")?;
    assert!(store.list_prefix(&prefix).await?.is_empty());

    Ok(())
}

fn block_from_env() -> Option<BucketBlock> {
    for &var in REQUIRED_VARS {
        if std::env::var(var)
            .ok()
            .filter(|value| !value.is_empty())
            .is_none()
        {
            return None;
        }
    }

    Some(BucketBlock::S3 {
        bucket: std::env::var("TAXIFLOW_TEST_S3_BUCKET").ok()?,
        region: std::env::var("TAXIFLOW_TEST_S3_REGION").ok(),
        endpoint: std::env::var("TAXIFLOW_TEST_S3_ENDPOINT").ok(),
        access_key_id: std::env::var("TAXIFLOW_TEST_S3_ACCESS_KEY_ID").ok(),
        secret_access_key: std::env::var("TAXIFLOW_TEST_S3_SECRET_ACCESS_KEY").ok(),
        force_path_style: std::env::var("TAXIFLOW_TEST_S3_FORCE_PATH_STYLE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false),
    })
}
