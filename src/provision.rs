use crate::error::Result;
use crate::redshift::{ClusterApi, ClusterSpec};
use crate::s3::ObjectStore;

pub async fn ensure_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    if store.bucket_exists(bucket).await? {
        tracing::info!("bucket {bucket} already exists");
        return Ok(());
    }

    store.create_bucket(bucket).await?;
    tracing::info!("created bucket {bucket}");
    Ok(())
}

pub async fn ensure_cluster(clusters: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()> {
    if clusters.cluster_exists(&spec.identifier).await? {
        tracing::info!("cluster {} already exists", spec.identifier);
        return Ok(());
    }

    clusters.create_cluster(spec).await?;
    tracing::info!(
        "created {} cluster {} ({} x {})",
        if spec.nodes > 1 { "multi-node" } else { "single-node" },
        spec.identifier,
        spec.nodes.max(1),
        spec.node_type
    );
    Ok(())
}
