use std::fmt;
use std::sync::Arc;

use aws_types::SdkConfig;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;

use crate::config::Config;
use crate::error::Result;
use crate::iam::{self, IamConfig, IamStore, IdentityApi};
use crate::provision::{ensure_bucket, ensure_cluster};
use crate::reddit::{Post, PostSource, RedditClient};
use crate::redshift::{self, ClusterApi, RedshiftClusters, RedshiftStatements, StatementApi};
use crate::s3::{self, LoadStatus, ObjectStore, S3Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Provision,
    SecureAccess,
    Extract,
    Upload,
    Load,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Provision => "provision",
            Stage::SecureAccess => "secure-access",
            Stage::Extract => "extract",
            Stage::Upload => "upload",
            Stage::Load => "load",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct ClientHandler {
    pub s3: Arc<dyn ObjectStore>,
    pub clusters: Arc<dyn ClusterApi>,
    pub statements: Arc<dyn StatementApi>,
    pub iam: Arc<dyn IdentityApi>,
    pub reddit: Arc<dyn PostSource>,
}

impl ClientHandler {
    pub fn new(sdk: &SdkConfig, config: &Config) -> Self {
        Self {
            s3: Arc::new(S3Store::new(s3::load_client(sdk))),
            clusters: Arc::new(RedshiftClusters::new(aws_sdk_redshift::Client::new(sdk))),
            statements: Arc::new(RedshiftStatements::new(aws_sdk_redshiftdata::Client::new(
                sdk,
            ))),
            iam: Arc::new(IamStore::new(aws_sdk_iam::Client::new(sdk))),
            reddit: Arc::new(RedditClient::new(HttpClient::new(), config.reddit.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub role_arn: String,
    pub object_uri: String,
    pub posts: usize,
    /// Objects copied into the table this run, today's batch and any left over from earlier
    /// runs.
    pub loaded: Vec<String>,
}

pub async fn run(
    config: &Config,
    iam_config: &IamConfig,
    clients: &ClientHandler,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    enter(Stage::Provision);
    ensure_bucket(clients.s3.as_ref(), &config.bucket).await?;
    ensure_cluster(clients.clusters.as_ref(), &config.cluster).await?;

    enter(Stage::SecureAccess);
    let role_arn = iam::secure(clients.iam.as_ref(), iam_config).await?;

    enter(Stage::Extract);
    let posts = extract(config, clients.reddit.as_ref()).await?;

    enter(Stage::Upload);
    let key = s3::object_key(&config.bucket_prefix, now);
    s3::upload_posts(clients.s3.as_ref(), &config.bucket, &key, &posts).await?;
    let object_uri = s3::s3_uri(&config.bucket, &key);

    enter(Stage::Load);
    redshift::ensure_table(clients.statements.as_ref(), &config.cluster, &config.table).await?;
    let loaded = load_pending(config, clients, &role_arn).await?;

    enter(Stage::Done);
    Ok(RunSummary {
        role_arn,
        object_uri,
        posts: posts.len(),
        loaded,
    })
}

/// COPYs every object still tagged `not-loaded`, oldest key first, marking each `loaded` as it
/// lands. A failure stops the run and leaves the rest for the next one.
async fn load_pending(
    config: &Config,
    clients: &ClientHandler,
    role_arn: &str,
) -> Result<Vec<String>> {
    let pending = clients
        .s3
        .pending_keys(&config.bucket, &config.bucket_prefix)
        .await?;
    if pending.is_empty() {
        tracing::info!("no objects waiting to be loaded, skipping COPY");
    }

    let mut loaded = Vec::with_capacity(pending.len());
    for key in pending {
        let uri = s3::s3_uri(&config.bucket, &key);
        redshift::copy_from_s3(
            clients.statements.as_ref(),
            &config.cluster,
            &config.table,
            &uri,
            role_arn,
        )
        .await?;
        clients
            .s3
            .set_status(&config.bucket, &key, LoadStatus::Loaded)
            .await?;
        loaded.push(uri);
    }

    Ok(loaded)
}

async fn extract(config: &Config, source: &dyn PostSource) -> Result<Vec<Post>> {
    let mut posts = Vec::new();
    for subreddit in &config.subreddits {
        let batch = source
            .fetch_posts(subreddit, config.post_limit, &config.sort)
            .await?;
        posts.extend(batch);
    }

    tracing::info!(
        "extracted {} posts from {} subreddits",
        posts.len(),
        config.subreddits.len()
    );
    Ok(posts)
}

fn enter(stage: Stage) {
    tracing::info!(%stage, "entering stage");
}
