use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_redshift::Client as RedshiftClient;
use aws_sdk_redshiftdata::{types::StatusString, Client as DataClient};

use crate::error::{EtlError, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identity and sizing of the warehouse cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub identifier: String,
    pub node_type: String,
    pub nodes: i32,
    pub database: String,
    pub master_username: String,
    pub master_password: String,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            identifier: "redshift-cluster-1".to_owned(),
            node_type: "dc2.large".to_owned(),
            nodes: 1,
            database: "dev".to_owned(),
            master_username: "awsuser".to_owned(),
            master_password: "Password123".to_owned(),
        }
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn cluster_exists(&self, identifier: &str) -> Result<bool>;
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<()>;
}

#[async_trait]
pub trait StatementApi: Send + Sync {
    /// Runs `sql` to completion. A failed statement surfaces the warehouse's own message.
    async fn execute(&self, cluster: &ClusterSpec, sql: &str) -> Result<()>;
}

pub struct RedshiftClusters {
    client: RedshiftClient,
}

impl RedshiftClusters {
    pub fn new(client: RedshiftClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for RedshiftClusters {
    async fn cluster_exists(&self, identifier: &str) -> Result<bool> {
        let resp = self
            .client
            .describe_clusters()
            .cluster_identifier(identifier)
            .send()
            .await;

        match resp {
            Ok(resp) => Ok(!resp.clusters().is_empty()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_cluster_not_found_fault()) =>
            {
                Ok(false)
            }
            Err(err) => Err(EtlError::from_sdk(err, EtlError::Provision)),
        }
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<()> {
        let mut request = self
            .client
            .create_cluster()
            .cluster_identifier(&spec.identifier)
            .node_type(&spec.node_type)
            .db_name(&spec.database)
            .master_username(&spec.master_username)
            .master_user_password(&spec.master_password);

        request = if spec.nodes > 1 {
            request.cluster_type("multi-node").number_of_nodes(spec.nodes)
        } else {
            request.cluster_type("single-node")
        };

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_cluster_already_exists_fault()) =>
            {
                Ok(())
            }
            Err(err) => Err(EtlError::from_sdk(err, EtlError::Provision)),
        }
    }
}

/// Statements go through the Redshift Data API, so no database connection is held.
pub struct RedshiftStatements {
    client: DataClient,
    poll_interval: Duration,
}

impl RedshiftStatements {
    pub fn new(client: DataClient) -> Self {
        Self {
            client,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl StatementApi for RedshiftStatements {
    async fn execute(&self, cluster: &ClusterSpec, sql: &str) -> Result<()> {
        let submitted = self
            .client
            .execute_statement()
            .cluster_identifier(&cluster.identifier)
            .database(&cluster.database)
            .db_user(&cluster.master_username)
            .sql(sql)
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Load))?;

        let Some(id) = submitted.id() else {
            return Err(EtlError::Load("statement was accepted without an id".to_owned()));
        };
        tracing::debug!("submitted statement {id}");

        loop {
            let statement = self
                .client
                .describe_statement()
                .id(id)
                .send()
                .await
                .map_err(|e| EtlError::from_sdk(e, EtlError::Load))?;

            match statement.status() {
                Some(StatusString::Finished) => return Ok(()),
                Some(StatusString::Failed) | Some(StatusString::Aborted) => {
                    let reason = statement.error().unwrap_or("statement did not finish");
                    return Err(EtlError::Load(reason.to_owned()));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id VARCHAR(16),
    title VARCHAR(1200),
    subreddit VARCHAR(64),
    author VARCHAR(64),
    score INTEGER,
    num_comments INTEGER,
    url VARCHAR(2048),
    created_utc TIMESTAMP
);"
    )
}

pub fn copy_sql(table: &str, source: &str, role_arn: &str) -> String {
    format!(
        "COPY {table} FROM {} IAM_ROLE {} FORMAT AS JSON 'auto' TIMEFORMAT 'epochsecs';",
        quote_literal(source),
        quote_literal(role_arn)
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub async fn ensure_table(
    statements: &dyn StatementApi,
    cluster: &ClusterSpec,
    table: &str,
) -> Result<()> {
    statements.execute(cluster, &create_table_sql(table)).await?;
    tracing::info!("table {table} is ready");
    Ok(())
}

pub async fn copy_from_s3(
    statements: &dyn StatementApi,
    cluster: &ClusterSpec,
    table: &str,
    source: &str,
    role_arn: &str,
) -> Result<()> {
    tracing::info!("loading {source} into {table}");
    statements
        .execute(cluster, &copy_sql(table, source, role_arn))
        .await?;
    tracing::info!("loaded {source} into {table}");
    Ok(())
}
