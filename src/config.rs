use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EtlError, Result};
use crate::reddit::Sort;
use crate::redshift::ClusterSpec;

const DEFAULT_SUBREDDITS: &str = "dataengineering,datascience";
const DEFAULT_POST_LIMIT: u32 = 20;
const DEFAULT_IAM_CONFIG: &str = "iam_config.json";
const MAX_SUBREDDIT_LEN: usize = 21;

#[derive(Debug, Clone, Default)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl RedditCredentials {
    pub fn is_complete(&self) -> bool {
        !(self.client_id.is_empty() || self.client_secret.is_empty() || self.user_agent.is_empty())
    }
}

/// Everything a run needs, resolved once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub reddit: RedditCredentials,
    pub subreddits: Vec<String>,
    pub post_limit: u32,
    pub sort: Sort,
    pub bucket: String,
    pub bucket_prefix: String,
    pub cluster: ClusterSpec,
    pub table: String,
    pub iam_config_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_owned());

        let bucket = var("BUCKET_NAME")
            .ok_or_else(|| EtlError::Config("BUCKET_NAME is not set".to_owned()))?;

        let subreddits: Vec<String> = or("SUBREDDITS", DEFAULT_SUBREDDITS)
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = subreddits.iter().find(|s| !is_subreddit(s)) {
            return Err(EtlError::Config(format!("'{bad}' is not a valid subreddit name")));
        }

        let post_limit = match var("POST_LIMIT") {
            Some(v) => parse_positive("POST_LIMIT", &v)?,
            None => DEFAULT_POST_LIMIT,
        };

        let sort = Sort::parse(
            &or("POST_SORT", "top"),
            var("POST_TIME_FILTER").as_deref(),
        )?;

        let defaults = ClusterSpec::default();
        let cluster = ClusterSpec {
            identifier: or("REDSHIFT_CLUSTER_ID", &defaults.identifier),
            node_type: or("REDSHIFT_NODE_TYPE", &defaults.node_type),
            nodes: match var("REDSHIFT_NODES") {
                Some(v) => parse_positive("REDSHIFT_NODES", &v)?,
                None => defaults.nodes,
            },
            database: or("REDSHIFT_DATABASE", &defaults.database),
            master_username: or("REDSHIFT_USER", &defaults.master_username),
            master_password: or("REDSHIFT_PASSWORD", &defaults.master_password),
        };

        let table = or("REDSHIFT_TABLE", "posts");
        if !is_identifier(&table) {
            return Err(EtlError::Config(format!("'{table}' is not a valid table name")));
        }

        Ok(Self {
            reddit: RedditCredentials {
                client_id: or("REDDIT_CLIENT_ID", ""),
                client_secret: or("REDDIT_CLIENT_SECRET", ""),
                user_agent: or("REDDIT_USER_AGENT", ""),
            },
            subreddits,
            post_limit,
            sort,
            bucket,
            bucket_prefix: or("BUCKET_PREFIX", "reddit"),
            cluster,
            table,
            iam_config_path: PathBuf::from(or("IAM_CONFIG_PATH", DEFAULT_IAM_CONFIG)),
        })
    }
}

// Table names are spliced into SQL, so only plain (optionally schema-qualified)
// identifiers pass.
fn is_identifier(name: &str) -> bool {
    name.split('.').all(|part| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

// Subreddit names go straight into the listing URL path.
fn is_subreddit(name: &str) -> bool {
    name.len() <= MAX_SUBREDDIT_LEN && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_positive<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    let invalid = || EtlError::Config(format!("{name} must be a positive number, got '{value}'"));
    match value.trim().parse::<T>() {
        Ok(number) if number > T::default() => Ok(number),
        _ => Err(invalid()),
    }
}
