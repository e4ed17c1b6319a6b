//! In-memory stand-ins for the cloud and Reddit interfaces, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EtlError, Result};
use crate::iam::{IdentityApi, PolicyDefinition, RoleDefinition};
use crate::reddit::{Post, PostSource, Sort};
use crate::redshift::{ClusterApi, ClusterSpec, StatementApi};
use crate::s3::{list_prefix, LoadStatus, ObjectStore};

pub const IAM_CONFIG: &str = r#"{
    "roles": [
        {
            "role_name": "redshift-s3-access",
            "description": "Lets Redshift read the raw bucket",
            "trust_policy": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": "redshift.amazonaws.com"},
                    "Action": "sts:AssumeRole"
                }]
            }
        },
        {
            "role_name": "redshift-logs",
            "trust_policy": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": "redshift.amazonaws.com"},
                    "Action": "sts:AssumeRole"
                }]
            }
        }
    ],
    "policies": [
        {
            "policy_name": "redshift-s3-read",
            "description": "Read access to the raw bucket",
            "policy_document": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["s3:GetObject", "s3:ListBucket"],
                    "Resource": ["arn:aws:s3:::reddit-data", "arn:aws:s3:::reddit-data/*"]
                }]
            }
        },
        {
            "policy_name": "redshift-write-logs",
            "policy_document": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
                    "Resource": "*"
                }]
            },
            "role_name": "redshift-logs"
        }
    ]
}"#;

const ACCOUNT: &str = "000000000000";

pub fn sample_posts(n: usize) -> Vec<Post> {
    (0..n)
        .map(|i| Post {
            id: format!("1b{i:04}"),
            title: format!("Post number {i}, with \"quotes\" and a comma"),
            subreddit: "dataengineering".to_owned(),
            author: format!("user_{i}"),
            score: 100 - i as i64 * 7,
            num_comments: i as i64,
            url: format!("https://www.reddit.com/r/dataengineering/comments/1b{i:04}/"),
            created_utc: 1_709_800_000 + i as i64 * 60,
        })
        .collect()
}

#[derive(Default)]
pub struct FakeObjectStore {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<(String, String), (Vec<u8>, LoadStatus)>>,
    created: AtomicUsize,
}

impl FakeObjectStore {
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let store = Self::default();
        store
            .buckets
            .lock()
            .unwrap()
            .extend(buckets.iter().map(|b| b.to_string()));
        store
    }

    pub fn buckets_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn status(&self, bucket: &str, key: &str) -> Option<LoadStatus> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|(_, status)| *status)
    }

    fn require_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.lock().unwrap().contains(bucket) {
            Ok(())
        } else {
            Err(EtlError::Storage(format!("NoSuchBucket: {bucket}")))
        }
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().unwrap().contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        if !self.buckets.lock().unwrap().insert(bucket.to_owned()) {
            return Err(EtlError::Storage(format!("BucketAlreadyExists: {bucket}")));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        status: LoadStatus,
    ) -> Result<()> {
        self.require_bucket(bucket)?;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), key.to_owned()), (body, status));
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.require_bucket(bucket)?;
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|(body, _)| body.clone())
            .ok_or_else(|| EtlError::Storage(format!("NoSuchKey: {key}")))
    }

    async fn set_status(&self, bucket: &str, key: &str, status: LoadStatus) -> Result<()> {
        self.require_bucket(bucket)?;
        match self
            .objects
            .lock()
            .unwrap()
            .get_mut(&(bucket.to_owned(), key.to_owned()))
        {
            Some(object) => {
                object.1 = status;
                Ok(())
            }
            None => Err(EtlError::Storage(format!("NoSuchKey: {key}"))),
        }
    }

    async fn pending_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.require_bucket(bucket)?;
        let prefix = list_prefix(prefix);
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, key), (_, status))| {
                b == bucket && key.starts_with(&prefix) && *status == LoadStatus::NotLoaded
            })
            .map(|((_, key), _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Default)]
pub struct FakeWarehouse {
    clusters: Mutex<Vec<ClusterSpec>>,
    statements: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl FakeWarehouse {
    pub fn fail_statements_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_owned());
    }

    pub fn clusters_created(&self) -> Vec<ClusterSpec> {
        self.clusters.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeWarehouse {
    async fn cluster_exists(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.identifier == identifier))
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<()> {
        self.clusters.lock().unwrap().push(spec.clone());
        Ok(())
    }
}

#[async_trait]
impl StatementApi for FakeWarehouse {
    async fn execute(&self, _cluster: &ClusterSpec, sql: &str) -> Result<()> {
        self.statements.lock().unwrap().push(sql.to_owned());
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(EtlError::Load(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    roles: Mutex<HashMap<String, Value>>,
    policies: Mutex<HashMap<String, String>>,
    attachments: Mutex<HashMap<String, Vec<String>>>,
    mutations: AtomicUsize,
    calls: AtomicUsize,
    deny: bool,
}

impl FakeIdentity {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn trust_policy(&self, role_name: &str) -> Option<Value> {
        self.roles.lock().unwrap().get(role_name).cloned()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, action: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(EtlError::Permission(format!(
                "AccessDenied: not authorized to perform iam:{action}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityApi for FakeIdentity {
    async fn role_arn(&self, role_name: &str) -> Result<Option<String>> {
        self.check("GetRole")?;
        Ok(self
            .roles
            .lock()
            .unwrap()
            .contains_key(role_name)
            .then(|| format!("arn:aws:iam::{ACCOUNT}:role/{role_name}")))
    }

    async fn create_role(&self, role: &RoleDefinition) -> Result<String> {
        self.check("CreateRole")?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.roles
            .lock()
            .unwrap()
            .insert(role.role_name.clone(), role.trust_policy.clone());
        Ok(format!("arn:aws:iam::{ACCOUNT}:role/{}", role.role_name))
    }

    async fn policy_arn(&self, policy_name: &str) -> Result<Option<String>> {
        self.check("ListPolicies")?;
        Ok(self.policies.lock().unwrap().get(policy_name).cloned())
    }

    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String> {
        self.check("CreatePolicy")?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let arn = format!("arn:aws:iam::{ACCOUNT}:policy/{}", policy.policy_name);
        self.policies
            .lock()
            .unwrap()
            .insert(policy.policy_name.clone(), arn.clone());
        Ok(arn)
    }

    async fn attached_policies(&self, role_name: &str) -> Result<Vec<String>> {
        self.check("ListAttachedRolePolicies")?;
        Ok(self
            .attachments
            .lock()
            .unwrap()
            .get(role_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.check("AttachRolePolicy")?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .lock()
            .unwrap()
            .entry(role_name.to_owned())
            .or_default()
            .push(policy_arn.to_owned());
        Ok(())
    }
}

pub struct FakePosts {
    posts: Vec<Post>,
    failure: Mutex<Option<EtlError>>,
    calls: AtomicUsize,
}

impl FakePosts {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, err: EtlError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostSource for FakePosts {
    async fn fetch_posts(&self, _subreddit: &str, limit: u32, _sort: &Sort) -> Result<Vec<Post>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.posts.iter().take(limit as usize).cloned().collect())
    }
}
