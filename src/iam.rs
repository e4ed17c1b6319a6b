use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_iam::{types::PolicyScopeType, Client};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EtlError, Result};

#[derive(Deserialize, Debug, Clone)]
pub struct IamConfig {
    pub roles: Vec<RoleDefinition>,
    pub policies: Vec<PolicyDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RoleDefinition {
    pub role_name: String,
    #[serde(default)]
    pub description: String,
    pub trust_policy: Value,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PolicyDefinition {
    pub policy_name: String,
    #[serde(default)]
    pub description: String,
    pub policy_document: Value,
    /// Role the policy is attached to. Defaults to the first declared role.
    #[serde(default)]
    pub role_name: Option<String>,
}

impl IamConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| EtlError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let config: IamConfig = serde_json::from_slice(raw)
            .map_err(|e| EtlError::Config(format!("invalid IAM configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            return Err(EtlError::Config("IAM configuration declares no roles".to_owned()));
        }

        let mut roles = HashSet::new();
        for role in &self.roles {
            if role.role_name.is_empty() || !roles.insert(role.role_name.as_str()) {
                return Err(EtlError::Config(format!(
                    "role names must be unique and non-empty, got '{}'",
                    role.role_name
                )));
            }
            if !role.trust_policy.is_object() {
                return Err(EtlError::Config(format!(
                    "trust policy of role '{}' is not a JSON object",
                    role.role_name
                )));
            }
        }

        let mut policies = HashSet::new();
        for policy in &self.policies {
            if policy.policy_name.is_empty() || !policies.insert(policy.policy_name.as_str()) {
                return Err(EtlError::Config(format!(
                    "policy names must be unique and non-empty, got '{}'",
                    policy.policy_name
                )));
            }
            if !policy.policy_document.is_object() {
                return Err(EtlError::Config(format!(
                    "document of policy '{}' is not a JSON object",
                    policy.policy_name
                )));
            }
            if let Some(role) = &policy.role_name {
                if !roles.contains(role.as_str()) {
                    return Err(EtlError::Config(format!(
                        "policy '{}' targets undeclared role '{role}'",
                        policy.policy_name
                    )));
                }
            }
        }

        Ok(())
    }

    /// The role the warehouse assumes for COPY.
    pub fn copy_role(&self) -> &RoleDefinition {
        &self.roles[0]
    }

    pub fn target_role<'a>(&'a self, policy: &'a PolicyDefinition) -> &'a str {
        policy
            .role_name
            .as_deref()
            .unwrap_or(&self.copy_role().role_name)
    }
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn role_arn(&self, role_name: &str) -> Result<Option<String>>;
    async fn create_role(&self, role: &RoleDefinition) -> Result<String>;
    async fn policy_arn(&self, policy_name: &str) -> Result<Option<String>>;
    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String>;
    async fn attached_policies(&self, role_name: &str) -> Result<Vec<String>>;
    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;
}

pub struct IamStore {
    client: Client,
}

impl IamStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

#[async_trait]
impl IdentityApi for IamStore {
    async fn role_arn(&self, role_name: &str) -> Result<Option<String>> {
        match self.client.get_role().role_name(role_name).send().await {
            Ok(resp) => Ok(resp.role().map(|r| r.arn().to_owned())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(EtlError::from_sdk(err, EtlError::Permission)),
        }
    }

    async fn create_role(&self, role: &RoleDefinition) -> Result<String> {
        let description = non_empty(&role.description)
            .unwrap_or_else(|| format!("IAM role: {}", role.role_name));
        let resp = self
            .client
            .create_role()
            .role_name(&role.role_name)
            .assume_role_policy_document(role.trust_policy.to_string())
            .description(description)
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Permission))?;

        resp.role()
            .map(|r| r.arn().to_owned())
            .ok_or_else(|| {
                EtlError::Permission(format!("no ARN returned for role {}", role.role_name))
            })
    }

    async fn policy_arn(&self, policy_name: &str) -> Result<Option<String>> {
        let policies = self
            .client
            .list_policies()
            .scope(PolicyScopeType::Local)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Permission))?;

        Ok(policies
            .iter()
            .find(|p| p.policy_name() == Some(policy_name))
            .and_then(|p| p.arn())
            .map(str::to_owned))
    }

    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String> {
        let resp = self
            .client
            .create_policy()
            .policy_name(&policy.policy_name)
            .policy_document(policy.policy_document.to_string())
            .set_description(non_empty(&policy.description))
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Permission))?;

        resp.policy()
            .and_then(|p| p.arn())
            .map(str::to_owned)
            .ok_or_else(|| {
                EtlError::Permission(format!("no ARN returned for policy {}", policy.policy_name))
            })
    }

    async fn attached_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let attached = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Permission))?;

        Ok(attached
            .iter()
            .filter_map(|p| p.policy_arn())
            .map(str::to_owned)
            .collect())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Permission))?;

        Ok(())
    }
}

pub async fn ensure_role(identity: &dyn IdentityApi, role: &RoleDefinition) -> Result<String> {
    if let Some(arn) = identity.role_arn(&role.role_name).await? {
        tracing::info!("role {} already exists", role.role_name);
        return Ok(arn);
    }

    let arn = identity.create_role(role).await?;
    tracing::info!("created role {}", role.role_name);
    Ok(arn)
}

pub async fn ensure_policy(
    identity: &dyn IdentityApi,
    policy: &PolicyDefinition,
) -> Result<String> {
    if let Some(arn) = identity.policy_arn(&policy.policy_name).await? {
        tracing::info!("policy {} already exists", policy.policy_name);
        return Ok(arn);
    }

    let arn = identity.create_policy(policy).await?;
    tracing::info!("created policy {}", policy.policy_name);
    Ok(arn)
}

pub async fn attach_policy_to_role(
    identity: &dyn IdentityApi,
    role_name: &str,
    policy_arn: &str,
) -> Result<()> {
    let attached = identity.attached_policies(role_name).await?;
    if attached.iter().any(|arn| arn == policy_arn) {
        tracing::info!("policy {policy_arn} already attached to {role_name}");
        return Ok(());
    }

    identity.attach_policy(role_name, policy_arn).await?;
    tracing::info!("attached policy {policy_arn} to {role_name}");
    Ok(())
}

/// Applies a whole configuration document and returns the ARN of the COPY role.
pub async fn secure(identity: &dyn IdentityApi, config: &IamConfig) -> Result<String> {
    let mut copy_role_arn = None;
    for role in &config.roles {
        let arn = ensure_role(identity, role).await?;
        copy_role_arn.get_or_insert(arn);
    }

    for policy in &config.policies {
        let arn = ensure_policy(identity, policy).await?;
        attach_policy_to_role(identity, config.target_role(policy), &arn).await?;
    }

    tracing::info!("IAM setup completed");
    copy_role_arn.ok_or_else(|| EtlError::Config("IAM configuration declares no roles".to_owned()))
}
