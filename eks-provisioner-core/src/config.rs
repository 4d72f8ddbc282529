//! Provisioner configuration.
//!
//! Every value defaults to the topology the provisioner was written for, so a run with no
//! configuration file declares the stock EKS stack. A TOML file overrides any subset.

use std::path::Path;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    pub role: RoleConfig,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
    pub bucket: BucketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RoleConfig {
    pub name: String,
    pub service_principal: String,
    /// Attached in this order
    pub managed_policy_arns: Vec<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            name: "eks-cluster-role".to_string(),
            service_principal: "eks.amazonaws.com".to_string(),
            managed_policy_arns: vec![
                "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy".to_string(),
                "arn:aws:iam::aws:policy/AmazonEKSServicePolicy".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub vpc_name: String,
    pub vpc_cidr: String,
    pub internet_gateway_name: String,
    pub route_table_name: String,
    pub default_route_cidr: String,
    pub subnets: Vec<SubnetConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_name: "main".to_string(),
            vpc_cidr: "10.0.0.0/16".to_string(),
            internet_gateway_name: "main-ig".to_string(),
            route_table_name: "main-rt".to_string(),
            default_route_cidr: "0.0.0.0/0".to_string(),
            subnets: vec![
                SubnetConfig::new(
                    "main-public-a",
                    "10.0.1.0/24",
                    "ap-northeast-1a",
                    "Main-Public-A",
                    "eks-rta-1",
                ),
                SubnetConfig::new(
                    "main-public-d",
                    "10.0.2.0/24",
                    "ap-northeast-1d",
                    "Main-Public-D",
                    "eks-rta-2",
                ),
                SubnetConfig::new(
                    "main-private-A",
                    "10.0.100.0/24",
                    "ap-northeast-1a",
                    "Main-Private",
                    "eks-rta-3",
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubnetConfig {
    pub name: String,
    pub cidr_block: String,
    pub availability_zone: String,
    /// Value of the `Name` tag
    pub tag_name: String,
    /// Logical name of the route table association
    pub association_name: String,
}

impl SubnetConfig {
    pub fn new(
        name: &str,
        cidr_block: &str,
        availability_zone: &str,
        tag_name: &str,
        association_name: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: availability_zone.to_string(),
            tag_name: tag_name.to_string(),
            association_name: association_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "kubets-cluster".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    pub name: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            name: "my-bucket".to_string(),
        }
    }
}

impl ProvisionerConfig {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject values that cannot produce a meaningful run. Uniqueness of names within the
    /// account is left to the engine.
    pub fn validate(&self) -> ConfigResult<()> {
        // IAM role name charset
        let role_name = Regex::new(r"^[\w+=,.@-]{1,64}$")
            .map_err(|e| ConfigError::Invalid(format!("role name pattern: {e}")))?;
        if !role_name.is_match(&self.role.name) {
            return Err(ConfigError::Invalid(format!(
                "role name '{}' must be 1-64 characters of [A-Za-z0-9+=,.@_-]",
                self.role.name
            )));
        }
        if self.role.service_principal.is_empty() {
            return Err(ConfigError::Invalid(
                "role service_principal must not be empty".to_string(),
            ));
        }
        if self.role.managed_policy_arns.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid(
                "managed policy ARNs must not be empty".to_string(),
            ));
        }
        if self.network.subnets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one subnet is required for the cluster".to_string(),
            ));
        }
        if self.cluster.name.is_empty() {
            return Err(ConfigError::Invalid(
                "cluster name must not be empty".to_string(),
            ));
        }
        if self.bucket.name.is_empty() {
            return Err(ConfigError::Invalid(
                "bucket name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
