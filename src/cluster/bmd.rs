//! Bucket metadata
//!
//! The BMD maps bucket identity (provider, namespace, name) to bucket
//! properties. It follows the same clone/modify/publish and persistence
//! discipline as the cluster map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::{Error, Result, Revs};

/// Marker stored in the source bucket's properties while a rename is
/// migrating data (protocol-level string).
pub const RENAMED_MARKER: &str = "rename-lb";

/// Bucket provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ais,
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ais => "ais",
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ais" => Ok(Provider::Ais),
            "aws" => Ok(Provider::Aws),
            "gcp" => Ok(Provider::Gcp),
            "azure" => Ok(Provider::Azure),
            other => Err(Error::InvalidProps(format!("unknown provider: {}", other))),
        }
    }
}

/// Bucket identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bck {
    pub provider: Provider,
    #[serde(default)]
    pub ns: String,
    pub name: String,
}

impl Bck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            provider: Provider::Ais,
            ns: String::new(),
            name: name.into(),
        }
    }

    /// Parse `provider://[ns/]name`; a bare name defaults to `ais://`.
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let (provider, rest) = match uri.split_once("://") {
            Some((p, rest)) => (Provider::parse(p)?, rest),
            None => (Provider::Ais, uri),
        };
        let (ns, name) = match rest.split_once('/') {
            Some((ns, name)) => (ns.to_string(), name),
            None => (String::new(), rest),
        };
        if name.is_empty() {
            return Err(Error::InvalidProps(format!("empty bucket name in {:?}", uri)));
        }
        Ok(Self {
            provider,
            ns,
            name: name.to_string(),
        })
    }

    /// Unique flat key, also used for lock striping
    pub fn uname(&self) -> String {
        if self.ns.is_empty() {
            format!("{}://{}", self.provider.as_str(), self.name)
        } else {
            format!("{}://{}/{}", self.provider.as_str(), self.ns, self.name)
        }
    }
}

impl std::fmt::Display for Bck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uname())
    }
}

/// Mirroring (n-way replication) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConf {
    pub enabled: bool,
    pub copies: i64,
}

impl Default for MirrorConf {
    fn default() -> Self {
        Self {
            enabled: false,
            copies: 1,
        }
    }
}

/// Erasure-coding configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EcConf {
    pub enabled: bool,
    pub data_slices: i64,
    pub parity_slices: i64,
}

/// Bucket properties
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BucketProps {
    #[serde(default)]
    pub mirror: MirrorConf,
    #[serde(default)]
    pub ec: EcConf,
    /// Non-empty while the bucket is the source of an ongoing rename
    #[serde(default)]
    pub renamed: String,
    #[serde(default)]
    pub created: i64,
}

impl BucketProps {
    /// Validate against cluster capacity; EC needs enough targets to
    /// spread data and parity slices.
    pub fn validate(&self, target_cnt: usize) -> Result<()> {
        if self.mirror.enabled && self.mirror.copies < 2 {
            return Err(Error::InvalidProps(format!(
                "mirroring requires at least 2 copies, got {}",
                self.mirror.copies
            )));
        }
        if self.ec.enabled {
            if self.ec.data_slices < 1 || self.ec.parity_slices < 1 {
                return Err(Error::InvalidProps("invalid number of EC slices".into()));
            }
            let required = (self.ec.data_slices + self.ec.parity_slices) as usize;
            if target_cnt > 0 && required >= target_cnt {
                return Err(Error::InvalidProps(format!(
                    "EC configuration ({}+{}) requires more than {} targets",
                    self.ec.data_slices, self.ec.parity_slices, target_cnt
                )));
            }
        }
        Ok(())
    }
}

/// Partial update applied on top of existing properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropsToUpdate {
    pub mirror_enabled: Option<bool>,
    pub mirror_copies: Option<i64>,
    pub ec_enabled: Option<bool>,
    pub ec_data_slices: Option<i64>,
    pub ec_parity_slices: Option<i64>,
}

impl BucketProps {
    pub fn apply(&mut self, upd: &PropsToUpdate) {
        if let Some(v) = upd.mirror_enabled {
            self.mirror.enabled = v;
        }
        if let Some(v) = upd.mirror_copies {
            self.mirror.copies = v;
        }
        if let Some(v) = upd.ec_enabled {
            self.ec.enabled = v;
        }
        if let Some(v) = upd.ec_data_slices {
            self.ec.data_slices = v;
        }
        if let Some(v) = upd.ec_parity_slices {
            self.ec.parity_slices = v;
        }
    }
}

/// Versioned bucket-metadata snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bmd {
    pub version: i64,
    pub uuid: String,
    pub buckets: HashMap<String, BucketProps>,
}

impl Revs for Bmd {
    const TAG: &'static str = "bmd";

    fn version(&self) -> i64 {
        self.version
    }
}

impl Bmd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bck: &Bck) -> Option<&BucketProps> {
        self.buckets.get(&bck.uname())
    }

    /// Add a bucket; false when it already exists. Bumps the version on
    /// success.
    pub fn add(&mut self, bck: &Bck, props: BucketProps) -> bool {
        if self.buckets.contains_key(&bck.uname()) {
            return false;
        }
        self.buckets.insert(bck.uname(), props);
        self.version += 1;
        true
    }

    /// Delete a bucket; false when absent. Bumps the version on success.
    pub fn del(&mut self, bck: &Bck) -> bool {
        if self.buckets.remove(&bck.uname()).is_none() {
            return false;
        }
        self.version += 1;
        true
    }

    /// Replace properties of an existing bucket. Bumps the version.
    pub fn set(&mut self, bck: &Bck, props: BucketProps) -> Result<()> {
        let slot = self
            .buckets
            .get_mut(&bck.uname())
            .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?;
        *slot = props;
        self.version += 1;
        Ok(())
    }
}

impl std::fmt::Display for Bmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BMD v{}[{} buckets]", self.version, self.buckets.len())
    }
}
