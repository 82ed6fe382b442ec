//! Rebalance metadata
//!
//! A tiny versioned record; incrementing it (metasynced alongside the
//! BMD) triggers a rebalance round on all targets.

use serde::{Deserialize, Serialize};

use crate::common::Revs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rmd {
    pub version: i64,
    #[serde(default)]
    pub resilver: bool,
}

impl Revs for Rmd {
    const TAG: &'static str = "rmd";

    fn version(&self) -> i64 {
        self.version
    }
}

impl Rmd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self) {
        self.version += 1;
    }
}

impl std::fmt::Display for Rmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RMD v{}[resilver={}]", self.version, self.resilver)
    }
}
