//! Node descriptors
//!
//! A `Snode` is an immutable record describing one cluster member. The
//! cluster map owns descriptors by value; nothing holds references into
//! a map snapshot beyond the snapshot's own scope.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-node flag bitset carried in the cluster map
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnodeFlags: u64 {
        /// Never a candidate in primary elections
        const NON_ELECTABLE = 1 << 0;
        /// Member of the information council
        const IC = 1 << 1;
        /// Temporarily out for maintenance
        const MAINTENANCE = 1 << 2;
        /// Being permanently removed
        const DECOMMISSION = 1 << 3;
    }
}

impl SnodeFlags {
    /// Flags that take a node out of service; setting any of them also
    /// clears `IC`.
    pub const MAINTENANCE_MASK: SnodeFlags =
        SnodeFlags::MAINTENANCE.union(SnodeFlags::DECOMMISSION);
}

impl Default for SnodeFlags {
    fn default() -> Self {
        SnodeFlags::empty()
    }
}

impl Serialize for SnodeFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for SnodeFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(SnodeFlags::from_bits_truncate(bits))
    }
}

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonRole {
    Proxy,
    Target,
}

impl std::fmt::Display for DaemonRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonRole::Proxy => write!(f, "proxy"),
            DaemonRole::Target => write!(f, "target"),
        }
    }
}

/// Network endpoint of a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetInfo {
    pub url: String,
}

impl NetInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Cluster member descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snode {
    pub id: String,
    pub role: DaemonRole,
    pub intra_control: NetInfo,
    pub public: NetInfo,
    #[serde(default)]
    pub flags: SnodeFlags,
}

impl Snode {
    pub fn new(
        id: impl Into<String>,
        role: DaemonRole,
        intra_control: NetInfo,
        public: NetInfo,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            intra_control,
            public,
            flags: SnodeFlags::empty(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.role == DaemonRole::Proxy
    }

    pub fn is_target(&self) -> bool {
        self.role == DaemonRole::Target
    }

    pub fn is_ic(&self) -> bool {
        self.flags.contains(SnodeFlags::IC)
    }

    pub fn non_electable(&self) -> bool {
        self.flags.contains(SnodeFlags::NON_ELECTABLE)
    }

    pub fn in_maintenance(&self) -> bool {
        self.flags.intersects(SnodeFlags::MAINTENANCE_MASK)
    }

    /// Two descriptors collide when they share an ID or any endpoint URL
    pub fn shares_url(&self, other: &Snode) -> Option<&str> {
        for url in [&self.intra_control.url, &self.public.url] {
            if url.is_empty() {
                continue;
            }
            if *url == other.intra_control.url || *url == other.public.url {
                return Some(url);
            }
        }
        None
    }

    pub fn name(&self) -> String {
        format!("{}[{}]", self.role, self.id)
    }
}

impl std::fmt::Display for Snode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn mock_node(id: &str, role: DaemonRole, port: u16) -> Snode {
        Snode::new(
            id,
            role,
            NetInfo::new(format!("http://127.0.0.1:{}", port)),
            NetInfo::new(format!("http://10.0.0.1:{}", port)),
        )
    }

    #[test]
    fn test_flags_maintenance_mask() {
        let mut flags = SnodeFlags::IC;
        flags.insert(SnodeFlags::MAINTENANCE);
        assert!(flags.intersects(SnodeFlags::MAINTENANCE_MASK));
        assert!(SnodeFlags::DECOMMISSION.intersects(SnodeFlags::MAINTENANCE_MASK));
        assert!(!SnodeFlags::NON_ELECTABLE.intersects(SnodeFlags::MAINTENANCE_MASK));
    }

    #[test]
    fn test_shares_url() {
        let a = mock_node("a", DaemonRole::Proxy, 8080);
        let b = mock_node("b", DaemonRole::Proxy, 8081);
        let c = mock_node("c", DaemonRole::Target, 8080);
        assert!(a.shares_url(&b).is_none());
        assert!(a.shares_url(&c).is_some());
    }

    #[test]
    fn test_flags_serde_round_trip() {
        let mut node = mock_node("a", DaemonRole::Proxy, 8080);
        node.flags = SnodeFlags::IC | SnodeFlags::NON_ELECTABLE;
        let json = serde_json::to_string(&node).unwrap();
        let back: Snode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.flags, node.flags);
    }
}
