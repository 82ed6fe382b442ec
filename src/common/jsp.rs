//! Signed persistence envelopes for versioned cluster metadata
//!
//! Smap, BMD and RMD snapshots are persisted as `{payload, checksum,
//! signature}` envelopes and rewritten on every publish. The checksum
//! catches torn writes, the signature catches foreign or hand-edited
//! files.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::common::{Error, Result};

const SIGNATURE_SALT: &[u8] = b"oxistore.meta.v1";

/// Versioned, replicated cluster metadata (Smap, BMD, RMD).
pub trait Revs: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Short protocol-level tag ("smap", "bmd", "rmd")
    const TAG: &'static str;

    fn version(&self) -> i64;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: String,
    checksum: u32,
    signature: String,
}

fn sign(tag: &str, checksum: u32) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(SIGNATURE_SALT);
    hasher.update(tag.as_bytes());
    hasher.update(&checksum.to_le_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Serialize `val` into a signed envelope file at `path`.
pub fn save<T: Revs>(path: impl AsRef<Path>, val: &T) -> Result<()> {
    let payload = serde_json::to_string(val)?;
    let checksum = crc32fast::hash(payload.as_bytes());
    let env = Envelope {
        payload,
        checksum,
        signature: sign(T::TAG, checksum),
    };
    let bytes = serde_json::to_string(&env)?;
    std::fs::write(path.as_ref(), bytes).map_err(|e| Error::Persistence {
        what: format!("{} ({})", T::TAG, path.as_ref().display()),
        reason: e.to_string(),
    })
}

/// Load and verify a signed envelope file.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load<T: Revs>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    let bytes = match std::fs::read_to_string(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let env: Envelope = serde_json::from_str(&bytes)
        .map_err(|_| Error::Corrupted(path.display().to_string()))?;
    if crc32fast::hash(env.payload.as_bytes()) != env.checksum {
        return Err(Error::Corrupted(format!(
            "{}: checksum mismatch",
            path.display()
        )));
    }
    if sign(T::TAG, env.checksum) != env.signature {
        return Err(Error::Corrupted(format!(
            "{}: bad signature",
            path.display()
        )));
    }
    let val: T = serde_json::from_str(&env.payload)
        .map_err(|_| Error::Corrupted(path.display().to_string()))?;
    Ok(Some(val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMeta {
        version: i64,
        name: String,
    }

    impl Revs for TestMeta {
        const TAG: &'static str = "test";

        fn version(&self) -> i64 {
            self.version
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".test.meta");

        let meta = TestMeta {
            version: 7,
            name: "alpha".to_string(),
        };
        save(&path, &meta).unwrap();

        let loaded: TestMeta = load(&path).unwrap().unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let loaded: Option<TestMeta> = load(dir.path().join("nope")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_tampered_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".test.meta");

        let meta = TestMeta {
            version: 1,
            name: "alpha".to_string(),
        };
        save(&path, &meta).unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("alpha", "omega");
        std::fs::write(&path, tampered).unwrap();

        let res: Result<Option<TestMeta>> = load(&path);
        assert!(matches!(res, Err(Error::Corrupted(_))));
    }
}
