//! Content-addressed on-disk store for pipeline artifacts.
//!
//! Every write goes through a temp file, fsync, and an atomic rename, so a
//! reader can never observe a partial blob under a final key. An integrity
//! sidecar (`<name>.sha256`) is written after the blob; a blob without a
//! matching sidecar reads as [`PipelineError::ArtifactCorrupt`], never as a
//! silently-trusted partial result.

use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::backend::content_hash;
use crate::error::{PipelineError, Result};

/// Logical identity of a persisted artifact.
///
/// Key derivation is a pure function of the parameters: the same logical
/// artifact always maps to the same on-disk name, independent of who wrote
/// it or when.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    Srs { scheme: String, logrows: u32 },
    Settings { circuit_hash: String },
    CompiledCircuit { circuit_hash: String },
    ProvingKey { circuit_hash: String },
    VerificationKey { circuit_hash: String },
    Witness { circuit_hash: String, input_hash: String },
    Proof { circuit_hash: String, input_hash: String },
    VerifierContract { circuit_hash: String },
}

/// First 16 hex chars of a content hash, for readable file names.
fn short(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

impl ArtifactKey {
    /// On-disk file name for this key.
    pub fn file_name(&self) -> String {
        match self {
            Self::Srs { scheme, logrows } => format!("srs-{scheme}-logrows{logrows}.bin"),
            Self::Settings { circuit_hash } => format!("settings-{}.json", short(circuit_hash)),
            Self::CompiledCircuit { circuit_hash } => {
                format!("circuit-{}.json", short(circuit_hash))
            }
            Self::ProvingKey { circuit_hash } => format!("pk-{}.key", short(circuit_hash)),
            Self::VerificationKey { circuit_hash } => format!("vk-{}.key", short(circuit_hash)),
            Self::Witness {
                circuit_hash,
                input_hash,
            } => format!("witness-{}-{}.json", short(circuit_hash), short(input_hash)),
            Self::Proof {
                circuit_hash,
                input_hash,
            } => format!("proof-{}-{}.json", short(circuit_hash), short(input_hash)),
            Self::VerifierContract { circuit_hash } => {
                format!("verifier-{}.sol", short(circuit_hash))
            }
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Srs { scheme, logrows } => {
                write!(f, "srs:scheme={scheme},logrows={logrows}")
            }
            Self::Settings { circuit_hash } => write!(f, "settings:circuit={circuit_hash}"),
            Self::CompiledCircuit { circuit_hash } => {
                write!(f, "compiled-circuit:circuit={circuit_hash}")
            }
            Self::ProvingKey { circuit_hash } => write!(f, "pk:circuit={circuit_hash}"),
            Self::VerificationKey { circuit_hash } => write!(f, "vk:circuit={circuit_hash}"),
            Self::Witness {
                circuit_hash,
                input_hash,
            } => write!(f, "witness:circuit={circuit_hash},input={input_hash}"),
            Self::Proof {
                circuit_hash,
                input_hash,
            } => write!(f, "proof:circuit={circuit_hash},input={input_hash}"),
            Self::VerifierContract { circuit_hash } => {
                write!(f, "verifier-contract:circuit={circuit_hash}")
            }
        }
    }
}

/// Handle to a complete, integrity-verified artifact.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    pub path: PathBuf,
    pub sha256: String,
}

/// Exclusive owner of all persisted artifacts.
///
/// Stages receive read-only bytes or write-once slots; nothing mutates an
/// artifact after it is visible under its final key.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`, sweeping any temp
    /// files left behind by interrupted writers.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(".tmp") {
                tracing::debug!(file = %name.to_string_lossy(), "removing stale temp file");
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn sidecar_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(format!("{}.sha256", key.file_name()))
    }

    /// Atomically persist `bytes` under `key`.
    ///
    /// Concurrent puts to the same key are safe: a loser of the rename race
    /// keeps the winner's blob if its bytes verify, and replaces it
    /// otherwise.
    pub fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<ArtifactRef> {
        let digest = content_hash(bytes);
        let final_path = self.blob_path(key);

        let mut tmp = NamedTempFile::with_prefix_in(".tmp", &self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&final_path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = content_hash(&fs::read(&final_path)?);
                if existing != digest {
                    tracing::warn!(key = %key, "replacing artifact with mismatched content");
                    e.file.persist(&final_path).map_err(|e| e.error)?;
                }
                // identical content: keep the winner, drop our temp
            }
            Err(e) => return Err(e.error.into()),
        }

        // Sidecar goes last: a crash between the two renames leaves a blob
        // that reads as corrupt, not one that reads as trusted.
        self.write_sidecar(key, &digest)?;

        Ok(ArtifactRef {
            key: key.clone(),
            path: final_path,
            sha256: digest,
        })
    }

    fn write_sidecar(&self, key: &ArtifactKey, digest: &str) -> Result<()> {
        let mut tmp = NamedTempFile::with_prefix_in(".tmp", &self.root)?;
        tmp.write_all(digest.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.sidecar_path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read and integrity-verify the artifact under `key`.
    pub fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        let path = self.blob_path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ArtifactNotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let actual = content_hash(&bytes);
        let expected = match fs::read_to_string(self.sidecar_path(key)) {
            Ok(s) => s.trim().to_string(),
            Err(_) => {
                return Err(PipelineError::ArtifactCorrupt {
                    key: key.to_string(),
                    expected: "<missing sidecar>".into(),
                    actual,
                })
            }
        };
        if actual != expected {
            return Err(PipelineError::ArtifactCorrupt {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(bytes)
    }

    /// Persist a JSON-encodable artifact under `key`.
    pub fn put_json<T: Serialize>(&self, key: &ArtifactKey, value: &T) -> Result<ArtifactRef> {
        let bytes = serde_json::to_vec(value).map_err(|e| PipelineError::ArtifactEncode {
            key: key.to_string(),
            source: e,
        })?;
        self.put(key, &bytes)
    }

    /// Read, integrity-verify, and decode a JSON artifact.
    pub fn get_json<T: DeserializeOwned>(&self, key: &ArtifactKey) -> Result<T> {
        let bytes = self.get(key)?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::ConfigParse {
            path: self.blob_path(key),
            source: e,
        })
    }

    /// Build a verified reference to an existing artifact.
    pub fn reference(&self, key: &ArtifactKey) -> Result<ArtifactRef> {
        let bytes = self.get(key)?;
        Ok(ArtifactRef {
            key: key.clone(),
            path: self.blob_path(key),
            sha256: content_hash(&bytes),
        })
    }

    /// Whether a complete artifact (blob + sidecar) exists under `key`.
    pub fn exists(&self, key: &ArtifactKey) -> bool {
        self.blob_path(key).exists() && self.sidecar_path(key).exists()
    }

    /// Whether the artifact under `key` is present, intact, and matches
    /// `expected_hash`.
    pub fn verify(&self, key: &ArtifactKey, expected_hash: &str) -> bool {
        match self.get(key) {
            Ok(bytes) => content_hash(&bytes) == expected_hash,
            Err(_) => false,
        }
    }
}
