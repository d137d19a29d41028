//! Key setup: deterministic PK/VK derivation from (circuit, SRS).

use std::sync::Arc;

use crate::artifacts::{ArtifactKey, ArtifactRef, ArtifactStore};
use crate::backend::{CompiledCircuit, ProvingBackend, ProvingKey, Srs, VerificationKey};
use crate::error::{PipelineError, Result};

/// Derives and persists the proving/verification key pair.
///
/// An undersized SRS is a hard [`PipelineError::SrsSizeMismatch`] error, and
/// a failed derivation is a hard [`PipelineError::KeySetupFailed`] — the
/// pipeline never substitutes mock keys or continues in a degraded mode.
pub struct KeySetupStage {
    backend: Arc<dyn ProvingBackend>,
    store: Arc<ArtifactStore>,
}

impl KeySetupStage {
    pub fn new(backend: Arc<dyn ProvingBackend>, store: Arc<ArtifactStore>) -> Self {
        Self { backend, store }
    }

    /// Derive the key pair and persist both.
    ///
    /// The VK is written before the PK, so an interrupted run can never
    /// leave a proving key on disk without its verifier. Returns the keys
    /// plus their store references, VK first.
    pub async fn setup(
        &self,
        compiled: &CompiledCircuit,
        srs: &Srs,
    ) -> Result<(ProvingKey, VerificationKey, ArtifactRef, ArtifactRef)> {
        let required = compiled.settings.logrows;
        if srs.logrows < required {
            return Err(PipelineError::SrsSizeMismatch {
                required,
                provided: srs.logrows,
            });
        }

        let (pk, vk) = self
            .backend
            .setup_keys(compiled, srs)
            .await
            .map_err(|e| match e {
                e @ PipelineError::Timeout { .. } => e,
                e => PipelineError::KeySetupFailed(e.to_string()),
            })?;

        if pk.circuit_hash != compiled.hash || vk.circuit_hash != compiled.hash {
            return Err(PipelineError::KeySetupFailed(format!(
                "backend returned keys for circuit {} instead of {}",
                pk.circuit_hash, compiled.hash
            )));
        }

        let vk_ref = self.store.put(
            &ArtifactKey::VerificationKey {
                circuit_hash: compiled.hash.clone(),
            },
            &vk.blob,
        )?;
        let pk_ref = self.store.put(
            &ArtifactKey::ProvingKey {
                circuit_hash: compiled.hash.clone(),
            },
            &pk.blob,
        )?;

        tracing::info!(
            circuit = %compiled.hash,
            pk_bytes = pk.blob.len(),
            vk_bytes = vk.blob.len(),
            "key pair derived and persisted"
        );

        Ok((pk, vk, vk_ref, pk_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::content_hash;
    use crate::testutil::{public_settings, StubBackend};

    fn compiled() -> CompiledCircuit {
        let blob = b"compiled graph".to_vec();
        CompiledCircuit {
            hash: content_hash(&blob),
            settings: public_settings(7, 17),
            blob,
        }
    }

    fn srs(logrows: u32) -> Srs {
        Srs {
            logrows,
            scheme: "test-kzg".into(),
            blob: vec![0xAB; 256],
        }
    }

    fn stage(backend: StubBackend) -> (tempfile::TempDir, KeySetupStage, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let stage = KeySetupStage::new(Arc::new(backend), Arc::clone(&store));
        (dir, stage, store)
    }

    #[tokio::test]
    async fn test_undersized_srs_is_an_error() {
        let (_dir, stage, _store) = stage(StubBackend::new());
        match stage.setup(&compiled(), &srs(16)).await {
            Err(PipelineError::SrsSizeMismatch { required, provided }) => {
                assert_eq!((required, provided), (17, 16));
            }
            other => panic!("expected SrsSizeMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_srs_accepted() {
        let (_dir, stage, store) = stage(StubBackend::new());
        let compiled = compiled();
        let (pk, vk, vk_ref, pk_ref) = stage.setup(&compiled, &srs(18)).await.unwrap();
        assert_eq!(pk.circuit_hash, compiled.hash);
        assert_eq!(vk.circuit_hash, compiled.hash);
        // Both keys persisted, verifiable through the store.
        assert!(store.verify(&vk_ref.key, &vk_ref.sha256));
        assert!(store.verify(&pk_ref.key, &pk_ref.sha256));
    }

    #[tokio::test]
    async fn test_mismatched_key_circuit_rejected() {
        let (_dir, stage, store) =
            stage(StubBackend::new().with_key_hash_override("someone-elses-circuit"));
        let compiled = compiled();
        match stage.setup(&compiled, &srs(17)).await {
            Err(PipelineError::KeySetupFailed(_)) => {}
            other => panic!("expected KeySetupFailed, got {other:?}"),
        }
        // Nothing persisted on failure.
        assert!(!store.exists(&ArtifactKey::ProvingKey {
            circuit_hash: compiled.hash.clone(),
        }));
        assert!(!store.exists(&ArtifactKey::VerificationKey {
            circuit_hash: compiled.hash,
        }));
    }
}
