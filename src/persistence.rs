//! Encrypted snapshot persistence for devices and sessions
//!
//! Durability layer only: the in-memory registries stay authoritative for
//! every authorization decision. A snapshot is an AES-GCM-sealed JSON dump
//! written through `tokio::fs`.

use crate::crypto::MasterKey;
use crate::fingerprint::{DeviceFingerprint, DeviceId};
use crate::session::SessionTokenRecord;
use crate::{Result, ShroudError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub fingerprint: DeviceFingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub devices: Vec<DeviceRecord>,
    pub sessions: Vec<SessionTokenRecord>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Sealed snapshot file store.
pub struct SnapshotStore {
    path: PathBuf,
    key: MasterKey,
}

impl SnapshotStore {
    pub fn new(path: PathBuf, key: MasterKey) -> Self {
        Self { path, key }
    }

    /// Store using key material supplied by the vault environment.
    pub fn from_vault_env(path: PathBuf) -> Result<Self> {
        Ok(Self::new(path, MasterKey::from_vault_env()?))
    }

    pub async fn save(
        &self,
        devices: Vec<(DeviceId, DeviceFingerprint)>,
        sessions: Vec<SessionTokenRecord>,
    ) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            devices: devices
                .into_iter()
                .map(|(id, fingerprint)| DeviceRecord { id, fingerprint })
                .collect(),
            sessions,
            created_at: chrono::Utc::now(),
        };

        let json = serde_json::to_vec(&snapshot)?;
        let sealed = self.key.seal(&json)?;

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(&sealed).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Load a snapshot. A missing file yields an empty snapshot.
    pub async fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot {
                version: SNAPSHOT_VERSION,
                devices: Vec::new(),
                sessions: Vec::new(),
                created_at: chrono::Utc::now(),
            });
        }

        let mut file = fs::File::open(&self.path).await?;
        let mut sealed = Vec::new();
        file.read_to_end(&mut sealed).await?;

        let json = self.key.open(&sealed)?;
        let snapshot: Snapshot = serde_json::from_slice(&json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ShroudError::Storage(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}
