//! Device fingerprint capture and registration

use crate::{Result, ShroudError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Minimum number of signal fields required before a fingerprint is derivable.
/// Fewer than this and the fingerprint would be trivially forgeable.
pub const MIN_SIGNAL_QUORUM: usize = 4;

/// Domain tags keep the identity hash and the scramble seed independent.
const HASH_DOMAIN: &[u8] = b"shroud/device-hash/v1\n";
const SEED_DOMAIN: &[u8] = b"shroud/scramble-seed/v1\n";

/// Stable identifier assigned to a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bag of raw client/device signals (hardware hints, display, locale,
/// canvas/GPU/audio hash fragments, network hints).
///
/// A `BTreeMap` keeps the encoding canonical so hashing is order-independent
/// of insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignals {
    fields: BTreeMap<String, String>,
}

impl DeviceSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical byte encoding used for both hash derivations.
    fn canonical(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in &self.fields {
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// Immutable snapshot derived from a signal bag.
///
/// Superseded, never mutated, when signals drift: verification is an exact
/// hash compare and any drift requires explicit re-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub device_hash: String,
    pub scramble_seed: [u8; 32],
    pub captured_at: DateTime<Utc>,
}

/// Registry mapping device hashes to stable ids.
pub struct DeviceFingerprintRegistry {
    by_hash: DashMap<String, DeviceId>,
    fingerprints: DashMap<DeviceId, DeviceFingerprint>,
}

impl Default for DeviceFingerprintRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFingerprintRegistry {
    pub fn new() -> Self {
        Self {
            by_hash: DashMap::new(),
            fingerprints: DashMap::new(),
        }
    }

    /// Derive a fingerprint from a signal bag. Pure; fails below the quorum.
    pub fn capture(signals: &DeviceSignals) -> Result<DeviceFingerprint> {
        if signals.len() < MIN_SIGNAL_QUORUM {
            return Err(ShroudError::InvalidSignals(format!(
                "{} signal fields present, {} required",
                signals.len(),
                MIN_SIGNAL_QUORUM
            )));
        }

        let canonical = signals.canonical();

        let mut hasher = Sha256::new();
        hasher.update(HASH_DOMAIN);
        hasher.update(&canonical);
        let device_hash = hex::encode(hasher.finalize());

        // Separate domain: the seed must not be recoverable from the identity
        // hash, nor reversible to the raw signals.
        let mut hasher = Sha256::new();
        hasher.update(SEED_DOMAIN);
        hasher.update(&canonical);
        let scramble_seed: [u8; 32] = hasher.finalize().into();

        Ok(DeviceFingerprint {
            device_hash,
            scramble_seed,
            captured_at: Utc::now(),
        })
    }

    /// Register a fingerprint. Idempotent: a hash collision with a known
    /// device returns the existing id.
    pub fn register(&self, fingerprint: DeviceFingerprint) -> DeviceId {
        if let Some(existing) = self.by_hash.get(&fingerprint.device_hash) {
            return *existing;
        }

        let id = DeviceId::new();
        self.by_hash.insert(fingerprint.device_hash.clone(), id);
        debug!(device = %id, "registered device fingerprint");
        self.fingerprints.insert(id, fingerprint);
        id
    }

    /// Exact-match verification. No fuzzy matching: signal drift requires
    /// re-registration through an explicit re-verification flow.
    pub fn verify(&self, device_id: DeviceId, fingerprint: &DeviceFingerprint) -> bool {
        self.fingerprints
            .get(&device_id)
            .map(|known| known.device_hash == fingerprint.device_hash)
            .unwrap_or(false)
    }

    pub fn fingerprint(&self, device_id: DeviceId) -> Option<DeviceFingerprint> {
        self.fingerprints.get(&device_id).map(|f| f.clone())
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.fingerprints.contains_key(&device_id)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Snapshot of all registered fingerprints, for the durability layer.
    pub fn export(&self) -> Vec<(DeviceId, DeviceFingerprint)> {
        self.fingerprints
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Restore a previously exported registration.
    pub fn restore(&self, id: DeviceId, fingerprint: DeviceFingerprint) {
        self.by_hash.insert(fingerprint.device_hash.clone(), id);
        self.fingerprints.insert(id, fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signals() -> DeviceSignals {
        DeviceSignals::new()
            .with("hw.cores", "8")
            .with("display", "2560x1440x2")
            .with("locale", "en-GB")
            .with("canvas", "9f2ac1")
            .with("gpu", "a77b03")
            .with("audio", "31c5de")
    }

    #[test]
    fn capture_requires_quorum() {
        let thin = DeviceSignals::new().with("locale", "en-GB").with("hw.cores", "8");
        assert!(matches!(
            DeviceFingerprintRegistry::capture(&thin),
            Err(ShroudError::InvalidSignals(_))
        ));
    }

    #[test]
    fn capture_is_deterministic() {
        let a = DeviceFingerprintRegistry::capture(&sample_signals()).unwrap();
        let b = DeviceFingerprintRegistry::capture(&sample_signals()).unwrap();
        assert_eq!(a.device_hash, b.device_hash);
        assert_eq!(a.scramble_seed, b.scramble_seed);
    }

    #[test]
    fn seed_differs_from_hash() {
        let fp = DeviceFingerprintRegistry::capture(&sample_signals()).unwrap();
        assert_ne!(hex::encode(fp.scramble_seed), fp.device_hash);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = DeviceFingerprintRegistry::new();
        let fp = DeviceFingerprintRegistry::capture(&sample_signals()).unwrap();
        let first = registry.register(fp.clone());
        let second = registry.register(fp);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn verify_rejects_drift() {
        let registry = DeviceFingerprintRegistry::new();
        let fp = DeviceFingerprintRegistry::capture(&sample_signals()).unwrap();
        let id = registry.register(fp.clone());
        assert!(registry.verify(id, &fp));

        let drifted_signals = sample_signals().with("locale", "fr-FR");
        let drifted = DeviceFingerprintRegistry::capture(&drifted_signals).unwrap();
        assert!(!registry.verify(id, &drifted));
    }
}
