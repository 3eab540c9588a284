//! Append-only audit trail of scrambled exchanges

use crate::crypto::MasterKey;
use crate::pattern::PatternRef;
use crate::{Result, ShroudError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Requester privilege for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Standard,
    Godmode,
}

/// Plaintext forms sealed under the master key. Present only when a
/// privileged caller explicitly opted in at record time.
#[derive(Debug, Clone)]
pub struct SealedExchange {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

impl SealedExchange {
    pub fn open(&self, key: &MasterKey) -> Result<(String, String)> {
        let req = key.open(&self.request)?;
        let resp = key.open(&self.response)?;
        Ok((
            String::from_utf8_lossy(&req).into_owned(),
            String::from_utf8_lossy(&resp).into_owned(),
        ))
    }
}

/// One audited exchange. Never mutated after append; holds back-references
/// (session/device ids) only, never owning session state.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub session_id: Uuid,
    pub device_hash: String,
    pub scrambled_request: Vec<u8>,
    pub scrambled_response: Vec<u8>,
    pub pattern: PatternRef,
    pub recorded_at: DateTime<Utc>,
    pub sealed_plain: Option<SealedExchange>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Entries older than this are removed by `cleanup`.
    pub retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Append-only, privileged-readable conversation log.
pub struct ConversationTracker {
    entries: RwLock<Vec<Arc<ConversationEntry>>>,
    master_key: MasterKey,
    config: TrackerConfig,
}

impl ConversationTracker {
    pub fn new(master_key: MasterKey, config: TrackerConfig) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            master_key,
            config,
        }
    }

    /// Append one exchange. The entry is fully constructed (including
    /// sealing) before it becomes visible, so a concurrent `cleanup` can
    /// never observe it half-built.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        session_id: Uuid,
        device_hash: &str,
        scrambled_request: &[u8],
        scrambled_response: &[u8],
        pattern: PatternRef,
        plain: Option<(&str, &str)>,
    ) -> Result<()> {
        let sealed_plain = match plain {
            Some((req, resp)) => Some(SealedExchange {
                request: self.master_key.seal(req.as_bytes())?,
                response: self.master_key.seal(resp.as_bytes())?,
            }),
            None => None,
        };

        let entry = Arc::new(ConversationEntry {
            session_id,
            device_hash: device_hash.to_string(),
            scrambled_request: scrambled_request.to_vec(),
            scrambled_response: scrambled_response.to_vec(),
            pattern,
            recorded_at: Utc::now(),
            sealed_plain,
        });

        self.entries.write().push(entry);
        Ok(())
    }

    /// History for a session. Non-privileged callers are refused outright:
    /// never a redacted result, and never a hint whether the session exists.
    pub fn history(
        &self,
        session_id: Uuid,
        requester: AccessLevel,
    ) -> Result<Vec<Arc<ConversationEntry>>> {
        if requester != AccessLevel::Godmode {
            return Err(ShroudError::PermissionDenied);
        }

        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    /// Remove entries older than the retention window. Safe to run
    /// concurrently with `record`.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(1));

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.recorded_at >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "conversation retention cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternRef;

    fn tracker() -> ConversationTracker {
        ConversationTracker::new(MasterKey::from_bytes([9u8; 32]), TrackerConfig::default())
    }

    fn pattern_ref() -> PatternRef {
        PatternRef {
            algorithm_id: 1,
            evolution: 0,
        }
    }

    #[test]
    fn history_requires_godmode() {
        let tracker = tracker();
        let session = Uuid::new_v4();
        tracker
            .record(session, "hash", b"req", b"resp", pattern_ref(), None)
            .unwrap();

        assert!(matches!(
            tracker.history(session, AccessLevel::Standard),
            Err(ShroudError::PermissionDenied)
        ));
        assert_eq!(tracker.history(session, AccessLevel::Godmode).unwrap().len(), 1);
    }

    #[test]
    fn missing_session_indistinguishable_for_standard_callers() {
        let tracker = tracker();
        // Same error whether or not the session has entries.
        assert!(matches!(
            tracker.history(Uuid::new_v4(), AccessLevel::Standard),
            Err(ShroudError::PermissionDenied)
        ));
    }

    #[test]
    fn sealed_plaintext_round_trip() {
        let key = MasterKey::from_bytes([9u8; 32]);
        let tracker = ConversationTracker::new(key.clone(), TrackerConfig::default());
        let session = Uuid::new_v4();
        tracker
            .record(
                session,
                "hash",
                b"scrambled-req",
                b"scrambled-resp",
                pattern_ref(),
                Some(("plain request", "plain response")),
            )
            .unwrap();

        let history = tracker.history(session, AccessLevel::Godmode).unwrap();
        let sealed = history[0].sealed_plain.as_ref().unwrap();
        let (req, resp) = sealed.open(&key).unwrap();
        assert_eq!(req, "plain request");
        assert_eq!(resp, "plain response");
    }

    #[test]
    fn cleanup_removes_expired_entries() {
        let tracker = ConversationTracker::new(
            MasterKey::from_bytes([9u8; 32]),
            TrackerConfig {
                retention: Duration::from_millis(10),
            },
        );
        let session = Uuid::new_v4();
        tracker
            .record(session, "hash", b"r", b"s", pattern_ref(), None)
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(tracker.cleanup(), 1);
        assert!(tracker.is_empty());
    }
}
