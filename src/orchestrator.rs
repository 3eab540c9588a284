//! Obfuscation orchestrator facade
//!
//! Composes the registry, session manager, pattern engine, scrambler,
//! analyzer, selector, and tracker into the three entry points the rest of
//! the system consumes: `protect_response`, `admit_request`, and the
//! privileged `godmode_dashboard`. Constructed explicitly and owned by the
//! caller; there is no ambient global instance.

use crate::analyzer::{
    screen_injection, ContentThreatAnalyzer, ContentThreatLevel, ContentType,
};
use crate::crypto::MasterKey;
use crate::fingerprint::{DeviceFingerprintRegistry, DeviceId, DeviceSignals};
use crate::mutation::{MutationPlan, MutationStrategySelector, PolicyContext};
use crate::oracle::ScoringOracle;
use crate::pattern::{PatternRef, ScramblePattern, ScramblePatternEngine};
use crate::scrambler::ContentScrambler;
use crate::session::{IssuedSession, SessionTokenManager, TokenState};
use crate::tracker::{AccessLevel, ConversationEntry, ConversationTracker};
use crate::persistence::SnapshotStore;
use crate::{Result, ShroudConfig, ShroudError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Scrambled output handed to the transport layer. Carries a pattern
/// reference, never the pattern itself.
#[derive(Debug, Clone)]
pub struct ScrambledContent {
    pub session_id: Uuid,
    pub data: Vec<u8>,
    pub pattern: PatternRef,
    pub plan: MutationPlan,
    pub threat_level: ContentThreatLevel,
}

/// Admitted request halves held until the matching response is recorded.
#[derive(Debug, Default)]
struct PendingRequest {
    scrambled: Vec<u8>,
    plaintext: String,
}

/// Aggregated state for the privileged inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub registered_devices: usize,
    pub active_sessions: usize,
    pub conversation_entries: usize,
    pub total_scrambles: u64,
    pub blocked_injections: u64,
    pub blocked_thefts: u64,
}

pub struct ObfuscationOrchestrator {
    registry: Arc<DeviceFingerprintRegistry>,
    sessions: SessionTokenManager,
    engine: ScramblePatternEngine,
    analyzer: ContentThreatAnalyzer,
    tracker: ConversationTracker,
    config: ShroudConfig,
    /// `None` when no admin token is configured; godmode is then disabled.
    admin_token_hash: Option<[u8; 32]>,
    /// Admitted inbound request awaiting its response half of the exchange.
    pending_requests: DashMap<Uuid, PendingRequest>,
    /// Consecutive clock-skew failures per session.
    skew_strikes: DashMap<Uuid, u32>,
    total_scrambles: AtomicU64,
    blocked_injections: AtomicU64,
    blocked_thefts: AtomicU64,
}

impl ObfuscationOrchestrator {
    pub fn new(
        config: ShroudConfig,
        oracle: Arc<dyn ScoringOracle>,
        master_key: MasterKey,
    ) -> Self {
        let registry = Arc::new(DeviceFingerprintRegistry::new());
        let sessions = SessionTokenManager::new(registry.clone(), config.session.clone());
        let engine = ScramblePatternEngine::new(config.engine.clone());
        let analyzer = ContentThreatAnalyzer::new(oracle, config.analyzer.clone());
        let tracker = ConversationTracker::new(master_key, config.tracker.clone());
        let admin_token_hash =
            (!config.admin_token.is_empty()).then(|| hash_token(&config.admin_token));

        Self {
            registry,
            sessions,
            engine,
            analyzer,
            tracker,
            config,
            admin_token_hash,
            pending_requests: DashMap::new(),
            skew_strikes: DashMap::new(),
            total_scrambles: AtomicU64::new(0),
            blocked_injections: AtomicU64::new(0),
            blocked_thefts: AtomicU64::new(0),
        }
    }

    /// Capture + register in one step.
    pub fn register_device(&self, signals: &DeviceSignals) -> Result<DeviceId> {
        let fingerprint = DeviceFingerprintRegistry::capture(signals)?;
        Ok(self.registry.register(fingerprint))
    }

    /// Open a session for a registered device using the configured TTL.
    pub fn open_session(&self, device_id: DeviceId) -> Result<IssuedSession> {
        self.sessions.issue(device_id, self.config.session_ttl)
    }

    pub fn registry(&self) -> &DeviceFingerprintRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTokenManager {
        &self.sessions
    }

    /// Protect an outbound response: analyze, mutate per policy, scramble
    /// with the session's current pattern, and record the exchange.
    ///
    /// The oracle round trip happens before any session lock is taken.
    pub async fn protect_response(
        &self,
        session_id: Uuid,
        content: &str,
        content_type: ContentType,
        policy: &PolicyContext,
        store_plain: bool,
    ) -> Result<ScrambledContent> {
        if store_plain && !policy.admin_override {
            return Err(ShroudError::PermissionDenied);
        }

        // Fail fast on a dead session before paying for the oracle.
        self.sessions.current_pattern(session_id)?;

        let analysis = self.analyzer.analyze(content, content_type).await;
        let plan = MutationStrategySelector::select(&analysis, policy);

        if plan == MutationPlan::CompleteRedaction {
            info!(session = %session_id, level = ?analysis.threat_level, "content redacted");
        }

        // Evolution and the pattern read happen atomically under the token
        // lock; the closure stays free of blocking calls.
        let (pattern, device_hash) = self.evolve_if_due(session_id)?;

        let noise_seed = pattern.xor_seed ^ pattern.evolution;
        let mutated = MutationStrategySelector::apply(&plan, content, noise_seed);

        let scrambled = match content_type {
            ContentType::Binary => ContentScrambler::scramble_bytes(mutated.as_bytes(), &pattern),
            _ => ContentScrambler::scramble_text(&mutated, &pattern),
        };

        let pending = self
            .pending_requests
            .remove(&session_id)
            .map(|(_, pending)| pending)
            .unwrap_or_default();

        self.tracker.record(
            session_id,
            &device_hash,
            &pending.scrambled,
            &scrambled,
            pattern.as_ref(),
            store_plain.then_some((pending.plaintext.as_str(), content)),
        )?;

        self.total_scrambles.fetch_add(1, Ordering::Relaxed);

        Ok(ScrambledContent {
            session_id,
            data: scrambled,
            pattern: pattern.as_ref(),
            plan,
            threat_level: analysis.threat_level,
        })
    }

    /// Admit an inbound request: validate the token, descramble, and screen
    /// the plaintext for injection markers.
    ///
    /// Repeated anomalies are treated as a theft/tamper signal: a replay
    /// invalidates the session immediately, and the third consecutive
    /// clock-skew failure does the same.
    pub fn admit_request(
        &self,
        session_id: Uuid,
        payload: &[u8],
        nonce: &str,
        request_ts: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        match self.sessions.admit(session_id, nonce, request_ts) {
            Ok(()) => {
                self.skew_strikes.remove(&session_id);
            }
            Err(ShroudError::ReplayDetected) => {
                warn!(session = %session_id, "replay detected; invalidating session");
                self.blocked_injections.fetch_add(1, Ordering::Relaxed);
                self.retire_session(session_id);
                return Err(ShroudError::ReplayDetected);
            }
            Err(ShroudError::ClockSkew) => {
                let strikes = {
                    let mut entry = self.skew_strikes.entry(session_id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if strikes >= self.config.skew_strike_limit {
                    warn!(session = %session_id, strikes, "clock-skew limit hit; invalidating session");
                    self.blocked_thefts.fetch_add(1, Ordering::Relaxed);
                    self.retire_session(session_id);
                }
                return Err(ShroudError::ClockSkew);
            }
            Err(other) => return Err(other),
        }

        let pattern = self
            .sessions
            .with_token(session_id, |token| token.pattern.clone())?;

        // Text payloads are screened for injection; payloads that do not
        // descramble to UTF-8 are returned as raw bytes.
        let plaintext = match ContentScrambler::descramble_text(payload, &pattern) {
            Ok(text) => {
                if let Some(category) = screen_injection(&text) {
                    warn!(session = %session_id, category, "injection attempt blocked");
                    self.blocked_injections.fetch_add(1, Ordering::Relaxed);
                    return Err(ShroudError::InjectionDetected(category.to_string()));
                }
                text.into_bytes()
            }
            Err(_) => ContentScrambler::descramble_bytes(payload, &pattern),
        };

        self.pending_requests.insert(
            session_id,
            PendingRequest {
                scrambled: payload.to_vec(),
                plaintext: String::from_utf8_lossy(&plaintext).into_owned(),
            },
        );
        Ok(plaintext)
    }

    /// Privileged inspection surface.
    pub fn godmode_dashboard(&self, admin_token: &str) -> Result<Dashboard> {
        self.require_admin(admin_token)?;

        Ok(Dashboard {
            registered_devices: self.registry.len(),
            active_sessions: self.sessions.active_sessions(),
            conversation_entries: self.tracker.len(),
            total_scrambles: self.total_scrambles.load(Ordering::Relaxed),
            blocked_injections: self.blocked_injections.load(Ordering::Relaxed),
            blocked_thefts: self.blocked_thefts.load(Ordering::Relaxed),
        })
    }

    /// Privileged conversation history for one session.
    pub fn godmode_history(
        &self,
        admin_token: &str,
        session_id: Uuid,
    ) -> Result<Vec<Arc<ConversationEntry>>> {
        self.require_admin(admin_token)?;
        self.tracker.history(session_id, AccessLevel::Godmode)
    }

    /// Retention cleanup pass; intended for a periodic timer. Also drops
    /// per-session bookkeeping for sessions that are no longer live.
    pub fn cleanup(&self) -> usize {
        self.pending_requests
            .retain(|id, _| self.session_is_live(*id));
        self.skew_strikes.retain(|id, _| self.session_is_live(*id));
        self.tracker.cleanup()
    }

    /// Persist devices and sessions through the durability layer.
    pub async fn save_snapshot(&self, path: PathBuf, key: MasterKey) -> Result<()> {
        let store = SnapshotStore::new(path, key);
        store
            .save(self.registry.export(), self.sessions.export())
            .await
    }

    /// Restore devices and sessions from a snapshot. In-memory state remains
    /// authoritative from this point on.
    pub async fn load_snapshot(&self, path: PathBuf, key: MasterKey) -> Result<()> {
        let store = SnapshotStore::new(path, key);
        let snapshot = store.load().await?;
        for record in snapshot.devices {
            self.registry.restore(record.id, record.fingerprint);
        }
        for record in snapshot.sessions {
            self.sessions.restore(record);
        }
        Ok(())
    }

    /// Invalidate a session and drop its per-session bookkeeping.
    fn retire_session(&self, session_id: Uuid) {
        self.sessions.invalidate(session_id);
        self.pending_requests.remove(&session_id);
        self.skew_strikes.remove(&session_id);
    }

    fn session_is_live(&self, session_id: Uuid) -> bool {
        self.sessions
            .with_token(session_id, |token| {
                token.state == TokenState::Issued && Utc::now() <= token.expires_at
            })
            .unwrap_or(false)
    }

    fn evolve_if_due(&self, session_id: Uuid) -> Result<(ScramblePattern, String)> {
        let engine = &self.engine;
        self.sessions.with_token(session_id, |token| {
            if token.state != TokenState::Issued || Utc::now() > token.expires_at {
                return Err(ShroudError::SessionExpired);
            }
            if engine.should_evolve(token) {
                let next = ScramblePatternEngine::evolve(
                    &token.device_seed,
                    token.session_seed,
                    &token.pattern,
                );
                info!(session = %session_id, evolution = next.evolution, "pattern evolved");
                token.pattern = next;
            }
            Ok((token.pattern.clone(), token.device_hash.clone()))
        })?
    }

    /// Hash-compare the admin token so the comparison cost does not depend
    /// on the match prefix. Denial never reveals anything further, and an
    /// unconfigured token denies everything.
    fn require_admin(&self, admin_token: &str) -> Result<()> {
        match self.admin_token_hash {
            Some(expected) if hash_token(admin_token) == expected => Ok(()),
            _ => Err(ShroudError::PermissionDenied),
        }
    }
}

fn hash_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"shroud/admin-token/v1\n");
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}
