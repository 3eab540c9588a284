//! Session token issuance, admission, and retirement
//!
//! Per-token state machine: `Issued -> (N admitted requests) -> Expired |
//! Invalidated | Exhausted`. "One-time use" governs the issuance handshake:
//! the `used` flag flips exactly once on the first successful admission;
//! every later request is validated by nonce + counter, not re-issuance.

use crate::fingerprint::{DeviceFingerprintRegistry, DeviceId};
use crate::pattern::{ScramblePattern, ScramblePatternEngine};
use crate::{Result, ShroudError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    Issued,
    Expired,
    Invalidated,
    Exhausted,
}

/// One authenticated interaction window.
#[derive(Debug)]
pub struct SessionToken {
    pub token_id: Uuid,
    pub session_id: Uuid,
    pub device_id: DeviceId,
    pub device_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Issuance handshake consumed. Flips false -> true exactly once.
    pub used: bool,
    pub state: TokenState,
    pub pattern: ScramblePattern,
    pub request_counter: u64,
    /// Seeds retained so the pattern can evolve without re-contacting the
    /// registry.
    pub device_seed: [u8; 32],
    pub session_seed: u64,
    seen_nonces: HashSet<String>,
    nonce_order: VecDeque<String>,
    nonce_window: usize,
}

impl SessionToken {
    /// Record a nonce, evicting the oldest once the window is full.
    fn remember_nonce(&mut self, nonce: String) {
        if self.nonce_order.len() >= self.nonce_window {
            if let Some(evicted) = self.nonce_order.pop_front() {
                self.seen_nonces.remove(&evicted);
            }
        }
        self.seen_nonces.insert(nonce.clone());
        self.nonce_order.push_back(nonce);
    }

    fn has_seen(&self, nonce: &str) -> bool {
        self.seen_nonces.contains(nonce)
    }
}

/// Serializable form for the durability layer. Nonce window is deliberately
/// not persisted: a restored session starts with a fresh window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenRecord {
    pub token_id: Uuid,
    pub session_id: Uuid,
    pub device_id: DeviceId,
    pub device_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub state: TokenState,
    pub pattern: ScramblePattern,
    pub request_counter: u64,
    pub device_seed: [u8; 32],
    pub session_seed: u64,
}

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tolerated |now - request_timestamp| before an admission is rejected.
    pub clock_skew_tolerance: Duration,
    /// Anti-replay window size per token.
    pub nonce_window: usize,
    /// Requests after which a token is exhausted.
    pub max_requests: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock_skew_tolerance: Duration::from_secs(5),
            nonce_window: 1024,
            max_requests: 10_000,
        }
    }
}

/// Identifiers handed back to the caller at session start. The pattern never
/// leaves the manager.
#[derive(Debug, Clone, Copy)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates, and retires session tokens.
///
/// Tokens live behind per-token mutexes inside a concurrent map, so
/// admissions on different sessions never contend while nonce insertion and
/// counter increment on one token stay atomic together.
pub struct SessionTokenManager {
    registry: Arc<DeviceFingerprintRegistry>,
    tokens: DashMap<Uuid, Arc<Mutex<SessionToken>>>,
    config: SessionConfig,
}

impl SessionTokenManager {
    pub fn new(registry: Arc<DeviceFingerprintRegistry>, config: SessionConfig) -> Self {
        Self {
            registry,
            tokens: DashMap::new(),
            config,
        }
    }

    /// Issue a token bound to a registered device.
    pub fn issue(&self, device_id: DeviceId, ttl: Duration) -> Result<IssuedSession> {
        let fingerprint = self
            .registry
            .fingerprint(device_id)
            .ok_or_else(|| ShroudError::UnknownDevice(device_id.to_string()))?;

        let session_seed: u64 = rand::rng().random();
        let pattern = ScramblePatternEngine::derive(&fingerprint.scramble_seed, session_seed, 0);

        let now = Utc::now();
        let token = SessionToken {
            token_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            device_id,
            device_hash: fingerprint.device_hash,
            created_at: now,
            expires_at: now
                + ChronoDuration::from_std(ttl)
                    .map_err(|e| ShroudError::Other(format!("invalid ttl: {}", e)))?,
            used: false,
            state: TokenState::Issued,
            pattern,
            request_counter: 0,
            device_seed: fingerprint.scramble_seed,
            session_seed,
            seen_nonces: HashSet::new(),
            nonce_order: VecDeque::new(),
            nonce_window: self.config.nonce_window,
        };

        let issued = IssuedSession {
            session_id: token.session_id,
            token_id: token.token_id,
            expires_at: token.expires_at,
        };
        debug!(session = %issued.session_id, device = %device_id, "issued session token");
        self.tokens
            .insert(token.session_id, Arc::new(Mutex::new(token)));
        Ok(issued)
    }

    /// Validate one inbound request against the session's token.
    ///
    /// Expiry is checked lazily here, not by a background sweep. On success
    /// the nonce is recorded and the request counter incremented under the
    /// same lock.
    pub fn admit(&self, session_id: Uuid, nonce: &str, request_ts: DateTime<Utc>) -> Result<()> {
        let token = self.token(session_id)?;
        let mut token = token.lock();

        let now = Utc::now();

        match token.state {
            TokenState::Invalidated | TokenState::Exhausted | TokenState::Expired => {
                return Err(ShroudError::SessionExpired);
            }
            TokenState::Issued => {}
        }

        if now > token.expires_at {
            token.state = TokenState::Expired;
            return Err(ShroudError::SessionExpired);
        }

        if token.has_seen(nonce) {
            warn!(session = %session_id, "replayed nonce rejected");
            return Err(ShroudError::ReplayDetected);
        }

        let skew = (now - request_ts).num_milliseconds().unsigned_abs();
        if skew > self.config.clock_skew_tolerance.as_millis() as u64 {
            return Err(ShroudError::ClockSkew);
        }

        token.remember_nonce(nonce.to_string());
        token.request_counter += 1;
        if !token.used {
            // Issuance handshake consumed by the first admitted request.
            token.used = true;
        }

        if token.request_counter >= self.config.max_requests {
            token.state = TokenState::Exhausted;
        }

        Ok(())
    }

    /// Idempotently invalidate a session regardless of current state.
    pub fn invalidate(&self, session_id: Uuid) {
        if let Some(token) = self.tokens.get(&session_id) {
            let mut token = token.lock();
            if token.state != TokenState::Invalidated {
                warn!(session = %session_id, "session invalidated");
                token.state = TokenState::Invalidated;
            }
        }
    }

    /// Run `f` against the live token under its lock. Used by the
    /// orchestrator for pattern reads and evolution; `f` must not block.
    pub fn with_token<T>(
        &self,
        session_id: Uuid,
        f: impl FnOnce(&mut SessionToken) -> T,
    ) -> Result<T> {
        let token = self.token(session_id)?;
        let mut token = token.lock();
        Ok(f(&mut token))
    }

    /// Current scramble pattern for an active session.
    pub fn current_pattern(&self, session_id: Uuid) -> Result<ScramblePattern> {
        self.with_token(session_id, |token| {
            if token.state != TokenState::Issued || Utc::now() > token.expires_at {
                return Err(ShroudError::SessionExpired);
            }
            Ok(token.pattern.clone())
        })?
    }

    pub fn active_sessions(&self) -> usize {
        self.tokens
            .iter()
            .filter(|entry| {
                let token = entry.value().lock();
                token.state == TokenState::Issued && Utc::now() <= token.expires_at
            })
            .count()
    }

    pub fn export(&self) -> Vec<SessionTokenRecord> {
        self.tokens
            .iter()
            .map(|entry| {
                let token = entry.value().lock();
                SessionTokenRecord {
                    token_id: token.token_id,
                    session_id: token.session_id,
                    device_id: token.device_id,
                    device_hash: token.device_hash.clone(),
                    created_at: token.created_at,
                    expires_at: token.expires_at,
                    used: token.used,
                    state: token.state,
                    pattern: token.pattern.clone(),
                    request_counter: token.request_counter,
                    device_seed: token.device_seed,
                    session_seed: token.session_seed,
                }
            })
            .collect()
    }

    pub fn restore(&self, record: SessionTokenRecord) {
        let token = SessionToken {
            token_id: record.token_id,
            session_id: record.session_id,
            device_id: record.device_id,
            device_hash: record.device_hash,
            created_at: record.created_at,
            expires_at: record.expires_at,
            used: record.used,
            state: record.state,
            pattern: record.pattern,
            request_counter: record.request_counter,
            device_seed: record.device_seed,
            session_seed: record.session_seed,
            seen_nonces: HashSet::new(),
            nonce_order: VecDeque::new(),
            nonce_window: self.config.nonce_window,
        };
        self.tokens
            .insert(token.session_id, Arc::new(Mutex::new(token)));
    }

    fn token(&self, session_id: Uuid) -> Result<Arc<Mutex<SessionToken>>> {
        self.tokens
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or(ShroudError::SessionNotFound)
    }
}
