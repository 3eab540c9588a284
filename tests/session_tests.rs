//! Session token admission tests, including the threading guarantees

use chrono::Utc;
use shroud_core::{
    DeviceFingerprintRegistry, DeviceId, DeviceSignals, SessionConfig, SessionTokenManager,
    ShroudError,
};
use std::sync::Arc;
use std::time::Duration;

fn registered_manager() -> (Arc<SessionTokenManager>, DeviceId) {
    let registry = Arc::new(DeviceFingerprintRegistry::new());
    let signals = DeviceSignals::new()
        .with("hw.cores", "8")
        .with("hw.memory", "16384")
        .with("display", "2560x1440x2")
        .with("locale", "en-US")
        .with("canvas", "1f9a3c")
        .with("gpu", "77ab02");
    let fingerprint = DeviceFingerprintRegistry::capture(&signals).unwrap();
    let device_id = registry.register(fingerprint);
    let manager = Arc::new(SessionTokenManager::new(registry, SessionConfig::default()));
    (manager, device_id)
}

#[test]
fn register_with_six_signals_is_idempotent() {
    let registry = DeviceFingerprintRegistry::new();
    let signals = DeviceSignals::new()
        .with("hw.cores", "8")
        .with("hw.memory", "16384")
        .with("display", "2560x1440x2")
        .with("locale", "en-US")
        .with("canvas", "1f9a3c")
        .with("gpu", "77ab02");

    let first = registry.register(DeviceFingerprintRegistry::capture(&signals).unwrap());
    let second = registry.register(DeviceFingerprintRegistry::capture(&signals).unwrap());
    assert_eq!(first, second);
}

#[test]
fn expired_token_rejects_admission() {
    let (manager, device_id) = registered_manager();
    let issued = manager.issue(device_id, Duration::from_secs(1)).unwrap();

    std::thread::sleep(Duration::from_secs(2));

    let err = manager
        .admit(issued.session_id, "nonce-1", Utc::now())
        .unwrap_err();
    assert!(matches!(err, ShroudError::SessionExpired));
}

#[test]
fn one_admission_per_nonce_across_threads() {
    let (manager, device_id) = registered_manager();
    let issued = manager.issue(device_id, Duration::from_secs(60)).unwrap();
    let session_id = issued.session_id;

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            std::thread::spawn(move || manager.admit(session_id, "shared-nonce", Utc::now()))
        })
        .collect();

    let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let replays = results
        .iter()
        .filter(|r| matches!(r, Err(ShroudError::ReplayDetected)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(replays, 7);
}

#[test]
fn distinct_sessions_admit_concurrently() {
    let (manager, device_id) = registered_manager();
    let sessions: Vec<_> = (0..4)
        .map(|_| manager.issue(device_id, Duration::from_secs(60)).unwrap())
        .collect();

    let threads: Vec<_> = sessions
        .iter()
        .map(|issued| {
            let manager = manager.clone();
            let session_id = issued.session_id;
            std::thread::spawn(move || {
                for i in 0..50 {
                    manager
                        .admit(session_id, &format!("n-{}", i), Utc::now())
                        .unwrap();
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    for issued in &sessions {
        let counter = manager
            .with_token(issued.session_id, |t| t.request_counter)
            .unwrap();
        assert_eq!(counter, 50);
    }
}

#[test]
fn counters_drive_pattern_evolution_signal() {
    use shroud_core::{EngineConfig, ScramblePatternEngine};

    let (manager, device_id) = registered_manager();
    let issued = manager.issue(device_id, Duration::from_secs(60)).unwrap();
    let engine = ScramblePatternEngine::new(EngineConfig {
        evolve_every: 10,
        evolve_interval: Duration::from_secs(3600),
    });

    for i in 0..9 {
        manager
            .admit(issued.session_id, &format!("n-{}", i), Utc::now())
            .unwrap();
    }
    assert!(!manager
        .with_token(issued.session_id, |t| engine.should_evolve(t))
        .unwrap());

    manager.admit(issued.session_id, "n-9", Utc::now()).unwrap();
    assert!(manager
        .with_token(issued.session_id, |t| engine.should_evolve(t))
        .unwrap());
}
