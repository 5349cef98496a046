use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ratekeeper::clock::ManualClock;
use ratekeeper::config::{LimiterConfig, UnknownKeyPolicy};
use ratekeeper::ratelimit::{ClientKey, Decision, RateLimiter, RulesConfig, WindowMode};

const MODES: [WindowMode; 2] = [WindowMode::Sliding, WindowMode::Fixed];

fn limiter(mode: WindowMode) -> (Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_mode(mode).with_clock(clock.clone()));
    (limiter, clock)
}

#[test]
fn burst_admits_exactly_the_limit() {
    for mode in MODES {
        let (limiter, clock) = limiter(mode);
        limiter.set_limit("k", 5, Duration::from_secs(1)).unwrap();

        let admitted = (0..12).filter(|_| limiter.allow("k")).count();
        assert_eq!(admitted, 5, "{mode:?}");

        // Everything up to (but excluding) t0 + W stays denied.
        for step in [1, 498, 500] {
            clock.advance(Duration::from_millis(step));
            assert!(!limiter.allow("k"), "{mode:?} at {:?}", clock.elapsed());
        }
    }
}

#[test]
fn window_rollover_restores_full_quota() {
    for mode in MODES {
        let (limiter, clock) = limiter(mode);
        limiter.set_limit("k", 3, Duration::from_millis(500)).unwrap();

        for _ in 0..3 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));

        clock.advance(Duration::from_millis(500));
        let admitted = (0..10).filter(|_| limiter.allow("k")).count();
        assert_eq!(admitted, 3, "{mode:?}");
    }
}

#[test]
fn sliding_window_counts_trailing_requests_only() {
    let (limiter, clock) = limiter(WindowMode::Sliding);
    limiter.set_limit("k", 2, Duration::from_secs(1)).unwrap();

    assert!(limiter.allow("k"));
    clock.advance(Duration::from_millis(600));
    assert!(limiter.allow("k"));
    assert!(!limiter.allow("k"));

    // The first request expires at 1000ms, the second is still counted.
    clock.advance(Duration::from_millis(400));
    assert!(limiter.allow("k"));
    assert!(!limiter.allow("k"));

    let decision = limiter.check(&ClientKey::new("k")).unwrap();
    assert_eq!(
        decision,
        Decision::Denied {
            retry_after: Duration::from_millis(600)
        }
    );
}

#[test]
fn concurrent_callers_admit_exactly_the_limit() {
    for mode in MODES {
        let (limiter, _) = limiter(mode);
        limiter.set_limit("c2", 2, Duration::from_millis(500)).unwrap();

        let barrier = Arc::new(Barrier::new(20));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    limiter.allow("c2")
                })
            })
            .collect();

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 2, "{mode:?}");
        assert_eq!(results.iter().filter(|ok| !**ok).count(), 18, "{mode:?}");
    }
}

#[test]
fn concurrent_callers_across_many_keys() {
    let (limiter, _) = limiter(WindowMode::Sliding);
    for i in 0..8 {
        limiter
            .set_limit(&format!("key-{i}"), 25, Duration::from_secs(1))
            .unwrap();
    }

    let handles: Vec<_> = (0..32)
        .map(|t| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let key = format!("key-{}", t % 8);
                (0..20).filter(|_| limiter.allow(&key)).count()
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 8 * 25);
    for i in 0..8 {
        assert_eq!(limiter.usage(&ClientKey::new(format!("key-{i}"))), Some(25));
    }
}

#[test]
fn keys_are_isolated() {
    let (limiter, _) = limiter(WindowMode::Sliding);
    limiter.set_limit("a", 1, Duration::from_secs(1)).unwrap();
    limiter.set_limit("b", 3, Duration::from_secs(1)).unwrap();

    assert!(limiter.allow("a"));
    for _ in 0..10 {
        limiter.allow("b");
    }

    assert!(!limiter.allow("a"));
    assert_eq!(limiter.usage(&ClientKey::new("a")), Some(1));
    assert_eq!(limiter.usage(&ClientKey::new("b")), Some(3));

    limiter.reset(&ClientKey::new("b"));
    assert_eq!(limiter.usage(&ClientKey::new("a")), Some(1));
}

#[test]
fn raising_limit_mid_window_admits_up_to_new_limit() {
    for mode in MODES {
        let (limiter, _) = limiter(mode);
        limiter.set_limit("c3", 5, Duration::from_secs(1)).unwrap();
        assert!(limiter.allow("c3"));
        assert!(limiter.allow("c3"));

        limiter.set_limit("c3", 10, Duration::from_secs(1)).unwrap();
        let more = (0..20).filter(|_| limiter.allow("c3")).count();
        assert_eq!(more, 8, "{mode:?}");
    }
}

#[test]
fn lowering_limit_does_not_unadmit() {
    let (limiter, _) = limiter(WindowMode::Sliding);
    limiter.set_limit("k", 10, Duration::from_secs(1)).unwrap();
    for _ in 0..6 {
        assert!(limiter.allow("k"));
    }

    limiter.set_limit("k", 3, Duration::from_secs(1)).unwrap();
    assert!(!limiter.allow("k"));
    assert_eq!(limiter.usage(&ClientKey::new("k")), Some(6));
}

#[test]
fn reset_readmits_exhausted_key() {
    for mode in MODES {
        let (limiter, _) = limiter(mode);
        limiter.set_limit("k", 2, Duration::from_secs(60)).unwrap();
        limiter.allow("k");
        limiter.allow("k");
        assert!(!limiter.allow("k"));

        limiter.reset(&ClientKey::new("k"));
        assert!(limiter.allow("k"), "{mode:?}");
        assert_eq!(limiter.get_limit("k").unwrap().max_requests, 2);
    }
}

#[test]
fn unknown_keys_follow_policy_consistently() {
    let (open, _) = limiter(WindowMode::Sliding);
    assert!((0..50).all(|_| open.allow("unknown")));

    let closed = RateLimiter::with_config(&LimiterConfig {
        unknown_key_policy: UnknownKeyPolicy::Reject,
        ..LimiterConfig::default()
    })
    .unwrap();
    assert!((0..50).all(|_| !closed.allow("unknown")));
    assert_eq!(
        closed.check(&ClientKey::new("unknown")).unwrap(),
        Decision::Unconfigured
    );
}

#[test]
fn per_resource_limits_are_tracked_per_client() {
    let (limiter, _) = limiter(WindowMode::Fixed);
    let rules = RulesConfig::from_yaml(
        r#"
limits:
  - key: "*/upload"
    requests_per_unit: 1
    unit: minute
  - key: alice/upload
    requests_per_unit: 3
    unit: minute
"#,
    )
    .unwrap();
    limiter.load_rules(&rules).unwrap();

    assert_eq!((0..5).filter(|_| limiter.allow_resource("bob", "upload")).count(), 1);
    assert_eq!((0..5).filter(|_| limiter.allow_resource("carol", "upload")).count(), 1);
    assert_eq!((0..5).filter(|_| limiter.allow_resource("alice", "upload")).count(), 3);

    // Other resources of the same client are unaffected.
    assert!(limiter.allow_resource("bob", "download"));
    assert_eq!(limiter.reset_client("bob"), 1);
    assert!(limiter.allow_resource("bob", "upload"));
}

#[test]
fn resource_limits_do_not_leak_into_client_keys() {
    let (limiter, _) = limiter(WindowMode::Sliding);
    limiter.set_limit("*/search", 1, Duration::from_secs(60)).unwrap();
    limiter.set_limit("alice/search", 2, Duration::from_secs(60)).unwrap();

    // A client that happens to share the resource's name is unconfigured.
    assert_eq!((0..5).filter(|_| limiter.allow("search")).count(), 5);

    // A client id spelled like a composite key never reaches that limit.
    assert_eq!((0..5).filter(|_| limiter.allow("alice/search")).count(), 0);
    assert_eq!(
        (0..5).filter(|_| limiter.allow_resource("alice", "search")).count(),
        2
    );
    assert_eq!(limiter.tracked_count(), 1);
}

#[test]
fn sweep_after_raising_window_keeps_live_requests() {
    for mode in MODES {
        let (limiter, clock) = limiter(mode);
        limiter.set_limit("k", 1, Duration::from_secs(1)).unwrap();
        assert!(limiter.allow("k"));

        limiter.set_limit("k", 1, Duration::from_secs(10)).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.sweep(), 0, "{mode:?}");
        assert!(!limiter.allow("k"), "{mode:?}");

        // Idle long enough under the raised window: state goes, quota returns.
        clock.advance(Duration::from_secs(20));
        assert_eq!(limiter.sweep(), 1, "{mode:?}");
        assert!(limiter.allow("k"), "{mode:?}");
    }
}

#[test]
fn inline_sweep_after_raising_window_keeps_live_requests() {
    for mode in MODES {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_config(&LimiterConfig {
            window_mode: mode,
            inline_sweep_every: 1,
            ..LimiterConfig::default()
        })
        .unwrap()
        .with_clock(clock.clone());
        limiter.set_limit("k", 1, Duration::from_secs(1)).unwrap();
        limiter.set_limit("other", 100, Duration::from_secs(1)).unwrap();
        assert!(limiter.allow("k"));

        limiter.set_limit("k", 1, Duration::from_secs(10)).unwrap();
        clock.advance(Duration::from_secs(2));

        // A check on an unrelated key runs the sweep.
        assert!(limiter.allow("other"));
        assert_eq!(limiter.usage(&ClientKey::new("k")), Some(1), "{mode:?}");
        assert!(!limiter.allow("k"), "{mode:?}");
    }
}

#[test]
fn lengthening_window_mid_window_keeps_counting() {
    for mode in MODES {
        let (limiter, clock) = limiter(mode);
        limiter.set_limit("k", 2, Duration::from_secs(1)).unwrap();
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));

        limiter.set_limit("k", 2, Duration::from_secs(10)).unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(!limiter.allow("k"), "{mode:?}");

        clock.advance(Duration::from_secs(5));
        assert!(limiter.allow("k"), "{mode:?}");
        assert!(limiter.allow("k"), "{mode:?}");
        assert!(!limiter.allow("k"), "{mode:?}");
    }
}

#[test]
fn shortening_window_mid_window_releases_sooner() {
    for mode in MODES {
        let (limiter, clock) = limiter(mode);
        limiter.set_limit("k", 2, Duration::from_secs(10)).unwrap();
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        limiter.set_limit("k", 2, Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_millis(999));
        assert!(!limiter.allow("k"), "{mode:?}");

        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow("k"), "{mode:?}");
    }
}
