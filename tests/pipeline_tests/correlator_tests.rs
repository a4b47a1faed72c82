//! Correlator Tests
//!
//! Drives a client over an in-memory transport and plays the server by hand,
//! so every reply is fed to the correlator at a known point.
//!
//! Tests verify:
//! - Replies pair with commands in submission order
//! - A panicking callback cannot shift later pairings
//! - Every command resolves exactly once
//! - Desynchronization and transport failure fail everything pending

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kvpipe::pipeline::Correlator;
use kvpipe::{Client, ClientError, Command, Response};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[path = "../common/mod.rs"]
mod common;

use common::{executor_config, inline_config, replay, FakeStore, RecordingTransport};

fn setup() -> (Client, Correlator, RecordingTransport, FakeStore) {
    let transport = RecordingTransport::new();
    let (client, correlator) = Client::with_transport(transport.clone(), &inline_config()).unwrap();
    (client, correlator, transport, FakeStore::new())
}

// =============================================================================
// Pairing Tests
// =============================================================================

#[test]
fn test_replies_pair_in_submission_order() {
    let (client, mut correlator, transport, store) = setup();

    let set_a = client.submit(Command::set("a", "1"));
    let set_b = client.submit(Command::set("b", "2"));
    let get_b = client.submit(Command::get("b"));
    let get_a = client.submit(Command::get("a"));
    let get_missing = client.submit(Command::get("missing"));

    assert_eq!(correlator.pending(), 5);
    replay(&mut correlator, &transport, &store, 0);

    assert_eq!(set_a.wait().unwrap(), Response::ok());
    assert_eq!(set_b.wait().unwrap(), Response::ok());
    assert_eq!(get_b.wait().unwrap(), Response::bulk("2"));
    assert_eq!(get_a.wait().unwrap(), Response::bulk("1"));
    assert_eq!(get_missing.wait().unwrap(), Response::Nil);

    assert_eq!(correlator.matched(), 5);
    assert_eq!(correlator.pending(), 0);
}

#[test]
fn test_sequences_match_wire_order() {
    let (client, _correlator, transport, _store) = setup();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || {
                (0..100)
                    .map(|i| {
                        let key = format!("t{}-{}", t, i);
                        let handle = client.submit(Command::get(&key));
                        (handle.sequence().unwrap(), key)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let submitted: Vec<(u64, String)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let wire = transport.commands_from(0);
    assert_eq!(wire.len(), submitted.len());
    for (sequence, key) in submitted {
        assert_eq!(wire[(sequence - 1) as usize].key(), Some(key.as_str()));
    }
}

// =============================================================================
// Fault Isolation Tests
// =============================================================================

#[test]
fn test_panicking_set_callback_does_not_shift_get() {
    let (client, mut correlator, transport, store) = setup();

    // Two submitters: one writes id 7 with a callback that always fails,
    // the other reads id 7 right after it
    let writer = {
        let client = client.clone();
        thread::spawn(move || {
            client.submit_with(Command::set("7", "7"), |_| panic!("callback failure"))
        })
    };
    let set_handle = writer.join().unwrap();

    let reader = {
        let client = client.clone();
        thread::spawn(move || client.submit(Command::get("7")))
    };
    let get_handle = reader.join().unwrap();

    replay(&mut correlator, &transport, &store, 0);

    assert_eq!(set_handle.wait().unwrap(), Response::ok());
    assert_eq!(get_handle.wait().unwrap(), Response::bulk("7"));

    let stats = client.stats();
    assert_eq!(stats.continuation_faults, 1);
    assert_eq!(stats.completed, 2);
    assert!(!client.is_closed());
}

#[test]
fn test_random_callback_faults_never_mismatch() {
    let (client, mut correlator, transport, store) = setup();
    let mut rng = StdRng::seed_from_u64(7);

    let mismatches = Arc::new(AtomicU64::new(0));
    let mut injected = 0u64;
    let mut gets = Vec::new();
    let mut cursor = 0;

    for id in 0..1000 {
        let id = id.to_string();

        let fault = rng.gen_bool(0.5);
        if fault {
            injected += 1;
        }
        client.submit_with(Command::set(&id, &id), move |_| {
            if fault {
                panic!("injected");
            }
        });

        let expected = id.clone();
        let counter = Arc::clone(&mismatches);
        gets.push((
            id.clone(),
            client.submit_with(Command::get(&id), move |result| {
                if !matches!(&result, Ok(Response::Bulk(b)) if &b[..] == expected.as_bytes()) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ));

        // Let replies arrive in irregular bursts
        if rng.gen_bool(0.3) {
            cursor = replay(&mut correlator, &transport, &store, cursor);
        }
    }
    replay(&mut correlator, &transport, &store, cursor);

    for (id, handle) in gets {
        assert_eq!(handle.wait().unwrap(), Response::bulk(id));
    }

    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    let stats = client.stats();
    assert_eq!(stats.continuation_faults, injected);
    assert_eq!(stats.submitted, 2000);
    assert_eq!(stats.completed, 2000);
    assert_eq!(correlator.pending(), 0);
}

#[test]
fn test_every_command_resolves_exactly_once() {
    let (client, mut correlator, transport, store) = setup();
    let calls = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for i in 0..300 {
        let calls = Arc::clone(&calls);
        let handle = client.submit_with(Command::set(&format!("k{}", i), "v"), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if i % 3 == 0 {
                panic!("every third fails");
            }
        });
        handles.push(handle);
    }

    // Cancel some before their replies arrive
    let cancelled = handles.iter().step_by(10).filter(|h| h.cancel()).count() as u64;

    replay(&mut correlator, &transport, &store, 0);

    assert_eq!(calls.load(Ordering::SeqCst), 300);
    let stats = client.stats();
    assert_eq!(stats.submitted, 300);
    assert_eq!(stats.resolved(), 300);
    assert_eq!(stats.cancelled, cancelled);
    assert_eq!(stats.discarded, cancelled);
    assert_eq!(stats.completed, 300 - cancelled);
}

// =============================================================================
// Cancellation & Timeout Tests
// =============================================================================

#[test]
fn test_cancel_middle_command_discards_its_reply() {
    let (client, mut correlator, transport, store) = setup();
    store.apply(&Command::set("k1", "v1"));
    store.apply(&Command::set("k2", "v2"));
    store.apply(&Command::set("k3", "v3"));

    let h1 = client.submit(Command::get("k1"));
    let h2 = client.submit(Command::get("k2"));
    let h3 = client.submit(Command::get("k3"));

    assert!(h2.cancel());
    assert!(!h2.cancel());
    assert!(h2.is_cancelled());
    assert!(h2.is_resolved());
    // Entry stays queued until its reply is consumed
    assert_eq!(correlator.pending(), 3);

    replay(&mut correlator, &transport, &store, 0);

    assert_eq!(h1.wait().unwrap(), Response::bulk("v1"));
    assert!(matches!(h2.wait(), Err(ClientError::Cancelled)));
    assert_eq!(h3.wait().unwrap(), Response::bulk("v3"));

    let stats = client.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.completed, 2);
}

#[test]
fn test_cancel_runs_callback_with_cancelled() {
    let (client, _correlator, _transport, _store) = setup();
    let (tx, rx) = crossbeam::channel::unbounded();

    let handle = client.submit_with(Command::get("k"), move |result| {
        tx.send(result).unwrap();
    });
    assert!(handle.cancel());

    assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::Cancelled)));
}

#[test]
fn test_cancel_after_reply_is_noop() {
    let (client, mut correlator, transport, store) = setup();

    let handle = client.submit(Command::ping());
    replay(&mut correlator, &transport, &store, 0);

    assert!(!handle.cancel());
    assert!(!handle.is_cancelled());
    assert_eq!(handle.wait().unwrap(), Response::Simple("PONG".to_string()));
}

#[test]
fn test_wait_timeout_keeps_entry_for_late_reply() {
    let (client, mut correlator, transport, store) = setup();
    store.apply(&Command::set("slow", "1"));
    store.apply(&Command::set("next", "2"));

    let slow = client.submit(Command::get("slow"));
    assert!(matches!(
        slow.wait_timeout(Duration::from_millis(20)),
        Err(ClientError::Timeout)
    ));
    assert_eq!(client.pending_count(), 1);

    let next = client.submit(Command::get("next"));
    replay(&mut correlator, &transport, &store, 0);

    assert_eq!(next.wait().unwrap(), Response::bulk("2"));
    let stats = client.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.discarded, 1);
}

#[test]
fn test_wait_timeout_returns_reply_when_in_time() {
    let (client, mut correlator, transport, store) = setup();

    let handle = client.submit(Command::ping());
    replay(&mut correlator, &transport, &store, 0);

    let reply = handle.wait_timeout(Duration::from_millis(20)).unwrap();
    assert_eq!(reply, Response::Simple("PONG".to_string()));
}

#[test]
fn test_wait_timeout_agrees_with_callback_when_racing_reply() {
    let (client, mut correlator, transport, store) = setup();

    for i in 0..300 {
        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = client.submit_with(Command::ping(), move |result| {
            tx.send(result.is_ok()).unwrap();
        });

        let waited = thread::scope(|s| {
            s.spawn(|| replay(&mut correlator, &transport, &store, i));
            handle.wait_timeout(Duration::from_micros(50))
        });

        let seen = rx.try_recv().unwrap();
        assert_eq!(waited.is_ok(), seen, "iteration {}", i);
        if let Err(err) = waited {
            assert!(matches!(err, ClientError::Timeout));
        }
    }

    assert_eq!(correlator.pending(), 0);
    assert_eq!(client.stats().resolved(), 300);
}

#[test]
fn test_try_take() {
    let (client, mut correlator, transport, store) = setup();

    let handle = client.submit(Command::ping());
    assert!(handle.try_take().is_none());

    replay(&mut correlator, &transport, &store, 0);
    assert!(handle.try_take().unwrap().is_ok());
}

// =============================================================================
// Connection Failure Tests
// =============================================================================

#[test]
fn test_extra_reply_desynchronizes_connection() {
    let (client, mut correlator, transport, store) = setup();

    let handle = client.submit(Command::get("a"));
    replay(&mut correlator, &transport, &store, 0);
    assert_eq!(handle.wait().unwrap(), Response::Nil);

    let result = correlator.on_response(Response::ok());
    assert!(matches!(result, Err(ClientError::ProtocolDesynchronization(_))));
    assert!(client.is_closed());
    assert!(matches!(
        client.close_cause(),
        Some(ClientError::ProtocolDesynchronization(_))
    ));

    // Later submissions fail fast with the same cause and write nothing
    let frames = transport.frame_count();
    let late = client.submit(Command::ping());
    assert_eq!(late.sequence(), None);
    assert!(matches!(
        late.wait(),
        Err(ClientError::ProtocolDesynchronization(_))
    ));
    assert_eq!(transport.frame_count(), frames);

    // Replies after the close report the close cause again
    assert!(matches!(
        correlator.on_response(Response::ok()),
        Err(ClientError::ProtocolDesynchronization(_))
    ));

    assert!(matches!(
        client.close(),
        Err(ClientError::ProtocolDesynchronization(_))
    ));
}

#[test]
fn test_on_closed_fails_all_pending_in_order() {
    let (client, mut correlator, _transport, _store) = setup();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            client.submit_with(Command::get(&format!("k{}", i)), move |result| {
                assert!(matches!(result, Err(ClientError::TransportFault(_))));
                order.lock().push(i);
            })
        })
        .collect();

    let effective = correlator.on_closed(ClientError::TransportFault("reset".to_string()));
    assert!(matches!(effective, ClientError::TransportFault(_)));

    for handle in handles {
        assert!(matches!(handle.wait(), Err(ClientError::TransportFault(_))));
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(client.stats().failed, 5);
    assert_eq!(correlator.pending(), 0);

    // A second close keeps the first cause
    let again = correlator.on_closed(ClientError::ConnectionClosed);
    assert!(matches!(again, ClientError::TransportFault(_)));
}

#[test]
fn test_send_failure_fails_everything_pending() {
    let (client, _correlator, transport, _store) = setup();

    let first = client.submit(Command::get("a"));
    transport.fail_sends(true);
    let second = client.submit(Command::get("b"));

    assert!(matches!(first.wait(), Err(ClientError::TransportFault(_))));
    assert!(matches!(second.wait(), Err(ClientError::TransportFault(_))));
    assert_eq!(transport.frame_count(), 1);
    assert_eq!(transport.shutdown_count(), 1);
    assert!(client.is_closed());

    let third = client.submit(Command::get("c"));
    assert!(matches!(third.wait(), Err(ClientError::TransportFault(_))));
}

#[test]
fn test_invalid_command_never_reaches_the_wire() {
    let (client, _correlator, transport, _store) = setup();

    let handle = client.submit(Command::get(""));

    assert_eq!(handle.sequence(), None);
    assert!(matches!(handle.wait(), Err(ClientError::InvalidCommand(_))));
    assert_eq!(transport.frame_count(), 0);

    let stats = client.stats();
    assert_eq!(stats.submitted, 0);
    assert_eq!(stats.failed, 1);
    assert!(!client.is_closed());
}

#[test]
fn test_close_fails_pending_with_connection_closed() {
    let (client, _correlator, transport, _store) = setup();

    let handle = client.submit(Command::get("a"));
    client.close().unwrap();

    assert!(matches!(handle.wait(), Err(ClientError::ConnectionClosed)));
    assert_eq!(transport.shutdown_count(), 1);
    assert!(matches!(
        client.submit(Command::ping()).wait(),
        Err(ClientError::ConnectionClosed)
    ));
}

#[test]
fn test_dropping_client_resolves_pending() {
    let (client, _correlator, _transport, _store) = setup();

    let handle = client.submit(Command::get("a"));
    drop(client);

    assert!(matches!(handle.wait(), Err(ClientError::ConnectionClosed)));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_submitters_with_live_driver() {
    let transport = RecordingTransport::new();
    let (client, mut correlator) =
        Client::with_transport(transport.clone(), &executor_config()).unwrap();
    let store = Arc::new(FakeStore::new());
    let stop = Arc::new(AtomicBool::new(false));

    let driver = {
        let transport = transport.clone();
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut cursor = 0;
            while !stop.load(Ordering::SeqCst) {
                cursor = replay(&mut correlator, &transport, &store, cursor);
                thread::sleep(Duration::from_millis(1));
            }
            replay(&mut correlator, &transport, &store, cursor);
        })
    };

    let submitters: Vec<_> = (0..8)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || {
                let mut results = HashMap::new();
                for i in 0..200 {
                    let key = format!("t{}-{}", t, i);
                    client.submit_with(Command::set(&key, &key), move |_| {
                        if i % 2 == 0 {
                            panic!("even ids fail");
                        }
                    });
                    let reply = client.submit(Command::get(&key)).wait().unwrap();
                    results.insert(key, reply);
                }
                results
            })
        })
        .collect();

    for submitter in submitters {
        for (key, reply) in submitter.join().unwrap() {
            assert_eq!(reply, Response::bulk(key));
        }
    }

    stop.store(true, Ordering::SeqCst);
    driver.join().unwrap();
    client.close().unwrap();

    let stats = client.stats();
    assert_eq!(stats.submitted, 3200);
    assert_eq!(stats.completed, 3200);
    assert_eq!(stats.continuation_faults, 800);
}
