// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! The per-account locks are parking_lot mutexes, so with the
//! `deadlock_detection` feature any cycle in the lock graph is reported while
//! the engine is hammered from many threads.

use parking_lot::deadlock;
use point_ledger_rs::{
    AccountId, BalanceError, Engine, EngineConfig, MemoryBalanceStore, MemoryHistoryLog,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

struct DeadlockDetector {
    running: Arc<AtomicBool>,
    handle: JoinHandle<bool>,
}

/// Starts a background thread that checks for deadlocks.
fn start_deadlock_detector() -> DeadlockDetector {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    let handle = thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                return true;
            }
        }
        false
    });

    DeadlockDetector { running, handle }
}

/// Stops the detector and fails the test if it saw a deadlock.
fn stop_deadlock_detector(detector: DeadlockDetector) {
    detector.running.store(false, Ordering::SeqCst);
    let deadlocked = detector.handle.join().expect("Detector panicked");
    assert!(!deadlocked, "Deadlock detected! See output above for details.");
}

fn run_threads<F>(count: usize, work: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let handles: Vec<_> = (0..count)
        .map(|t| {
            let work = Arc::clone(&work);
            thread::spawn(move || work(t))
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}

// === Tests ===

/// High contention on a single account with many threads.
#[test]
fn no_deadlock_high_contention_single_account() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::in_memory());

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let worker_engine = Arc::clone(&engine);
    run_threads(NUM_THREADS, move |_| {
        for i in 0..OPS_PER_THREAD {
            match i % 3 {
                0 => {
                    worker_engine.charge(AccountId(1), 10).unwrap();
                }
                1 => {
                    let _ = worker_engine.use_points(AccountId(1), 1);
                }
                _ => {
                    let _ = worker_engine.get_balance(AccountId(1)).unwrap();
                    let _ = worker_engine.get_history(AccountId(1)).unwrap();
                }
            }
        }
    });

    stop_deadlock_detector(detector);

    let balance = engine.get_balance(AccountId(1)).unwrap().balance;
    assert!(balance >= 0);
    assert!(engine.audit(AccountId(1)).unwrap().is_consistent());
}

/// Threads sweep many accounts in opposite orders.
#[test]
fn no_deadlock_opposite_account_order() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::in_memory());

    const ACCOUNTS: i64 = 20;
    const NUM_THREADS: usize = 16;

    let worker_engine = Arc::clone(&engine);
    run_threads(NUM_THREADS, move |t| {
        for round in 0..50 {
            for step in 1..=ACCOUNTS {
                let id = if t % 2 == 0 { step } else { ACCOUNTS + 1 - step };
                worker_engine.charge(AccountId(id), 2).unwrap();
                if round % 2 == 1 {
                    worker_engine.use_points(AccountId(id), 1).unwrap();
                }
            }
        }
    });

    stop_deadlock_detector(detector);

    for id in 1..=ACCOUNTS {
        // 50 charges of 2 and 25 uses of 1 per thread.
        assert_eq!(
            engine.get_balance(AccountId(id)).unwrap().balance,
            NUM_THREADS as i64 * 75
        );
    }
}

/// Registry pruning races with acquisition without deadlock or lost exclusivity.
#[test]
fn no_deadlock_pruning_during_mutations() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::in_memory());
    let stop = Arc::new(AtomicBool::new(false));

    let pruner = {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                engine.locks().prune();
                thread::yield_now();
            }
        })
    };

    let worker_engine = Arc::clone(&engine);
    run_threads(8, move |t| {
        for i in 0..500 {
            worker_engine.charge(AccountId(((t + i) % 3 + 1) as i64), 1).unwrap();
        }
    });

    stop.store(true, Ordering::SeqCst);
    pruner.join().expect("Pruner panicked");
    stop_deadlock_detector(detector);

    let total: i64 = (1..=3)
        .map(|id| engine.get_balance(AccountId(id)).unwrap().balance)
        .sum();
    assert_eq!(total, 8 * 500);
    for id in 1..=3 {
        assert!(engine.audit(AccountId(id)).unwrap().is_consistent());
    }
}

/// Timed-out waiters leave no lock behind.
#[test]
fn no_deadlock_with_lock_timeouts() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::with_config(
        MemoryBalanceStore::new(),
        MemoryHistoryLog::new(),
        EngineConfig {
            lock_timeout: Duration::from_millis(1),
        },
    ));

    let worker_engine = Arc::clone(&engine);
    run_threads(16, move |_| {
        for _ in 0..200 {
            match worker_engine.charge(AccountId(1), 1) {
                Ok(_) | Err(BalanceError::LockTimeout { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    });

    stop_deadlock_detector(detector);

    // Every committed charge is in the history; timeouts changed nothing.
    let history = engine.get_history(AccountId(1)).unwrap();
    assert_eq!(
        engine.get_balance(AccountId(1)).unwrap().balance,
        history.len() as i64
    );
    assert!(engine.locks().acquire(AccountId(1), Duration::ZERO).is_ok());
}
