//! Simulate command implementation

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail, ensure};
use native_guard::{GuardStats, Handle, ResourceGuard};
use serde::Serialize;

use crate::commands::create_guard;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Params {
    pub handles: u64,
    pub leak_ratio: f64,
    pub threads: u64,
    pub seed: Option<u64>,
}

#[derive(Serialize)]
struct SimulationSummary {
    threads: u64,
    handles: u64,
    seed: u64,
    elapsed_ms: u128,
    registered: u64,
    released: u64,
    reclaimed: u64,
    discarded: u64,
    release_failures: u64,
    live: usize,
}

impl SimulationSummary {
    fn new(params: &Params, seed: u64, elapsed: Duration, stats: GuardStats, live: usize) -> Self {
        SimulationSummary {
            threads: params.threads,
            handles: params.threads * params.handles,
            seed,
            elapsed_ms: elapsed.as_millis(),
            registered: stats.registered,
            released: stats.released,
            reclaimed: stats.reclaimed,
            discarded: stats.discarded,
            release_failures: stats.release_failures,
            live,
        }
    }
}

/// Per-address release counters, one slot per simulated native object.
struct ReleaseLedger {
    slots: Vec<AtomicU32>,
}

impl ReleaseLedger {
    fn new(len: usize) -> Arc<ReleaseLedger> {
        Arc::new(ReleaseLedger {
            slots: (0..len).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    fn record(&self, address: u64) {
        // Addresses are 1-based so that none of them is null.
        self.slots[(address - 1) as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Addresses whose callback did not run exactly once.
    fn violations(&self) -> Vec<(u64, u32)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u64 + 1, n.load(Ordering::Relaxed)))
            .filter(|&(_, n)| n != 1)
            .collect()
    }
}

pub fn run(params: Params, stdout: bool) -> Result<()> {
    if !(0.0..=1.0).contains(&params.leak_ratio) {
        bail!("--leak-ratio must be within 0.0..=1.0, got {}", params.leak_ratio);
    }
    ensure!(params.threads > 0, "--threads must be at least 1");

    let seed = params.seed.unwrap_or_else(|| fastrand::u64(..));
    let total = params
        .threads
        .checked_mul(params.handles)
        .context("handle count overflow")?;
    let guard = create_guard(stdout)?;
    let ledger = ReleaseLedger::new(total as usize);

    log::info!(
        "simulating {} handles on {} threads (leak ratio {}, seed {seed})",
        total,
        params.threads,
        params.leak_ratio
    );

    let start = Instant::now();
    thread::scope(|s| {
        for t in 0..params.threads {
            let guard = &guard;
            let ledger = &ledger;
            let params = &params;
            s.spawn(move || run_thread(guard, ledger, params, t, seed.wrapping_add(t)));
        }
    });

    ensure!(
        guard.flush_timeout(FLUSH_TIMEOUT),
        "reclaim worker did not drain within {FLUSH_TIMEOUT:?}"
    );
    let elapsed = start.elapsed();

    let summary = SimulationSummary::new(&params, seed, elapsed, guard.stats(), guard.live_count());
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let violations = ledger.violations();
    if !violations.is_empty() {
        bail!(
            "{} address(es) not released exactly once, first: {:?}",
            violations.len(),
            &violations[..violations.len().min(5)]
        );
    }
    guard.shutdown();
    Ok(())
}

fn run_thread(guard: &ResourceGuard, ledger: &Arc<ReleaseLedger>, params: &Params, t: u64, seed: u64) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut open: Vec<Handle> = Vec::new();

    for i in 0..params.handles {
        let address = t * params.handles + i + 1;
        let ledger = ledger.clone();
        let handle = match guard.register(address, move |a| ledger.record(a)) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("register {address} failed: {e}");
                continue;
            }
        };
        open.push(handle);

        // Keep a small window of live handles so that releases and leaks interleave.
        if open.len() > 8 {
            let handle = open.swap_remove(rng.usize(..open.len()));
            finish(handle, &mut rng, params.leak_ratio);
        }
    }

    for handle in open {
        finish(handle, &mut rng, params.leak_ratio);
    }
}

fn finish(handle: Handle, rng: &mut fastrand::Rng, leak_ratio: f64) {
    if rng.f64() < leak_ratio {
        drop(handle);
        return;
    }
    handle.release();
    if rng.bool() {
        // Repeated release must be a no-op.
        handle.release();
    }
}
