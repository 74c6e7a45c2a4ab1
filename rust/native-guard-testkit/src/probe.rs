use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

/// Stand-in for a foreign `free` function.
///
/// Counts how many times each address was released, remembers the order of
/// releases and can be told to panic for chosen addresses.
#[derive(Default)]
pub struct ReleaseProbe {
    state: Mutex<ProbeState>,
}

#[derive(Default)]
struct ProbeState {
    calls: HashMap<u64, usize>,
    order: Vec<u64>,
    failing: HashSet<u64>,
}

impl ReleaseProbe {
    pub fn new() -> Arc<ReleaseProbe> {
        Arc::new(ReleaseProbe::default())
    }

    /// Returns a release callback bound to this probe.
    pub fn callback(self: &Arc<Self>) -> impl Fn(u64) + Send + Sync + 'static {
        let probe = self.clone();
        move |address| probe.record(address)
    }

    /// Makes the callback panic (after recording the call) for `address`.
    pub fn fail_on(&self, address: u64) {
        self.state.lock().unwrap().failing.insert(address);
    }

    pub fn count(&self, address: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.state.lock().unwrap().order.len()
    }

    /// Addresses in the order their callbacks ran.
    pub fn order(&self) -> Vec<u64> {
        self.state.lock().unwrap().order.clone()
    }

    /// Addresses released more than once. Always empty unless the exactly-once
    /// guarantee was broken.
    pub fn duplicates(&self) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        let mut dups: Vec<u64> = state
            .calls
            .iter()
            .filter(|&(_, &n)| n > 1)
            .map(|(&a, _)| a)
            .collect();
        dups.sort_unstable();
        dups
    }

    fn record(&self, address: u64) {
        let fail = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(address).or_default() += 1;
            state.order.push(address);
            state.failing.contains(&address)
        };
        if fail {
            panic!("native release failed for {address}");
        }
    }
}
