use std::sync::{Arc, Mutex};

use native_guard::{Diagnostic, DiagnosticSink};

/// A [`DiagnosticSink`] that keeps every diagnostic in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().unwrap().clone()
    }

    /// Rendered message texts, in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }

    /// Diagnostics that mention `address`, in emission order.
    pub fn for_address(&self, address: u64) -> Vec<Diagnostic> {
        self.events()
            .into_iter()
            .filter(|d| d.address() == Some(address))
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events().iter().filter(|d| predicate(d)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.events.lock().unwrap().push(diagnostic.clone());
    }
}
