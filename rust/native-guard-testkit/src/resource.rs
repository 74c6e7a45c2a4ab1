use std::sync::Arc;

use native_guard::{Handle, ResourceGuard};

use crate::probe::ReleaseProbe;

/// A wrapper object in the shape produced by binding generators: it owns one
/// native address and keeps the guard [`Handle`] as a field.
///
/// Calling [`close`](Self::close) is the explicit release path. Dropping the
/// value without closing it is the leak path.
pub struct TestResource {
    handle: Handle,
}

impl TestResource {
    pub fn open(guard: &ResourceGuard, address: u64, probe: &Arc<ReleaseProbe>) -> TestResource {
        let handle = guard
            .registration(address)
            .owned_by::<TestResource>()
            .release_with(probe.callback())
            .finish()
            .expect("register test resource");
        TestResource { handle }
    }

    pub fn close(&self) -> bool {
        self.handle.release()
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn address(&self) -> u64 {
        self.handle.address()
    }
}
