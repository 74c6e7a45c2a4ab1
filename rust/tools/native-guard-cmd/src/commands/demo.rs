//! Demo command implementation

use anyhow::{Result, ensure};
use native_guard::{Handle, ResourceGuard};

use crate::commands::create_guard;

/// Heap block standing in for memory owned by a foreign library.
struct RawBlock {
    bytes: Vec<u8>,
}

/// Wrapper in the shape a binding generator would emit.
struct NativeBlock {
    handle: Handle,
}

impl NativeBlock {
    fn alloc(guard: &ResourceGuard, size: usize) -> Result<NativeBlock> {
        let raw = Box::into_raw(Box::new(RawBlock {
            bytes: vec![0; size],
        }));
        let handle = guard
            .registration(raw as u64)
            .owned_by::<NativeBlock>()
            .release_with(free_block)
            .finish();
        match handle {
            Ok(handle) => Ok(NativeBlock { handle }),
            Err(e) => {
                free_block(raw as u64);
                Err(e.into())
            }
        }
    }

    fn len(&self) -> usize {
        // SAFETY: the block stays allocated while the handle is active, and the
        // handle is only released through `close` or after `self` is dropped.
        unsafe { (*(self.handle.address() as *const RawBlock)).bytes.len() }
    }

    fn close(&self) -> bool {
        self.handle.release()
    }
}

fn free_block(address: u64) {
    // SAFETY: `address` came from `Box::into_raw` in `NativeBlock::alloc`, and the
    // guard invokes this callback at most once per registration.
    drop(unsafe { Box::from_raw(address as *mut RawBlock) });
    log::debug!("freed native block at {address:#x}");
}

pub fn run(stdout: bool) -> Result<()> {
    let guard = create_guard(stdout)?;

    println!("== explicit release");
    let block = NativeBlock::alloc(&guard, 64)?;
    println!("allocated {} bytes", block.len());
    ensure!(block.close(), "first close must release");
    ensure!(!guard.contains(&block.handle), "released block is still tracked");

    println!("== double release");
    ensure!(!block.close(), "second close must be a no-op");
    drop(block);

    println!("== leaked owner");
    let leaked = NativeBlock::alloc(&guard, 128)?;
    drop(leaked);
    ensure!(guard.flush(), "reclaim worker stopped unexpectedly");
    ensure!(guard.live_count() == 0, "leaked block was not reclaimed");

    println!("== shutdown");
    guard.shutdown();

    let late = NativeBlock::alloc(&guard, 32)?;
    ensure!(late.close(), "explicit release must work after shutdown");
    let leaked = NativeBlock::alloc(&guard, 32)?;
    drop(leaked);
    // Nothing reclaims it anymore; the guard reports the leak and keeps it tracked.
    ensure!(guard.live_count() == 1, "leak after shutdown must stay tracked");

    let stats = guard.stats();
    println!(
        "registered {}, released {}, reclaimed {}",
        stats.registered, stats.released, stats.reclaimed
    );
    Ok(())
}
