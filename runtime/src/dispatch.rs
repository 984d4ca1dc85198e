// dispatch.rs - address-indexed function table
//
// Backs BNNN computed jumps and lets the multi-ROM launcher swap the active
// ROM's routines at runtime. This table is the only process-wide mutable
// state in the runtime: ROM loading writes it to completion before any
// recompiled code runs, so readers and writers never interleave.

use crate::context::{Context, MEMORY_SIZE};
use crate::run::panic_at;

use std::sync::Mutex;

/// Signature of every recompiled routine.
pub type EntryFn = fn(&mut Context);

static TABLE: Mutex<[Option<EntryFn>; MEMORY_SIZE]> = Mutex::new([None; MEMORY_SIZE]);

/// Register a routine at a CHIP-8 address. Out-of-range addresses are ignored.
pub fn register(address: u16, func: EntryFn) {
    if (address as usize) < MEMORY_SIZE {
        TABLE.lock().unwrap()[address as usize] = Some(func);
    }
}

/// Look up the routine registered at an address.
pub fn lookup(address: u16) -> Option<EntryFn> {
    if (address as usize) < MEMORY_SIZE {
        TABLE.lock().unwrap()[address as usize]
    } else {
        None
    }
}

/// Drop every registration, ahead of loading a different ROM.
pub fn clear_all() {
    *TABLE.lock().unwrap() = [None; MEMORY_SIZE];
}

/// All addresses with a registered routine, ascending. Test harness support.
pub fn registered_addresses() -> Vec<u16> {
    TABLE
        .lock()
        .unwrap()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_some())
        .map(|(a, _)| a as u16)
        .collect()
}

/// Perform a BNNN computed jump: `target = base + V[reg]`.
///
/// Panics if nothing is registered at the target address.
pub fn computed_jump(ctx: &mut Context, base: u16, reg: u8) {
    let target = base.wrapping_add(ctx.v[reg as usize] as u16);
    match lookup(target) {
        Some(func) => func(ctx),
        None => panic_at("computed jump to unregistered address", target),
    }
}
