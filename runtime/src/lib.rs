// chip8-rt - runtime library for statically recompiled CHIP-8 programs
//
// Recompiled code produced by chip8recomp links against this crate. It
// provides:
//
// 1. **Machine state** (`context.rs`): registers, memory, display, timers
//    and the cooperative-yield bookkeeping.
// 2. **Instruction helpers** (`ops.rs`): sprite drawing, BCD, register
//    block moves, keys, RNG and timers with the exact CHIP-8 semantics.
// 3. **Dispatch table** (`dispatch.rs`): address-indexed function pointers
//    for BNNN computed jumps and multi-ROM switching.
// 4. **Main loop** (`run.rs`): the 60Hz cooperative scheduler that budgets
//    instructions per frame and completes FX0A key waits.
// 5. **Platform seam** (`platform.rs` / `headless.rs`): the backend trait
//    plus a frame-counted headless implementation for automated testing.
// 6. **Catalog** (`catalog.rs`): the multi-ROM launcher contract.
//
// # Yield protocol
//
// The main loop sets `cycles_remaining` and calls the entry routine once per
// frame. Generated code decrements the budget on loop back-edges and, when
// it runs out, records `resume_pc`, sets `should_yield` and returns. The
// routine's prologue resumes from `resume_pc` on the next call.

pub mod catalog;
pub mod context;
pub mod dispatch;
pub mod headless;
pub mod ops;
pub mod platform;
pub mod run;

pub use catalog::{run_with_menu, RomEntry};
pub use context::Context;
pub use dispatch::EntryFn;
pub use platform::{MenuNav, Platform, PlatformError, Settings};
pub use run::{panic_at, run, RunConfig, RunOutcome, RunReport, RuntimeError};
