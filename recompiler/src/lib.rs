// chip8-recomp - CHIP-8 to Rust static recompiler
//
// Translates CHIP-8 ROMs into standalone Rust projects that execute without
// an interpreter. The pipeline runs in phases:
//
// 1. **ROM loading** (`rom.rs`): read and validate the image, derive a
//    sanitized identifier from the file name.
// 2. **Decoding** (`decode.rs`): map every 2-byte word to a structured
//    instruction with operand fields and flow flags.
// 3. **Analysis** (`cfg.rs`): build basic blocks, discover functions,
//    compute reachability and label sets.
// 4. **Emission** (`emit.rs`): generate the Rust translation unit, embedded
//    ROM data, launcher and build file. Per-function mode calls discovered
//    functions natively; single-function mode is the fallback for control
//    flow the partition cannot express.
// 5. **Batch** (`batch.rs`): compile a directory of ROMs into one launcher
//    with a shared catalog and per-ROM namespaces.
//
// The generated code links against the chip8-rt runtime crate, which owns
// machine state, instruction helpers, the dispatch table and the 60Hz
// cooperative main loop.

pub mod batch;
pub mod cfg;
pub mod decode;
pub mod emit;
pub mod meta;
pub mod rom;

pub use cfg::{analyze, Analysis, BasicBlock, Function};
pub use decode::{decode_rom, decode_word, disassemble, Instruction, Kind};
pub use emit::{generate, EmitOptions, GeneratedOutput, Quirks};
pub use rom::{Rom, RomError};
