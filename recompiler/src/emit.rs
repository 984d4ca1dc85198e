// emit.rs - Rust code generation
//
// Turns an analyzed program into a standalone Rust project that links
// against chip8-rt. Two emission modes share one per-instruction
// translation:
//
// - per-function: one routine per discovered function, CALL/RET become
//   native calls and returns;
// - single-function: the whole program inside one routine, CALL/RET go
//   through the software stack. Used for ROMs whose control flow defeats
//   the function partition (data in code, cross-function jumps, odd
//   analysis targets).
//
// Rust has no goto, so every routine is a loop over an instruction-pointer
// discriminant: basic-block labels become match arms keyed by address.

use crate::cfg::{function_name, Analysis, Function};
use crate::decode::{decode_word, disassemble, Instruction, Kind};

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Platform-variant behavior toggles, applied at emission time.
#[derive(Debug, Clone, Copy)]
pub struct Quirks {
    /// OR/AND/XOR reset VF to 0 (original COSMAC VIP).
    pub vf_reset: bool,
    /// SHR/SHL read VY instead of VX.
    pub shift_uses_vy: bool,
    /// FX55/FX65 advance I by X+1.
    pub memory_increment_i: bool,
    /// DXYN wraps every pixel instead of clipping at the edges.
    pub sprite_wrap: bool,
    /// BXNN uses VX (X = high nibble of the operand) instead of V0.
    pub jump_uses_vx: bool,
    /// DXYN waits for the next frame (consumes the rest of the budget).
    pub display_wait: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Quirks {
            vf_reset: true,
            shift_uses_vy: false,
            memory_increment_i: true,
            sprite_wrap: false,
            jump_uses_vx: false,
            display_wait: false,
        }
    }
}

/// Options for code generation.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// Symbol prefix; empty in single-ROM mode, the sanitized identifier in
    /// batch mode.
    pub prefix: String,
    /// Sanitized ROM identifier, used for file, module and package names.
    pub rom_name: String,
    /// Display title for the launcher.
    pub title: String,
    /// Include disassembly comments.
    pub emit_comments: bool,
    /// Include addresses in the disassembly comments.
    pub emit_address_comments: bool,
    /// Force everything into one routine.
    pub single_function_mode: bool,
    /// Embed the ROM image (sprites, font lookups and BCD need it).
    pub embed_rom_data: bool,
    /// Extra diagnostics while generating.
    pub debug: bool,
    /// Path the generated Cargo.toml uses for the chip8-rt dependency.
    pub runtime_path: String,
    /// CPU frequency baked into the generated launcher.
    pub recommended_cpu_hz: u32,
    pub quirks: Quirks,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            prefix: String::new(),
            rom_name: "rom".to_string(),
            title: "CHIP-8".to_string(),
            emit_comments: true,
            emit_address_comments: true,
            single_function_mode: false,
            embed_rom_data: true,
            debug: false,
            runtime_path: default_runtime_path(),
            recommended_cpu_hz: 700,
            quirks: Quirks::default(),
        }
    }
}

/// Where the generated projects find chip8-rt unless overridden.
pub fn default_runtime_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../runtime").to_string()
}

/// Result of code generation: file contents plus their project-relative
/// paths.
#[derive(Debug, Default)]
pub struct GeneratedOutput {
    pub header_content: String,
    pub source_content: String,
    pub rom_data_content: String,
    pub main_content: String,
    pub cargo_content: String,

    pub header_file: String,
    pub source_file: String,
    pub rom_data_file: String,
    pub main_file: String,
    pub cargo_file: String,
}

#[derive(Debug, Error)]
pub enum EmitError {
    /// The function partition cannot represent this ROM; retry in
    /// single-function mode.
    #[error("per-function emission failed: {0}")]
    NeedsSingleFunction(String),
    #[error("could not write output: {0}")]
    Io(#[from] io::Error),
}

const GENERATED_NOTICE: &str = "Generated by chip8recomp. Do not edit.";

/// Lints that legitimately fire on mechanical output.
const GENERATED_ALLOWS: &str = "#![allow(unused_imports, unused_mut, unused_assignments, \
                                unreachable_patterns, unreachable_code, clippy::all)]";

/// Generate the full single-ROM project.
pub fn generate(
    analysis: &Analysis,
    rom_data: &[u8],
    options: &EmitOptions,
) -> Result<GeneratedOutput, EmitError> {
    let source_content = generate_source(analysis, rom_data, options)?;
    let name = &options.rom_name;

    Ok(GeneratedOutput {
        header_content: generate_lib(options),
        source_content,
        rom_data_content: if options.embed_rom_data {
            generate_rom_data(rom_data, options)
        } else {
            String::new()
        },
        main_content: generate_main(options),
        cargo_content: generate_cargo(options),
        header_file: "src/lib.rs".to_string(),
        source_file: format!("src/{}.rs", name),
        rom_data_file: format!("src/{}_rom.rs", name),
        main_file: "src/main.rs".to_string(),
        cargo_file: "Cargo.toml".to_string(),
    })
}

/// Generate the code module (routines + register hook) for one ROM.
pub fn generate_source(
    analysis: &Analysis,
    rom_data: &[u8],
    options: &EmitOptions,
) -> Result<String, EmitError> {
    let cg = Codegen::new(analysis, rom_data, options);
    if options.single_function_mode {
        Ok(cg.generate_single_function())
    } else {
        cg.generate_per_function()
    }
}

/// Write all generated files below `dir`, creating directories as needed.
pub fn write_output(output: &GeneratedOutput, dir: &Path) -> Result<(), EmitError> {
    let write = |rel: &str, content: &str| -> Result<(), EmitError> {
        if rel.is_empty() || content.is_empty() {
            return Ok(());
        }
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    };

    write(&output.cargo_file, &output.cargo_content)?;
    write(&output.header_file, &output.header_content)?;
    write(&output.source_file, &output.source_content)?;
    write(&output.rom_data_file, &output.rom_data_content)?;
    write(&output.main_file, &output.main_content)?;
    Ok(())
}

// ============================================================================
// Text emission helper
// ============================================================================

struct Emitter {
    out: String,
    indent: usize,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Push a line ending in `{` and indent.
    fn open(&mut self, text: &str) {
        self.line(text);
        self.indent += 1;
    }

    /// Dedent and push `}` followed by `suffix`.
    fn close(&mut self, suffix: &str) {
        self.indent -= 1;
        self.line(&format!("}}{}", suffix));
    }

    fn finish(self) -> String {
        self.out
    }
}

// ============================================================================
// Shared translation state
// ============================================================================

/// Where a transfer of control lands, from the perspective of the routine
/// being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// A match arm of the current routine.
    Local(u16),
    /// Another routine's entry: tail-call then return.
    Tail(u16),
}

struct Codegen<'a> {
    analysis: &'a Analysis,
    rom: &'a [u8],
    opts: &'a EmitOptions,
    addr_to_idx: BTreeMap<u16, usize>,
    /// Blocks with an incoming back-edge; their instructions carry yield
    /// checks.
    looping_blocks: BTreeSet<u16>,
}

impl<'a> Codegen<'a> {
    fn new(analysis: &'a Analysis, rom: &'a [u8], opts: &'a EmitOptions) -> Self {
        let addr_to_idx = analysis
            .instructions
            .iter()
            .enumerate()
            .map(|(i, instr)| (instr.address, i))
            .collect();

        // A back-edge is any transfer from an address at or above the block
        // start; those blocks bound loop iterations per frame.
        let looping_blocks = analysis
            .blocks
            .iter()
            .filter(|(&start, b)| b.predecessors.iter().any(|&p| p >= start))
            .map(|(&start, _)| start)
            .collect();

        Codegen {
            analysis,
            rom,
            opts,
            addr_to_idx,
            looping_blocks,
        }
    }

    fn instr_at(&self, addr: u16) -> Option<&Instruction> {
        self.addr_to_idx
            .get(&addr)
            .map(|&i| &self.analysis.instructions[i])
    }

    fn comment_for(&self, e: &mut Emitter, instr: &Instruction) {
        if !self.opts.emit_comments {
            return;
        }
        let text = disassemble(instr);
        if self.opts.emit_address_comments {
            e.line(&format!("// {}", text));
        } else {
            // strip the "AAA: " column
            e.line(&format!("// {}", &text[5..]));
        }
    }

    fn entry_symbol(&self) -> String {
        if self.opts.prefix.is_empty() {
            "entry".to_string()
        } else {
            format!("{}_entry", self.opts.prefix)
        }
    }

    fn register_symbol(&self) -> String {
        if self.opts.prefix.is_empty() {
            "register_functions".to_string()
        } else {
            format!("{}_register_functions", self.opts.prefix)
        }
    }

    fn module_header(&self, e: &mut Emitter) {
        e.line(&format!(
            "// {}.rs - recompiled from {}",
            self.opts.rom_name, self.opts.rom_name
        ));
        e.line("//");
        e.line(&format!("// {}", GENERATED_NOTICE));
        e.blank();
        e.line(GENERATED_ALLOWS);
        e.blank();
        e.line("use chip8_rt::{dispatch, ops, Context};");
        e.blank();
    }

    /// Standard budget check after an instruction in a looping block.
    fn emit_yield_check(&self, e: &mut Emitter, resume: u16, resume_points: &mut BTreeSet<u16>) {
        resume_points.insert(resume);
        e.line("ctx.cycles_remaining -= 1;");
        e.open("if ctx.cycles_remaining <= 0 {");
        e.line(&format!("ctx.resume_pc = 0x{:03X};", resume));
        e.line("ctx.should_yield = true;");
        e.line("return;");
        e.close("");
    }

    /// Budget check where the resume target was just stored in `ip`.
    fn emit_yield_check_dynamic(
        &self,
        e: &mut Emitter,
        candidates: &[u16],
        resume_points: &mut BTreeSet<u16>,
    ) {
        resume_points.extend(candidates.iter().copied());
        e.line("ctx.cycles_remaining -= 1;");
        e.open("if ctx.cycles_remaining <= 0 {");
        e.line("ctx.resume_pc = ip;");
        e.line("ctx.should_yield = true;");
        e.line("return;");
        e.close("");
    }

    /// Unconditional yield with a fixed continuation (FX0A, display wait,
    /// running off the end of decoded code).
    fn emit_park(&self, e: &mut Emitter, resume: u16, resume_points: &mut BTreeSet<u16>) {
        resume_points.insert(resume);
        e.line(&format!("ctx.resume_pc = 0x{:03X};", resume));
        e.line("ctx.should_yield = true;");
        e.line("return;");
    }

    /// Emit one non-control instruction. Control flow (jumps, branches,
    /// calls, returns, waits) is handled by the callers, which know the
    /// emission mode.
    fn emit_plain_instruction(&self, e: &mut Emitter, instr: &Instruction) {
        let q = &self.opts.quirks;
        let x = instr.x as usize;
        let y = instr.y as usize;

        match instr.kind {
            Kind::Cls => {
                e.line("ops::clear_display(ctx);");
            }
            Kind::LdVxNn => {
                e.line(&format!("ctx.v[0x{:X}] = 0x{:02X};", x, instr.nn));
            }
            Kind::AddVxNn => {
                e.line(&format!(
                    "ctx.v[0x{:X}] = ctx.v[0x{:X}].wrapping_add(0x{:02X});",
                    x, x, instr.nn
                ));
            }
            Kind::LdVxVy => {
                e.line(&format!("ctx.v[0x{:X}] = ctx.v[0x{:X}];", x, y));
            }
            Kind::OrVxVy => {
                e.line(&format!("ctx.v[0x{:X}] |= ctx.v[0x{:X}];", x, y));
                if q.vf_reset {
                    e.line("ctx.v[0xF] = 0;");
                }
            }
            Kind::AndVxVy => {
                e.line(&format!("ctx.v[0x{:X}] &= ctx.v[0x{:X}];", x, y));
                if q.vf_reset {
                    e.line("ctx.v[0xF] = 0;");
                }
            }
            Kind::XorVxVy => {
                e.line(&format!("ctx.v[0x{:X}] ^= ctx.v[0x{:X}];", x, y));
                if q.vf_reset {
                    e.line("ctx.v[0xF] = 0;");
                }
            }
            Kind::AddVxVy => {
                // VF is written last so ADD VF,Vy leaves the carry behind
                e.line(&format!(
                    "let sum = ctx.v[0x{:X}] as u16 + ctx.v[0x{:X}] as u16;",
                    x, y
                ));
                e.line(&format!("ctx.v[0x{:X}] = sum as u8;", x));
                e.line("ctx.v[0xF] = (sum > 0xFF) as u8;");
            }
            Kind::SubVxVy => {
                e.line(&format!(
                    "let no_borrow = ctx.v[0x{:X}] >= ctx.v[0x{:X}];",
                    x, y
                ));
                e.line(&format!(
                    "ctx.v[0x{:X}] = ctx.v[0x{:X}].wrapping_sub(ctx.v[0x{:X}]);",
                    x, x, y
                ));
                e.line("ctx.v[0xF] = no_borrow as u8;");
            }
            Kind::SubnVxVy => {
                e.line(&format!(
                    "let no_borrow = ctx.v[0x{:X}] >= ctx.v[0x{:X}];",
                    y, x
                ));
                e.line(&format!(
                    "ctx.v[0x{:X}] = ctx.v[0x{:X}].wrapping_sub(ctx.v[0x{:X}]);",
                    x, y, x
                ));
                e.line("ctx.v[0xF] = no_borrow as u8;");
            }
            Kind::ShrVx => {
                let src = if q.shift_uses_vy { y } else { x };
                e.line(&format!("let src = ctx.v[0x{:X}];", src));
                e.line(&format!("ctx.v[0x{:X}] = src >> 1;", x));
                e.line("ctx.v[0xF] = src & 0x01;");
            }
            Kind::ShlVx => {
                let src = if q.shift_uses_vy { y } else { x };
                e.line(&format!("let src = ctx.v[0x{:X}];", src));
                e.line(&format!("ctx.v[0x{:X}] = src << 1;", x));
                e.line("ctx.v[0xF] = src >> 7;");
            }
            Kind::LdINnn => {
                e.line(&format!("ctx.i = 0x{:03X};", instr.nnn));
            }
            Kind::AddIVx => {
                e.line(&format!(
                    "ctx.i = ctx.i.wrapping_add(ctx.v[0x{:X}] as u16) & 0x0FFF;",
                    x
                ));
            }
            Kind::LdVxDt => {
                e.line(&format!("ctx.v[0x{:X}] = ctx.delay_timer;", x));
            }
            Kind::LdDtVx => {
                e.line(&format!("ctx.delay_timer = ctx.v[0x{:X}];", x));
            }
            Kind::LdStVx => {
                e.line(&format!("ctx.sound_timer = ctx.v[0x{:X}];", x));
            }
            Kind::LdFVx => {
                e.line(&format!(
                    "ctx.i = 0x050 + (ctx.v[0x{:X}] & 0x0F) as u16 * 5;",
                    x
                ));
            }
            Kind::LdBVx => {
                e.line(&format!("ops::store_bcd(ctx, 0x{:X});", x));
            }
            Kind::LdIVx => {
                e.line(&format!(
                    "ops::store_registers(ctx, 0x{:X}, {});",
                    x, q.memory_increment_i
                ));
            }
            Kind::LdVxI => {
                e.line(&format!(
                    "ops::load_registers(ctx, 0x{:X}, {});",
                    x, q.memory_increment_i
                ));
            }
            Kind::Rnd => {
                e.line(&format!(
                    "ctx.v[0x{:X}] = ops::random_byte() & 0x{:02X};",
                    x, instr.nn
                ));
            }
            Kind::Drw => {
                e.line(&format!(
                    "ops::draw_sprite(ctx, 0x{:X}, 0x{:X}, 0x{:X}, {});",
                    x, y, instr.n, q.sprite_wrap
                ));
            }
            Kind::Sys => {
                if self.opts.emit_comments {
                    e.line("// SYS is ignored on modern interpreters");
                }
            }
            Kind::Unknown => {
                if self.opts.emit_comments {
                    e.line(&format!(
                        "// unknown opcode 0x{:04X}: no-op (would panic if meaningful)",
                        instr.opcode
                    ));
                }
            }
            // control flow is emitted by the mode-specific translators
            _ => unreachable!("control instruction in plain emission"),
        }
    }

    /// Condition expression of a skip instruction.
    fn branch_condition(&self, instr: &Instruction) -> String {
        let x = instr.x as usize;
        let y = instr.y as usize;
        match instr.kind {
            Kind::SeVxNn => format!("ctx.v[0x{:X}] == 0x{:02X}", x, instr.nn),
            Kind::SneVxNn => format!("ctx.v[0x{:X}] != 0x{:02X}", x, instr.nn),
            Kind::SeVxVy => format!("ctx.v[0x{:X}] == ctx.v[0x{:X}]", x, y),
            Kind::SneVxVy => format!("ctx.v[0x{:X}] != ctx.v[0x{:X}]", x, y),
            Kind::Skp => format!("ops::key_pressed(ctx, ctx.v[0x{:X}])", x),
            Kind::Sknp => format!("!ops::key_pressed(ctx, ctx.v[0x{:X}])", x),
            _ => unreachable!("not a branch"),
        }
    }

    /// Register a BNNN dispatch reads, honoring the jump_uses_vx quirk.
    fn computed_jump_register(&self, instr: &Instruction) -> u8 {
        if self.opts.quirks.jump_uses_vx {
            instr.x
        } else {
            0
        }
    }

    // ========================================================================
    // Per-function mode
    // ========================================================================

    fn generate_per_function(&self) -> Result<String, EmitError> {
        let mut e = Emitter::new();
        self.module_header(&mut e);

        for func in self.analysis.functions.values() {
            self.emit_function(&mut e, func)?;
            e.blank();
        }

        let entry_name = function_name(self.analysis.entry_point, &self.opts.prefix);

        e.line(&format!(
            "/// Program entry at 0x{:03X}.",
            self.analysis.entry_point
        ));
        e.open(&format!(
            "pub fn {}(ctx: &mut Context) {{",
            self.entry_symbol()
        ));
        e.line(&format!("{}(ctx)", entry_name));
        e.close("");
        e.blank();

        e.line("/// Install every routine into the process-wide dispatch table.");
        e.open(&format!("pub fn {}() {{", self.register_symbol()));
        for (&addr, _) in &self.analysis.functions {
            e.line(&format!(
                "dispatch::register(0x{:03X}, {});",
                addr,
                function_name(addr, &self.opts.prefix)
            ));
        }
        e.close("");

        Ok(e.finish())
    }

    /// All instruction addresses reachable from `entry`'s function,
    /// following calls and computed jumps transitively. Used by resume
    /// re-entry: a yield inside this set belongs to some callee of the
    /// corresponding call site.
    fn function_closure(&self, entry: u16) -> BTreeSet<u16> {
        let mut addrs = BTreeSet::new();
        let mut visited_funcs = BTreeSet::new();
        let mut worklist = VecDeque::from([entry]);

        while let Some(f_entry) = worklist.pop_front() {
            if !visited_funcs.insert(f_entry) {
                continue;
            }
            let Some(func) = self.analysis.functions.get(&f_entry) else {
                continue;
            };
            for &baddr in &func.block_addresses {
                let Some(block) = self.analysis.blocks.get(&baddr) else {
                    continue;
                };
                for &idx in &block.instruction_indices {
                    let instr = &self.analysis.instructions[idx];
                    addrs.insert(instr.address);
                    match instr.kind {
                        Kind::Call => worklist.push_back(instr.nnn),
                        Kind::JpV0 => {
                            for t in crate::cfg::computed_jump_targets(instr.nnn) {
                                if self.analysis.functions.contains_key(&t) {
                                    worklist.push_back(t);
                                }
                            }
                        }
                        Kind::Jp if !func.block_addresses.contains(&instr.nnn) => {
                            // tail call into another function
                            worklist.push_back(instr.nnn);
                        }
                        _ => {}
                    }
                }
            }
        }

        addrs
    }

    /// Resolve a control transfer from inside `func`.
    fn resolve_target(&self, func: &Function, target: u16) -> Result<Target, EmitError> {
        if func.block_addresses.contains(&target) {
            return Ok(Target::Local(target));
        }
        if self.analysis.functions.contains_key(&target) {
            return Ok(Target::Tail(target));
        }
        Err(EmitError::NeedsSingleFunction(format!(
            "0x{:03X} jumps to 0x{:03X}, which is neither local to {} nor a function entry",
            func.entry, target, func.name
        )))
    }

    fn emit_function(&self, e: &mut Emitter, func: &Function) -> Result<(), EmitError> {
        // Plan arm boundaries: block starts, call and computed-jump sites
        // (resume re-entry points), and every instruction of a looping block
        // (each needs its own resume arm).
        let mut arms: BTreeSet<u16> = func.block_addresses.iter().copied().collect();
        // (site address, transitive callee address set)
        let mut reentries: Vec<(u16, BTreeSet<u16>)> = Vec::new();

        for &baddr in &func.block_addresses {
            let block = &self.analysis.blocks[&baddr];
            let looping = self.looping_blocks.contains(&baddr);
            for &idx in &block.instruction_indices {
                let instr = &self.analysis.instructions[idx];
                if looping {
                    arms.insert(instr.address);
                }
                match instr.kind {
                    Kind::Call => {
                        if !self.analysis.functions.contains_key(&instr.nnn) {
                            return Err(EmitError::NeedsSingleFunction(format!(
                                "call to 0x{:03X}, which is not decoded code",
                                instr.nnn
                            )));
                        }
                        arms.insert(instr.address);
                        reentries.push((instr.address, self.function_closure(instr.nnn)));
                    }
                    Kind::JpV0 => {
                        let mut closure = BTreeSet::new();
                        for t in crate::cfg::computed_jump_targets(instr.nnn) {
                            if self.addr_to_idx.contains_key(&t) {
                                if !self.analysis.functions.contains_key(&t) {
                                    return Err(EmitError::NeedsSingleFunction(format!(
                                        "computed jump from base 0x{:03X} can reach 0x{:03X}, \
                                         which is not a function entry",
                                        instr.nnn, t
                                    )));
                                }
                                closure.extend(self.function_closure(t));
                            }
                        }
                        arms.insert(instr.address);
                        reentries.push((instr.address, closure));
                    }
                    Kind::LdVxK => {
                        arms.insert(instr.address);
                        if self.addr_to_idx.contains_key(&(instr.address + 2)) {
                            arms.insert(instr.address + 2);
                        }
                    }
                    Kind::Drw if self.opts.quirks.display_wait => {
                        if self.addr_to_idx.contains_key(&(instr.address + 2)) {
                            arms.insert(instr.address + 2);
                        }
                    }
                    _ => {}
                }
            }
        }

        // Emit the arms into a scratch buffer first; the prologue needs the
        // collected resume points.
        let mut body = Emitter::new();
        body.indent = 2;
        let mut resume_points: BTreeSet<u16> = BTreeSet::new();
        let mut halt_arms: BTreeSet<u16> = BTreeSet::new();
        let mut emitted_arms: BTreeSet<u16> = BTreeSet::new();

        for &baddr in func.block_addresses.iter().collect::<BTreeSet<_>>() {
            let block = &self.analysis.blocks[&baddr];
            let looping = self.looping_blocks.contains(&baddr);

            let block_arms: Vec<u16> = arms
                .iter()
                .copied()
                .filter(|a| *a >= block.start && *a < block.end)
                .collect();

            for (i, &arm_addr) in block_arms.iter().enumerate() {
                let arm_end = block_arms.get(i + 1).copied().unwrap_or(block.end);

                emitted_arms.insert(arm_addr);
                body.open(&format!("0x{:03X} => {{", arm_addr));
                self.emit_block_span(
                    &mut body,
                    func,
                    block,
                    arm_addr,
                    arm_end,
                    looping,
                    &mut resume_points,
                    &mut halt_arms,
                )?;
                body.close("");
            }
        }

        // Park arms for code that ran off the end of decoded bytes.
        for &addr in &halt_arms {
            emitted_arms.insert(addr);
            body.open(&format!("0x{:03X} => {{", addr));
            self.emit_park(&mut body, addr, &mut resume_points);
            body.close("");
        }

        // A yield can record a resume point on another function's entry
        // (a park or back-edge check right at a fall-through boundary).
        // Forward those through a tail call.
        let boundary: Vec<u16> = resume_points
            .iter()
            .copied()
            .filter(|p| !emitted_arms.contains(p))
            .collect();
        for p in boundary {
            match self.resolve_target(func, p)? {
                Target::Local(_) => {} // block starts always have arms
                Target::Tail(t) => {
                    emitted_arms.insert(p);
                    body.open(&format!("0x{:03X} => {{", p));
                    body.line(&format!("{}(ctx);", function_name(t, &self.opts.prefix)));
                    body.line("return;");
                    body.close("");
                }
            }
        }

        // Routine shell: prologue, dispatch loop, default arm.
        let name = function_name(func.entry, &self.opts.prefix);
        e.open(&format!("pub fn {}(ctx: &mut Context) {{", name));
        e.line(&format!("let mut ip: u16 = 0x{:03X};", func.entry));

        let have_reentries = reentries.iter().any(|(_, closure)| !closure.is_empty());
        if !resume_points.is_empty() || have_reentries {
            e.open("if ctx.should_yield {");
            e.open("match ctx.resume_pc {");
            if !resume_points.is_empty() {
                let pats: Vec<String> = resume_points
                    .iter()
                    .map(|a| format!("0x{:03X}", a))
                    .collect();
                e.open(&format!("{} => {{", pats.join(" | ")));
                e.line("ctx.should_yield = false;");
                e.line("ip = ctx.resume_pc;");
                e.close("");
            }
            for (site, closure) in &reentries {
                for (lo, hi) in compress_ranges(closure) {
                    // resume landed inside a callee: re-enter through the
                    // call site, its prologue finishes the job
                    e.line(&format!(
                        "0x{:03X}..=0x{:03X} => ip = 0x{:03X},",
                        lo, hi, site
                    ));
                }
            }
            e.line("_ => {}");
            e.close("");
            e.close("");
        }

        e.open("loop {");
        e.open("match ip {");
        e.out.push_str(&body.finish());
        e.line("_ => chip8_rt::panic_at(\"invalid instruction reached\", ip),");
        e.close("");
        e.close("");
        e.close("");

        Ok(())
    }

    /// Emit the instructions of `[arm_addr, arm_end)` inside `block`.
    #[allow(clippy::too_many_arguments)]
    fn emit_block_span(
        &self,
        e: &mut Emitter,
        func: &Function,
        block: &crate::cfg::BasicBlock,
        arm_addr: u16,
        arm_end: u16,
        looping: bool,
        resume_points: &mut BTreeSet<u16>,
        halt_arms: &mut BTreeSet<u16>,
    ) -> Result<(), EmitError> {
        let mut addr = arm_addr;
        while addr < arm_end {
            let instr = self
                .instr_at(addr)
                .expect("arm spans only decoded addresses");
            let next = addr + 2;
            let is_last_in_block = next >= block.end;

            self.comment_for(e, instr);

            match instr.kind {
                Kind::Jp => {
                    match self.resolve_target(func, instr.nnn)? {
                        Target::Local(t) => {
                            if looping {
                                self.emit_yield_check(e, t, resume_points);
                            }
                            e.line(&format!("ip = 0x{:03X};", t));
                        }
                        Target::Tail(t) => {
                            e.line(&format!(
                                "{}(ctx);",
                                function_name(t, &self.opts.prefix)
                            ));
                            e.line("return;");
                        }
                    }
                    return Ok(());
                }

                Kind::Ret => {
                    e.line("return;");
                    return Ok(());
                }

                Kind::JpV0 => {
                    e.line(&format!(
                        "dispatch::computed_jump(ctx, 0x{:03X}, 0x{:X});",
                        instr.nnn,
                        self.computed_jump_register(instr)
                    ));
                    e.line("return;");
                    return Ok(());
                }

                Kind::Call => {
                    e.line(&format!(
                        "{}(ctx);",
                        function_name(instr.nnn, &self.opts.prefix)
                    ));
                    e.open("if ctx.should_yield {");
                    e.line("return;");
                    e.close("");
                    if looping {
                        self.emit_yield_check(e, next, resume_points);
                    }
                }

                k if k.is_branch() => {
                    let cond = self.branch_condition(instr);
                    let skip = self.resolve_target(func, addr + 4)?;
                    let fall = self.resolve_target(func, addr + 2)?;

                    match (skip, fall) {
                        (Target::Local(s), Target::Local(f)) => {
                            e.line(&format!(
                                "ip = if {} {{ 0x{:03X} }} else {{ 0x{:03X} }};",
                                cond, s, f
                            ));
                            if looping {
                                self.emit_yield_check_dynamic(e, &[s, f], resume_points);
                            }
                        }
                        (skip, fall) => {
                            e.open(&format!("if {} {{", cond));
                            self.emit_goto(e, skip, looping, resume_points);
                            e.indent -= 1;
                            e.line("} else {");
                            e.indent += 1;
                            self.emit_goto(e, fall, looping, resume_points);
                            e.close("");
                        }
                    }
                    return Ok(());
                }

                Kind::LdVxK => {
                    e.line(&format!("ops::wait_key(ctx, 0x{:X});", instr.x));
                    if !self.addr_to_idx.contains_key(&next) {
                        halt_arms.insert(next);
                    }
                    self.emit_park(e, next, resume_points);
                    return Ok(());
                }

                Kind::Drw if self.opts.quirks.display_wait => {
                    self.emit_plain_instruction(e, instr);
                    if !self.addr_to_idx.contains_key(&next) {
                        halt_arms.insert(next);
                    }
                    self.emit_park(e, next, resume_points);
                    return Ok(());
                }

                _ => {
                    self.emit_plain_instruction(e, instr);
                    if looping {
                        self.emit_yield_check(e, next, resume_points);
                    }
                }
            }

            // fall off the end of the block without a terminator
            if is_last_in_block {
                if self.addr_to_idx.contains_key(&block.end) {
                    match self.resolve_target(func, block.end)? {
                        Target::Local(t) => {
                            e.line(&format!("ip = 0x{:03X};", t));
                        }
                        Target::Tail(t) => {
                            // fall-through across functions: tail call
                            e.line(&format!(
                                "{}(ctx);",
                                function_name(t, &self.opts.prefix)
                            ));
                            e.line("return;");
                        }
                    }
                } else {
                    if self.opts.emit_comments {
                        e.line("// fell off the end of decoded code");
                    }
                    halt_arms.insert(block.end);
                    self.emit_park(e, block.end, resume_points);
                }
                return Ok(());
            }

            addr = next;
        }

        // The arm ended at a split point inside the block; continue at the
        // next arm.
        e.line(&format!("ip = 0x{:03X};", arm_end));
        Ok(())
    }

    /// One side of a branch whose target may leave the routine.
    fn emit_goto(
        &self,
        e: &mut Emitter,
        target: Target,
        looping: bool,
        resume_points: &mut BTreeSet<u16>,
    ) {
        match target {
            Target::Local(t) => {
                if looping {
                    self.emit_yield_check(e, t, resume_points);
                }
                e.line(&format!("ip = 0x{:03X};", t));
            }
            Target::Tail(t) => {
                e.line(&format!("{}(ctx);", function_name(t, &self.opts.prefix)));
                e.line("return;");
            }
        }
    }

    // ========================================================================
    // Single-function mode
    // ========================================================================

    fn generate_single_function(&self) -> String {
        // Decoded code: the whole even-address stream, plus on-demand chains
        // for referenced targets that fall between the cracks (odd addresses
        // inside data, jump tables).
        let mut code: BTreeMap<u16, Instruction> = self
            .analysis
            .instructions
            .iter()
            .map(|i| (i.address, *i))
            .collect();

        let mut worklist: VecDeque<u16> = VecDeque::new();
        for instr in self.analysis.instructions.iter() {
            match instr.kind {
                Kind::Jp | Kind::Call => worklist.push_back(instr.nnn),
                Kind::JpV0 => {
                    worklist.extend(crate::cfg::computed_jump_targets(instr.nnn));
                }
                _ => {}
            }
        }

        let rom_end = 0x200 + self.rom.len() as u16;
        while let Some(target) = worklist.pop_front() {
            let mut addr = target;
            while !code.contains_key(&addr) && addr >= 0x200 && addr + 1 < rom_end {
                let off = (addr - 0x200) as usize;
                let opcode = (self.rom[off] as u16) << 8 | self.rom[off + 1] as u16;
                let instr = decode_word(opcode, addr);
                match instr.kind {
                    Kind::Jp | Kind::Call => worklist.push_back(instr.nnn),
                    Kind::JpV0 => {
                        worklist.extend(crate::cfg::computed_jump_targets(instr.nnn));
                    }
                    _ => {}
                }
                let stop = instr.is_terminator();
                code.insert(addr, instr);
                if stop {
                    break;
                }
                addr += 2;
            }
        }

        let mut e = Emitter::new();
        self.module_header(&mut e);

        let mut body = Emitter::new();
        body.indent = 2;
        let mut halt_arms: BTreeSet<u16> = BTreeSet::new();

        for (&addr, instr) in &code {
            body.open(&format!("0x{:03X} => {{", addr));
            self.emit_single_instruction(&mut body, instr, &code, &mut halt_arms);
            body.close("");
        }
        for &addr in &halt_arms {
            body.open(&format!("0x{:03X} => {{", addr));
            body.line(&format!("ctx.resume_pc = 0x{:03X};", addr));
            body.line("ctx.should_yield = true;");
            body.line("return;");
            body.close("");
        }

        e.line(&format!(
            "/// Program entry at 0x{:03X}; the whole ROM lives in this routine.",
            self.analysis.entry_point
        ));
        e.open(&format!(
            "pub fn {}(ctx: &mut Context) {{",
            self.entry_symbol()
        ));
        e.line(&format!("let mut ip: u16 = 0x{:03X};", self.analysis.entry_point));
        e.open("if ctx.should_yield {");
        e.line("ctx.should_yield = false;");
        e.line("ip = ctx.resume_pc;");
        e.close("");
        e.open("loop {");
        e.open("match ip {");
        e.out.push_str(&body.finish());
        e.line("_ => chip8_rt::panic_at(\"invalid instruction reached\", ip),");
        e.close("");
        e.close("");
        e.close("");
        e.blank();

        e.line("/// Install the entry routine into the process-wide dispatch table.");
        e.open(&format!("pub fn {}() {{", self.register_symbol()));
        e.line(&format!(
            "dispatch::register(0x{:03X}, {});",
            self.analysis.entry_point,
            self.entry_symbol()
        ));
        e.close("");

        e.finish()
    }

    /// Whether a single-function-mode instruction carries yield checks:
    /// anything inside a looping analysis block, and every on-demand chain
    /// instruction (their loop structure is unknown, so play it safe).
    fn single_mode_looping(&self, addr: u16) -> bool {
        match self.analysis.block_containing(addr) {
            Some(block) => self.looping_blocks.contains(&block.start),
            None => true,
        }
    }

    fn emit_single_instruction(
        &self,
        e: &mut Emitter,
        instr: &Instruction,
        code: &BTreeMap<u16, Instruction>,
        halt_arms: &mut BTreeSet<u16>,
    ) {
        let addr = instr.address;
        let next = addr + 2;
        let looping = self.single_mode_looping(addr);
        let mut scratch = BTreeSet::new(); // resume arms are implicit here

        self.comment_for(e, instr);

        match instr.kind {
            Kind::Jp => {
                if looping {
                    self.emit_yield_check(e, instr.nnn, &mut scratch);
                }
                e.line(&format!("ip = 0x{:03X};", instr.nnn));
                return;
            }

            Kind::Call => {
                e.open("if (ctx.sp as usize) >= chip8_rt::context::STACK_SIZE {");
                e.line(&format!(
                    "chip8_rt::panic_at(\"stack overflow on CALL\", 0x{:03X});",
                    addr
                ));
                e.close("");
                e.line(&format!("ctx.stack[ctx.sp as usize] = 0x{:03X};", next));
                e.line("ctx.sp += 1;");
                if looping {
                    self.emit_yield_check(e, instr.nnn, &mut scratch);
                }
                e.line(&format!("ip = 0x{:03X};", instr.nnn));
                return;
            }

            Kind::Ret => {
                e.open("if ctx.sp == 0 {");
                e.line(&format!(
                    "chip8_rt::panic_at(\"stack underflow on RET\", 0x{:03X});",
                    addr
                ));
                e.close("");
                e.line("ctx.sp -= 1;");
                e.line("ip = ctx.stack[ctx.sp as usize];");
                if looping {
                    self.emit_yield_check_dynamic(e, &[], &mut scratch);
                }
                return;
            }

            Kind::JpV0 => {
                let base = instr.nnn;
                e.line(&format!(
                    "let target = 0x{:03X}u16.wrapping_add(ctx.v[0x{:X}] as u16);",
                    base,
                    self.computed_jump_register(instr)
                ));
                e.open(&format!(
                    "if !(0x{:03X}..0x{:03X}).contains(&target) {{",
                    base,
                    base + 32
                ));
                e.line("chip8_rt::panic_at(\"computed jump outside table\", target);");
                e.close("");
                e.line("ip = target;");
                if looping {
                    self.emit_yield_check_dynamic(e, &[], &mut scratch);
                }
                return;
            }

            k if k.is_branch() => {
                let cond = self.branch_condition(instr);
                e.line(&format!(
                    "ip = if {} {{ 0x{:03X} }} else {{ 0x{:03X} }};",
                    cond,
                    addr + 4,
                    addr + 2
                ));
                if looping {
                    self.emit_yield_check_dynamic(e, &[], &mut scratch);
                }
                return;
            }

            Kind::LdVxK => {
                e.line(&format!("ops::wait_key(ctx, 0x{:X});", instr.x));
                if !code.contains_key(&next) {
                    halt_arms.insert(next);
                }
                self.emit_park(e, next, &mut scratch);
                return;
            }

            Kind::Drw if self.opts.quirks.display_wait => {
                self.emit_plain_instruction(e, instr);
                if !code.contains_key(&next) {
                    halt_arms.insert(next);
                }
                self.emit_park(e, next, &mut scratch);
                return;
            }

            _ => {
                self.emit_plain_instruction(e, instr);
                if looping {
                    self.emit_yield_check(e, next, &mut scratch);
                }
            }
        }

        if code.contains_key(&next) {
            e.line(&format!("ip = 0x{:03X};", next));
        } else {
            if self.opts.emit_comments {
                e.line("// fell off the end of decoded code");
            }
            halt_arms.insert(next);
            self.emit_park(e, next, &mut scratch);
        }
    }
}

/// Compress a set of addresses into inclusive ranges, merging gaps of one
/// instruction.
fn compress_ranges(addrs: &BTreeSet<u16>) -> Vec<(u16, u16)> {
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for &a in addrs {
        match ranges.last_mut() {
            Some((_, hi)) if a <= *hi + 2 => *hi = a,
            _ => ranges.push((a, a)),
        }
    }
    ranges
}

// ============================================================================
// Project scaffolding
// ============================================================================

/// The generated crate root: module declarations plus the entry re-exports.
/// Fills the role of the header file in a C emission.
pub fn generate_lib(options: &EmitOptions) -> String {
    let name = &options.rom_name;
    let entry = if options.prefix.is_empty() {
        "entry".to_string()
    } else {
        format!("{}_entry", options.prefix)
    };
    let hook = if options.prefix.is_empty() {
        "register_functions".to_string()
    } else {
        format!("{}_register_functions", options.prefix)
    };

    let mut out = String::new();
    out.push_str(&format!("// lib.rs - recompiled {}\n//\n// {}\n\n", name, GENERATED_NOTICE));
    out.push_str(&format!("pub mod {};\n", name));
    if options.embed_rom_data {
        out.push_str(&format!("pub mod {}_rom;\n", name));
    }
    out.push('\n');
    out.push_str(&format!("pub use {}::{{{}, {}}};\n", name, entry, hook));
    if options.embed_rom_data {
        out.push_str(&format!("pub use {}_rom::ROM_DATA;\n", name));
    }
    out
}

/// The embedded ROM image as a Rust byte array.
pub fn generate_rom_data(rom_data: &[u8], options: &EmitOptions) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "// {}_rom.rs - embedded ROM image ({} bytes)\n//\n// {}\n\n",
        options.rom_name,
        rom_data.len(),
        GENERATED_NOTICE
    ));
    out.push_str(&format!(
        "pub static ROM_DATA: [u8; {}] = [\n",
        rom_data.len()
    ));
    for chunk in rom_data.chunks(12) {
        out.push_str("    ");
        for b in chunk {
            out.push_str(&format!("0x{:02X}, ", b));
        }
        out.pop();
        out.push('\n');
    }
    out.push_str("];\n");
    out
}

/// The generated launcher. Headless by default; a windowed build swaps in
/// its own Platform implementation.
pub fn generate_main(options: &EmitOptions) -> String {
    let name = &options.rom_name;
    let entry = if options.prefix.is_empty() {
        "entry".to_string()
    } else {
        format!("{}_entry", options.prefix)
    };
    let hook = if options.prefix.is_empty() {
        "register_functions".to_string()
    } else {
        format!("{}_register_functions", options.prefix)
    };
    let rom_expr = if options.embed_rom_data {
        "&ROM_DATA"
    } else {
        "&[]"
    };
    let rom_use = if options.embed_rom_data {
        format!("use {}::{{{}, {}, ROM_DATA}};\n", name, entry, hook)
    } else {
        format!("use {}::{{{}, {}}};\n", name, entry, hook)
    };

    format!(
        r#"// main.rs - launcher for {title}
//
// {notice}

use chip8_rt::headless::HeadlessPlatform;
use chip8_rt::{{run, RunConfig}};

{rom_use}
fn main() {{
    // `--frames N` bounds a headless run; 0 runs until quit.
    let frames = std::env::args()
        .skip_while(|a| a != "--frames")
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    {hook}();

    let config = RunConfig {{
        title: "{title}",
        cpu_hz: {cpu_hz},
        rom: {rom_expr},
        ..Default::default()
    }};

    let mut platform = HeadlessPlatform::new(frames);
    if let Err(e) = run({entry}, &config, &mut platform) {{
        eprintln!("error: {{e}}");
        std::process::exit(1);
    }}
}}
"#,
        title = options.title,
        notice = GENERATED_NOTICE,
        rom_use = rom_use,
        hook = hook,
        entry = entry,
        cpu_hz = options.recommended_cpu_hz,
        rom_expr = rom_expr,
    )
}

/// The generated build file.
pub fn generate_cargo(options: &EmitOptions) -> String {
    format!(
        r#"# Cargo.toml - {name}
# {notice}

[package]
name = "{name}"
version = "0.1.0"
edition = "2021"

[dependencies]
chip8-rt = {{ path = "{runtime}" }}
"#,
        name = options.rom_name,
        notice = GENERATED_NOTICE,
        runtime = options.runtime_path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::analyze;
    use crate::decode::decode_rom;

    fn emit(bytes: &[u8], opts: &EmitOptions) -> GeneratedOutput {
        let analysis = analyze(decode_rom(bytes, 0x200), 0x200);
        generate(&analysis, bytes, opts).expect("emission")
    }

    fn emit_source(bytes: &[u8], opts: &EmitOptions) -> String {
        let analysis = analyze(decode_rom(bytes, 0x200), 0x200);
        generate_source(&analysis, bytes, opts).expect("emission")
    }

    fn assert_contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "expected emitted code to contain {needle:?}\n---\n{haystack}"
        );
    }

    fn assert_order(haystack: &str, first: &str, second: &str) {
        let a = haystack.find(first).unwrap_or_else(|| panic!("missing {first:?}"));
        let b = haystack
            .find(second)
            .unwrap_or_else(|| panic!("missing {second:?}"));
        assert!(a < b, "{first:?} must precede {second:?}");
    }

    #[test]
    fn minimal_loop_emits_yield_and_back_edge() {
        let src = emit_source(&[0x12, 0x00], &EmitOptions::default());
        assert_contains(&src, "pub fn func_0x200(ctx: &mut Context)");
        assert_contains(&src, "ctx.cycles_remaining -= 1;");
        assert_contains(&src, "ctx.resume_pc = 0x200;");
        assert_contains(&src, "ip = 0x200;");
        assert_contains(&src, "pub fn entry(ctx: &mut Context)");
        assert_contains(&src, "dispatch::register(0x200, func_0x200);");
    }

    #[test]
    fn forward_only_code_has_no_yield_checks() {
        // CLS; LD VA,0x05 — no loop, parks at the end
        let src = emit_source(&[0x00, 0xE0, 0x6A, 0x05], &EmitOptions::default());
        assert!(!src.contains("ctx.cycles_remaining -= 1;"));
        assert_contains(&src, "ops::clear_display(ctx);");
        assert_contains(&src, "ctx.v[0xA] = 0x05;");
        assert_contains(&src, "ctx.resume_pc = 0x204;");
        assert_contains(&src, "0x204 => {");
    }

    #[test]
    fn add_with_carry_writes_vf_last() {
        let src = emit_source(
            &[0x60, 0xFF, 0x61, 0x01, 0x80, 0x14, 0x12, 0x06],
            &EmitOptions::default(),
        );
        assert_order(
            &src,
            "ctx.v[0x0] = sum as u8;",
            "ctx.v[0xF] = (sum > 0xFF) as u8;",
        );
    }

    #[test]
    fn sub_flag_ordering_and_value() {
        // SUB V0,V1 then loop
        let src = emit_source(&[0x80, 0x15, 0x12, 0x02], &EmitOptions::default());
        assert_order(
            &src,
            "let no_borrow = ctx.v[0x0] >= ctx.v[0x1];",
            "ctx.v[0xF] = no_borrow as u8;",
        );
        assert_order(
            &src,
            "ctx.v[0x0] = ctx.v[0x0].wrapping_sub(ctx.v[0x1]);",
            "ctx.v[0xF] = no_borrow as u8;",
        );
    }

    #[test]
    fn vf_reset_quirk_toggles_logic_ops() {
        let rom = [0x81, 0x21, 0x12, 0x02]; // OR V1,V2; loop
        let with = emit_source(&rom, &EmitOptions::default());
        assert_order(&with, "ctx.v[0x1] |= ctx.v[0x2];", "ctx.v[0xF] = 0;");

        let mut opts = EmitOptions::default();
        opts.quirks.vf_reset = false;
        let without = emit_source(&rom, &opts);
        assert!(!without.contains("ctx.v[0xF] = 0;"));
    }

    #[test]
    fn shift_quirk_selects_source_register() {
        let rom = [0x81, 0x26, 0x12, 0x02]; // SHR V1 (VY=V2); loop
        let modern = emit_source(&rom, &EmitOptions::default());
        assert_contains(&modern, "let src = ctx.v[0x1];");

        let mut opts = EmitOptions::default();
        opts.quirks.shift_uses_vy = true;
        let cosmac = emit_source(&rom, &opts);
        assert_contains(&cosmac, "let src = ctx.v[0x2];");
    }

    #[test]
    fn memory_quirk_controls_i_increment() {
        let rom = [0xF3, 0x55, 0x12, 0x02];
        let inc = emit_source(&rom, &EmitOptions::default());
        assert_contains(&inc, "ops::store_registers(ctx, 0x3, true);");

        let mut opts = EmitOptions::default();
        opts.quirks.memory_increment_i = false;
        let no_inc = emit_source(&rom, &opts);
        assert_contains(&no_inc, "ops::store_registers(ctx, 0x3, false);");
    }

    #[test]
    fn skip_emits_both_successors() {
        // SE V0,0x01; LD V1,0x02; JP 0x204
        let src = emit_source(&[0x30, 0x01, 0x61, 0x02, 0x12, 0x04], &EmitOptions::default());
        assert_contains(
            &src,
            "ip = if ctx.v[0x0] == 0x01 { 0x204 } else { 0x202 };",
        );
    }

    #[test]
    fn call_and_ret_become_native_call_and_return() {
        // CALL 0x206; JP 0x202; (pad); RET
        let src = emit_source(
            &[0x22, 0x06, 0x12, 0x02, 0x00, 0x00, 0x00, 0xEE],
            &EmitOptions::default(),
        );
        assert_contains(&src, "pub fn func_0x206(ctx: &mut Context)");
        assert_contains(&src, "func_0x206(ctx);");
        assert_contains(&src, "if ctx.should_yield {");
        assert_contains(&src, "dispatch::register(0x206, func_0x206);");
        // the callee body returns
        let callee = src.split("pub fn func_0x206").nth(1).unwrap();
        assert!(callee.contains("return;"));
    }

    #[test]
    fn wait_key_parks_until_release() {
        let src = emit_source(&[0xF5, 0x0A, 0x12, 0x02], &EmitOptions::default());
        assert_contains(&src, "ops::wait_key(ctx, 0x5);");
        assert_contains(&src, "ctx.resume_pc = 0x202;");
        assert_contains(&src, "ctx.should_yield = true;");
    }

    #[test]
    fn computed_jump_needs_function_targets() {
        // LD V0,4; JP V0,0x300 — 0x300 is outside the ROM, so no decoded
        // slot exists and emission succeeds with a dispatch call.
        let src = emit_source(&[0x60, 0x04, 0xB3, 0x00], &EmitOptions::default());
        assert_contains(&src, "dispatch::computed_jump(ctx, 0x300, 0x0);");
    }

    #[test]
    fn computed_jump_into_plain_code_falls_back() {
        // JP V0,0x204 where 0x204 is decoded but not a function entry
        let rom = [0x60, 0x00, 0xB2, 0x04, 0x60, 0x01, 0x12, 0x06];
        let analysis = analyze(decode_rom(&rom, 0x200), 0x200);
        let err = generate_source(&analysis, &rom, &EmitOptions::default()).unwrap_err();
        assert!(matches!(err, EmitError::NeedsSingleFunction(_)));
    }

    #[test]
    fn jump_uses_vx_quirk_changes_register() {
        let mut opts = EmitOptions::default();
        opts.quirks.jump_uses_vx = true;
        let src = emit_source(&[0x60, 0x04, 0xB3, 0x00], &opts);
        assert_contains(&src, "dispatch::computed_jump(ctx, 0x300, 0x3);");
    }

    #[test]
    fn single_function_mode_uses_software_stack() {
        let mut opts = EmitOptions::default();
        opts.single_function_mode = true;
        let src = emit_source(
            &[0x22, 0x06, 0x12, 0x02, 0x00, 0x00, 0x00, 0xEE],
            &opts,
        );
        assert_contains(&src, "pub fn entry(ctx: &mut Context)");
        assert_contains(&src, "ctx.stack[ctx.sp as usize] = 0x202;");
        assert_contains(&src, "ctx.sp += 1;");
        assert_contains(&src, "stack overflow on CALL");
        assert_contains(&src, "stack underflow on RET");
        assert_contains(&src, "ip = ctx.stack[ctx.sp as usize];");
        assert_contains(&src, "dispatch::register(0x200, entry);");
    }

    #[test]
    fn single_function_mode_range_checks_computed_jumps() {
        let mut opts = EmitOptions::default();
        opts.single_function_mode = true;
        let src = emit_source(&[0x60, 0x04, 0xB2, 0x04, 0x12, 0x00, 0x00, 0xE0], &opts);
        assert_contains(&src, "let target = 0x204u16.wrapping_add(ctx.v[0x0] as u16);");
        assert_contains(&src, "if !(0x204..0x224).contains(&target) {");
        assert_contains(&src, "computed jump outside table");
    }

    #[test]
    fn comments_follow_options() {
        let rom = [0x6A, 0x05, 0x12, 0x02];
        let full = emit_source(&rom, &EmitOptions::default());
        assert_contains(&full, "// 200: 6A05  LD   VA, 0x05");

        let mut opts = EmitOptions::default();
        opts.emit_address_comments = false;
        let no_addr = emit_source(&rom, &opts);
        assert_contains(&no_addr, "// 6A05  LD   VA, 0x05");

        opts.emit_comments = false;
        let none = emit_source(&rom, &opts);
        assert!(!none.contains("LD   VA"));
    }

    #[test]
    fn prefixed_symbols_for_batch_mode() {
        let mut opts = EmitOptions::default();
        opts.prefix = "pong".to_string();
        opts.rom_name = "pong".to_string();
        let src = emit_source(&[0x12, 0x00], &opts);
        assert_contains(&src, "pub fn pong_func_0x200(ctx: &mut Context)");
        assert_contains(&src, "pub fn pong_entry(ctx: &mut Context)");
        assert_contains(&src, "pub fn pong_register_functions()");
        assert_contains(&src, "dispatch::register(0x200, pong_func_0x200);");
    }

    #[test]
    fn generated_project_has_all_five_artifacts() {
        let mut opts = EmitOptions::default();
        opts.rom_name = "demo".to_string();
        opts.title = "Demo".to_string();
        let out = emit(&[0x12, 0x00], &opts);

        assert_eq!(out.header_file, "src/lib.rs");
        assert_eq!(out.source_file, "src/demo.rs");
        assert_eq!(out.rom_data_file, "src/demo_rom.rs");
        assert_eq!(out.main_file, "src/main.rs");
        assert_eq!(out.cargo_file, "Cargo.toml");

        assert_contains(&out.header_content, "pub mod demo;");
        assert_contains(&out.header_content, "pub use demo::{entry, register_functions};");
        assert_contains(&out.rom_data_content, "pub static ROM_DATA: [u8; 2] = [");
        assert_contains(&out.rom_data_content, "0x12, 0x00");
        assert_contains(&out.main_content, "register_functions();");
        assert_contains(&out.main_content, "run(entry, &config, &mut platform)");
        assert_contains(&out.cargo_content, "name = \"demo\"");
        assert_contains(&out.cargo_content, "chip8-rt = { path = ");
    }

    #[test]
    fn write_output_creates_project_tree() {
        let mut opts = EmitOptions::default();
        opts.rom_name = "treecheck".to_string();
        let out = emit(&[0x12, 0x00], &opts);

        let dir = std::env::temp_dir().join(format!("chip8recomp-{}-tree", std::process::id()));
        write_output(&out, &dir).unwrap();
        assert!(dir.join("Cargo.toml").exists());
        assert!(dir.join("src/lib.rs").exists());
        assert!(dir.join("src/treecheck.rs").exists());
        assert!(dir.join("src/treecheck_rom.rs").exists());
        assert!(dir.join("src/main.rs").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn display_wait_quirk_parks_after_draw() {
        let mut opts = EmitOptions::default();
        opts.quirks.display_wait = true;
        let src = emit_source(&[0xD0, 0x11, 0x12, 0x02], &opts);
        assert_order(
            &src,
            "ops::draw_sprite(ctx, 0x0, 0x1, 0x1, false);",
            "ctx.resume_pc = 0x202;",
        );
    }

    #[test]
    fn compress_ranges_merges_adjacent_addresses() {
        let set: BTreeSet<u16> = [0x200, 0x202, 0x204, 0x20A, 0x20C].into_iter().collect();
        assert_eq!(compress_ranges(&set), vec![(0x200, 0x204), (0x20A, 0x20C)]);
    }
}
