// cfg.rs - control flow analysis
//
// Builds basic blocks and functions from the decoded instruction stream.
// Analysis never fails: unreachable or unclassifiable addresses are
// tolerated and reported through the statistics.

use crate::decode::{Instruction, Kind};

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A maximal straight-line run of instructions: control enters only at
/// `start`, leaves only at the last instruction.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Start address.
    pub start: u16,
    /// One past the last byte.
    pub end: u16,
    /// Indices into the analysis instruction vector.
    pub instruction_indices: Vec<usize>,
    /// Possible successor addresses.
    pub successors: Vec<u16>,
    /// Blocks that can transfer here.
    pub predecessors: Vec<u16>,
    /// Skip targets inside this block's range.
    pub internal_labels: BTreeSet<u16>,
    /// Target of a CALL (or the program entry).
    pub is_function_entry: bool,
    /// In the closure of `{entry} + call targets` under successors.
    pub is_reachable: bool,
}

/// A call target and the blocks reachable from it without crossing another
/// call target.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub entry: u16,
    pub block_addresses: Vec<u16>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub total_instructions: usize,
    pub total_blocks: usize,
    pub total_functions: usize,
    pub unreachable_instructions: usize,
}

/// Everything the emitter needs to know about a program.
#[derive(Debug, Default)]
pub struct Analysis {
    pub instructions: Vec<Instruction>,
    pub entry_point: u16,
    /// Blocks keyed by start address.
    pub blocks: BTreeMap<u16, BasicBlock>,
    /// Functions keyed by entry address.
    pub functions: BTreeMap<u16, Function>,
    /// Every skip target and jump target.
    pub label_addresses: BTreeSet<u16>,
    /// Every CALL target plus the entry point.
    pub call_targets: BTreeSet<u16>,
    /// Bases of BNNN computed jumps.
    pub computed_jump_bases: BTreeSet<u16>,
    pub stats: Stats,
}

impl Analysis {
    /// The block containing `address`, if any.
    pub fn block_containing(&self, address: u16) -> Option<&BasicBlock> {
        self.blocks
            .range(..=address)
            .next_back()
            .map(|(_, b)| b)
            .filter(|b| address >= b.start && address < b.end)
    }
}

/// `{prefix}_func_0xHHH`, or `func_0xHHH` with an empty prefix.
pub fn function_name(address: u16, prefix: &str) -> String {
    if prefix.is_empty() {
        format!("func_0x{:03X}", address)
    } else {
        format!("{}_func_0x{:03X}", prefix, address)
    }
}

/// `label_0xHHH`.
pub fn label_name(address: u16) -> String {
    format!("label_0x{:03X}", address)
}

/// The 16 two-byte slots a BNNN jump from `base` is assumed to target.
///
/// Empirical heuristic: real ROMs keep their jump tables short. A wider
/// table shows up as a dispatch miss at run time, cured by single-function
/// mode.
pub fn computed_jump_targets(base: u16) -> BTreeSet<u16> {
    (0..16).map(|i| base + i * 2).collect()
}

/// Analyze a decoded program starting from `entry_point`.
pub fn analyze(instructions: Vec<Instruction>, entry_point: u16) -> Analysis {
    let mut result = Analysis {
        entry_point,
        stats: Stats {
            total_instructions: instructions.len(),
            ..Stats::default()
        },
        ..Analysis::default()
    };

    if instructions.is_empty() {
        result.instructions = instructions;
        return result;
    }

    let addr_to_idx: BTreeMap<u16, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.address, i))
        .collect();

    // Pass 1: collect jump/branch/call targets.
    result.call_targets.insert(entry_point);

    for instr in &instructions {
        match instr.kind {
            Kind::Jp => {
                result.label_addresses.insert(instr.nnn);
            }
            Kind::Call => {
                result.call_targets.insert(instr.nnn);
                result.label_addresses.insert(instr.nnn);
            }
            Kind::JpV0 => {
                result.computed_jump_bases.insert(instr.nnn);
            }
            k if k.is_branch() => {
                // both the possibly-skipped instruction and the skip target
                result.label_addresses.insert(instr.address + 2);
                result.label_addresses.insert(instr.address + 4);
            }
            _ => {}
        }
    }

    // Pass 2: block starts are the entry, all labels, all call targets, and
    // whatever follows a terminator.
    let mut block_starts: BTreeSet<u16> = BTreeSet::new();
    block_starts.insert(entry_point);
    block_starts.extend(result.label_addresses.iter().copied());
    block_starts.extend(result.call_targets.iter().copied());
    for instr in &instructions {
        if instr.is_terminator() && addr_to_idx.contains_key(&(instr.address + 2)) {
            block_starts.insert(instr.address + 2);
        }
    }

    // Pass 2b: walk each start forward to build the block.
    for &start in &block_starts {
        let Some(&start_idx) = addr_to_idx.get(&start) else {
            continue; // address not decoded (odd target or outside the ROM)
        };

        let mut block = BasicBlock {
            start,
            is_function_entry: result.call_targets.contains(&start),
            ..BasicBlock::default()
        };

        let mut idx = start_idx;
        while idx < instructions.len() {
            let instr = &instructions[idx];

            if instr.address != start && block_starts.contains(&instr.address) {
                break; // runs into the next block
            }

            block.instruction_indices.push(idx);
            block.end = instr.address + 2;

            if instr.is_jump() {
                if instr.kind == Kind::Jp {
                    block.successors.push(instr.nnn);
                }
                // JP V0 successors are resolved at emission
                break;
            } else if instr.is_return() {
                break;
            } else if instr.is_branch() {
                block.successors.push(instr.address + 2);
                block.successors.push(instr.address + 4);
                block.internal_labels.insert(instr.address + 4);
                break;
            }

            idx += 1;
        }

        // fall-through successor for a block that ran into the next start
        if let Some(&last_idx) = block.instruction_indices.last() {
            let last = &instructions[last_idx];
            if !last.is_terminator() && !last.is_branch() && addr_to_idx.contains_key(&block.end) {
                block.successors.push(block.end);
            }
        }

        result.blocks.insert(start, block);
    }

    result.stats.total_blocks = result.blocks.len();

    // Pass 3: predecessors are the transpose of successors.
    let edges: Vec<(u16, u16)> = result
        .blocks
        .iter()
        .flat_map(|(&addr, b)| b.successors.iter().map(move |&s| (addr, s)))
        .collect();
    for (from, to) in edges {
        if let Some(block) = result.blocks.get_mut(&to) {
            block.predecessors.push(from);
        }
    }

    // Pass 4: reachability, BFS from the entry and every call target.
    let mut worklist: VecDeque<u16> = VecDeque::new();
    worklist.push_back(entry_point);
    worklist.extend(result.call_targets.iter().copied());

    while let Some(addr) = worklist.pop_front() {
        let Some(block) = result.blocks.get_mut(&addr) else {
            continue;
        };
        if block.is_reachable {
            continue;
        }
        block.is_reachable = true;
        let succs = block.successors.clone();
        worklist.extend(succs);
    }

    // Pass 5: partition blocks into functions. BFS from each call target,
    // never crossing into another call target: an entry dominates its own
    // function. Blocks reached only by fall-through from elsewhere may be
    // shared; the emitter resolves that with tail calls.
    for &target in &result.call_targets {
        if !result.blocks.contains_key(&target) {
            continue;
        }

        let mut visited: BTreeSet<u16> = BTreeSet::new();
        let mut block_addresses = Vec::new();
        let mut func_worklist = VecDeque::from([target]);

        while let Some(addr) = func_worklist.pop_front() {
            if visited.contains(&addr) || !result.blocks.contains_key(&addr) {
                continue;
            }
            if addr != target && result.call_targets.contains(&addr) {
                continue;
            }
            visited.insert(addr);
            block_addresses.push(addr);
            func_worklist.extend(result.blocks[&addr].successors.iter().copied());
        }

        result.functions.insert(
            target,
            Function {
                name: function_name(target, ""),
                entry: target,
                block_addresses,
            },
        );
    }

    result.stats.total_functions = result.functions.len();

    for block in result.blocks.values() {
        if !block.is_reachable {
            result.stats.unreachable_instructions += block.instruction_indices.len();
        }
    }

    result.instructions = instructions;
    result
}

/// Human-readable summary for `--debug`.
pub fn print_analysis_summary(result: &Analysis) {
    println!("\n=== Analysis Summary ===\n");
    println!("Statistics:");
    println!("  Total instructions: {}", result.stats.total_instructions);
    println!("  Total basic blocks: {}", result.stats.total_blocks);
    println!("  Total functions: {}", result.stats.total_functions);
    println!(
        "  Unreachable instructions: {}",
        result.stats.unreachable_instructions
    );

    println!("\nFunctions:");
    for (addr, func) in &result.functions {
        println!(
            "  {} @ 0x{:03X} ({} blocks)",
            func.name,
            addr,
            func.block_addresses.len()
        );
    }

    println!("\nLabels needed: {}", result.label_addresses.len());
    for &addr in &result.label_addresses {
        println!("  {}", label_name(addr));
    }

    if !result.computed_jump_bases.is_empty() {
        println!("\nComputed jumps (JP V0):");
        for &base in &result.computed_jump_bases {
            println!("  base 0x{:03X}", base);
        }
    }
    println!();
}
