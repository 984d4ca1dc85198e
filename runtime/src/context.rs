// context.rs - CHIP-8 machine state
//
// The Context struct is passed to every recompiled routine. It holds the
// registers, memory, display buffer and the cooperative-yield bookkeeping
// the generated code relies on.

/// Total addressable memory (4KB)
pub const MEMORY_SIZE: usize = 4096;

/// Maximum call stack depth
pub const STACK_SIZE: usize = 16;

/// General-purpose registers V0-VF
pub const NUM_REGISTERS: usize = 16;

/// Display width in pixels
pub const DISPLAY_WIDTH: usize = 64;

/// Display height in pixels
pub const DISPLAY_HEIGHT: usize = 32;

/// Total display size in pixels
pub const DISPLAY_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT;

/// Number of keys on the hex keypad
pub const NUM_KEYS: usize = 16;

/// Program load address
pub const PROGRAM_START: u16 = 0x200;

/// Built-in font start address
pub const FONT_START: u16 = 0x050;

/// Bytes per font glyph
pub const FONT_CHAR_SIZE: u16 = 5;

/// Timer frequency in Hz
pub const TIMER_FREQ_HZ: u32 = 60;

/// Default CPU frequency in Hz
pub const DEFAULT_CPU_HZ: u32 = 700;

/// Standard 4x5 hex font, one glyph per character 0-F.
pub const FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// CHIP-8 machine state.
///
/// One instance exists per running ROM. The recompiled routines mutate it
/// directly; the main loop owns timers, input and rendering.
#[derive(Clone)]
pub struct Context {
    /// General-purpose registers; V\[0xF\] is the flag register.
    pub v: [u8; NUM_REGISTERS],
    /// Index register, 12-bit effective.
    pub i: u16,
    /// Program counter. Diagnostic only once recompiled.
    pub pc: u16,
    /// Stack pointer (0..=15), used by single-function-mode code.
    pub sp: u8,

    /// Delay timer, decremented at 60Hz.
    pub delay_timer: u8,
    /// Sound timer, decremented at 60Hz; beep while > 0.
    pub sound_timer: u8,

    /// Main memory: font, program, working RAM.
    pub memory: [u8; MEMORY_SIZE],
    /// Return-address stack for subroutines.
    pub stack: [u16; STACK_SIZE],

    /// 64x32 monochrome display, one byte per pixel (0 or 1),
    /// indexed `display[y * DISPLAY_WIDTH + x]`.
    pub display: [u8; DISPLAY_SIZE],
    /// Set whenever the display buffer changed; cleared by the renderer.
    pub display_dirty: bool,

    /// Current key state for keys 0x0-0xF.
    pub keys: [bool; NUM_KEYS],
    /// Key state at the start of the frame, for edge detection.
    pub keys_prev: [bool; NUM_KEYS],
    /// Key released this frame, or -1.
    pub last_key_released: i8,

    /// Program keeps running while true.
    pub running: bool,
    /// Execution is blocked on a key release (FX0A).
    pub waiting_for_key: bool,
    /// Register that receives the awaited key.
    pub key_wait_register: u8,

    /// Instruction budget left in the current frame.
    pub cycles_remaining: i32,
    /// Address to resume from after a yield.
    pub resume_pc: u16,
    /// Entry routine must return control to the main loop.
    pub should_yield: bool,

    /// Total instructions executed.
    pub instruction_count: u64,
    /// Frames completed.
    pub frame_count: u64,
}

impl Context {
    /// Fresh machine with the font loaded at [`FONT_START`].
    pub fn new() -> Self {
        let mut ctx = Context {
            v: [0; NUM_REGISTERS],
            i: 0,
            pc: PROGRAM_START,
            sp: 0,
            delay_timer: 0,
            sound_timer: 0,
            memory: [0; MEMORY_SIZE],
            stack: [0; STACK_SIZE],
            display: [0; DISPLAY_SIZE],
            display_dirty: false,
            keys: [false; NUM_KEYS],
            keys_prev: [false; NUM_KEYS],
            last_key_released: -1,
            running: true,
            waiting_for_key: false,
            key_wait_register: 0,
            cycles_remaining: 0,
            resume_pc: 0,
            should_yield: false,
            instruction_count: 0,
            frame_count: 0,
        };
        ctx.memory[FONT_START as usize..FONT_START as usize + FONT.len()].copy_from_slice(&FONT);
        ctx
    }

    /// Reset registers, stack, display, timers, yield state and the
    /// instruction/frame counters.
    ///
    /// Memory above the font area is cleared too; callers reload the program
    /// afterwards. The font at [`FONT_START`] stays intact.
    pub fn reset(&mut self) {
        *self = Context::new();
    }

    /// Copy program bytes into memory at [`PROGRAM_START`].
    ///
    /// Returns false if the program does not fit.
    pub fn load_program(&mut self, program: &[u8]) -> bool {
        let start = PROGRAM_START as usize;
        if program.len() > MEMORY_SIZE - start {
            return false;
        }
        self.memory[start..start + program.len()].copy_from_slice(program);
        true
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
