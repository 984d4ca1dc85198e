// ops.rs - instruction helpers called by recompiled code
//
// Everything here implements the behavioral contract the generated code
// depends on. Flag writes for ALU instructions happen in the generated code
// itself (result first, VF last); these helpers cover the operations that
// touch memory, display, keys and timers.

use crate::context::{Context, DISPLAY_HEIGHT, DISPLAY_WIDTH, MEMORY_SIZE};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

static RNG: Mutex<Option<SmallRng>> = Mutex::new(None);

/// Zero the display buffer (00E0).
pub fn clear_display(ctx: &mut Context) {
    ctx.display.fill(0);
    ctx.display_dirty = true;
}

/// Draw an n-row sprite from memory at I (DXYN).
///
/// The origin `(V[vx], V[vy])` wraps around the screen. With `wrap` false,
/// rows below the bottom edge and columns past the right edge are clipped;
/// with the quirk on every pixel wraps. Pixels XOR into the display and
/// VF reports whether any lit pixel was cleared.
pub fn draw_sprite(ctx: &mut Context, vx: u8, vy: u8, height: u8, wrap: bool) {
    let x = ctx.v[vx as usize] as usize % DISPLAY_WIDTH;
    let y = ctx.v[vy as usize] as usize % DISPLAY_HEIGHT;

    ctx.v[0xF] = 0;

    for row in 0..height as usize {
        if !wrap && y + row >= DISPLAY_HEIGHT {
            break;
        }
        let py = (y + row) % DISPLAY_HEIGHT;
        let sprite_byte = ctx.memory[(ctx.i as usize + row) & (MEMORY_SIZE - 1)];

        for col in 0..8 {
            if !wrap && x + col >= DISPLAY_WIDTH {
                break;
            }
            let px = (x + col) % DISPLAY_WIDTH;
            if sprite_byte & (0x80 >> col) != 0 {
                let idx = py * DISPLAY_WIDTH + px;
                if ctx.display[idx] != 0 {
                    ctx.v[0xF] = 1;
                }
                ctx.display[idx] ^= 1;
            }
        }
    }

    ctx.display_dirty = true;
}

/// Whether key `key` (0x0-0xF) is currently down (EX9E/EXA1).
pub fn key_pressed(ctx: &Context, key: u8) -> bool {
    if key > 0xF {
        return false;
    }
    ctx.keys[key as usize]
}

/// Begin waiting for a key release (FX0A).
///
/// The main loop completes the instruction: on a release edge it writes the
/// key into `V[reg]` and clears the waiting flag. No further instructions
/// execute until then.
pub fn wait_key(ctx: &mut Context, reg: u8) {
    ctx.waiting_for_key = true;
    ctx.key_wait_register = reg;
}

/// Store the BCD digits of V[x] at memory[I..I+3] (FX33).
pub fn store_bcd(ctx: &mut Context, x: u8) {
    let value = ctx.v[x as usize];
    let i = ctx.i as usize;
    ctx.memory[i & (MEMORY_SIZE - 1)] = value / 100;
    ctx.memory[(i + 1) & (MEMORY_SIZE - 1)] = (value / 10) % 10;
    ctx.memory[(i + 2) & (MEMORY_SIZE - 1)] = value % 10;
}

/// Copy V[0..=x] into memory at I (FX55).
pub fn store_registers(ctx: &mut Context, x: u8, increment_i: bool) {
    for r in 0..=x as usize {
        ctx.memory[(ctx.i as usize + r) & (MEMORY_SIZE - 1)] = ctx.v[r];
    }
    if increment_i {
        ctx.i = ctx.i.wrapping_add(x as u16 + 1) & 0x0FFF;
    }
}

/// Copy memory at I into V[0..=x] (FX65).
pub fn load_registers(ctx: &mut Context, x: u8, increment_i: bool) {
    for r in 0..=x as usize {
        ctx.v[r] = ctx.memory[(ctx.i as usize + r) & (MEMORY_SIZE - 1)];
    }
    if increment_i {
        ctx.i = ctx.i.wrapping_add(x as u16 + 1) & 0x0FFF;
    }
}

/// A random byte for CXNN. Seeded from the clock on first use.
pub fn random_byte() -> u8 {
    let mut guard = RNG.lock().unwrap();
    let rng = guard.get_or_insert_with(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0x1234_5678);
        SmallRng::seed_from_u64(nanos)
    });
    rng.gen()
}

/// Reseed the RNG. Intended for tests; determinism is otherwise not promised.
pub fn seed_random(seed: u64) {
    *RNG.lock().unwrap() = Some(SmallRng::seed_from_u64(seed));
}

/// Decrement the delay and sound timers if non-zero. Called at 60Hz by the
/// main loop, never by generated code.
pub fn tick_timers(ctx: &mut Context) {
    if ctx.delay_timer > 0 {
        ctx.delay_timer -= 1;
    }
    if ctx.sound_timer > 0 {
        ctx.sound_timer -= 1;
    }
}

/// Whether the beep should currently play.
pub fn sound_active(ctx: &Context) -> bool {
    ctx.sound_timer > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(ctx: &Context, x: usize, y: usize) -> u8 {
        ctx.display[y * DISPLAY_WIDTH + x]
    }

    #[test]
    fn clear_display_zeroes_and_dirties() {
        let mut ctx = Context::new();
        ctx.display[100] = 1;
        clear_display(&mut ctx);
        assert!(ctx.display.iter().all(|&p| p == 0));
        assert!(ctx.display_dirty);
    }

    #[test]
    fn draw_sprite_origin_wraps() {
        // (65, 33) must behave exactly like (1, 1)
        let mut ctx = Context::new();
        ctx.memory[0x300] = 0xFF;
        ctx.i = 0x300;
        ctx.v[0] = 65;
        ctx.v[1] = 33;
        draw_sprite(&mut ctx, 0, 1, 1, false);
        for col in 0..8 {
            assert_eq!(pixel(&ctx, 1 + col, 1), 1);
        }
        assert_eq!(ctx.v[0xF], 0);
    }

    #[test]
    fn draw_sprite_clips_right_edge() {
        let mut ctx = Context::new();
        ctx.memory[0x300] = 0xFF;
        ctx.i = 0x300;
        ctx.v[0] = 60;
        ctx.v[1] = 0;
        draw_sprite(&mut ctx, 0, 1, 1, false);
        for x in 60..64 {
            assert_eq!(pixel(&ctx, x, 0), 1);
        }
        // nothing wrapped to the left edge
        for x in 0..4 {
            assert_eq!(pixel(&ctx, x, 0), 0);
        }
    }

    #[test]
    fn draw_sprite_clips_bottom_rows() {
        let mut ctx = Context::new();
        ctx.memory[0x300] = 0xFF;
        ctx.memory[0x301] = 0xFF;
        ctx.i = 0x300;
        ctx.v[0] = 0;
        ctx.v[1] = 31;
        draw_sprite(&mut ctx, 0, 1, 2, false);
        for x in 0..8 {
            assert_eq!(pixel(&ctx, x, 31), 1);
            assert_eq!(pixel(&ctx, x, 0), 0, "bottom row must not wrap");
        }
    }

    #[test]
    fn draw_sprite_wrap_quirk_wraps_pixels() {
        let mut ctx = Context::new();
        ctx.memory[0x300] = 0xFF;
        ctx.i = 0x300;
        ctx.v[0] = 60;
        ctx.v[1] = 0;
        draw_sprite(&mut ctx, 0, 1, 1, true);
        for x in 60..64 {
            assert_eq!(pixel(&ctx, x, 0), 1);
        }
        for x in 0..4 {
            assert_eq!(pixel(&ctx, x, 0), 1, "wrapped column");
        }
    }

    #[test]
    fn draw_sprite_collision_sets_vf_and_erases() {
        let mut ctx = Context::new();
        ctx.memory[0x300] = 0xFF;
        ctx.i = 0x300;
        ctx.v[0] = 64; // wraps to 0
        ctx.v[1] = 0;
        draw_sprite(&mut ctx, 0, 1, 1, false);
        assert_eq!(ctx.v[0xF], 0);
        for x in 0..8 {
            assert_eq!(pixel(&ctx, x, 0), 1);
        }
        draw_sprite(&mut ctx, 0, 1, 1, false);
        assert_eq!(ctx.v[0xF], 1);
        for x in 0..8 {
            assert_eq!(pixel(&ctx, x, 0), 0);
        }
    }

    #[test]
    fn store_bcd_digits() {
        let mut ctx = Context::new();
        ctx.v[4] = 237;
        ctx.i = 0x400;
        store_bcd(&mut ctx, 4);
        assert_eq!(&ctx.memory[0x400..0x403], &[2, 3, 7]);
    }

    #[test]
    fn store_load_registers_with_increment() {
        let mut ctx = Context::new();
        for r in 0..4 {
            ctx.v[r] = (r as u8) * 3;
        }
        ctx.i = 0x400;
        store_registers(&mut ctx, 3, true);
        assert_eq!(ctx.i, 0x404);
        assert_eq!(&ctx.memory[0x400..0x404], &[0, 3, 6, 9]);

        ctx.v = [0xEE; 16];
        ctx.i = 0x400;
        load_registers(&mut ctx, 3, true);
        assert_eq!(ctx.i, 0x404);
        assert_eq!(&ctx.v[0..4], &[0, 3, 6, 9]);
        assert_eq!(ctx.v[4], 0xEE, "registers above x untouched");
    }

    #[test]
    fn store_load_registers_without_increment() {
        let mut ctx = Context::new();
        ctx.v[0] = 42;
        ctx.i = 0x500;
        store_registers(&mut ctx, 0, false);
        assert_eq!(ctx.i, 0x500);
        load_registers(&mut ctx, 0, false);
        assert_eq!(ctx.i, 0x500);
        assert_eq!(ctx.v[0], 42);
    }

    #[test]
    fn timers_tick_down_to_zero() {
        let mut ctx = Context::new();
        ctx.delay_timer = 2;
        ctx.sound_timer = 1;
        tick_timers(&mut ctx);
        assert_eq!((ctx.delay_timer, ctx.sound_timer), (1, 0));
        assert!(!sound_active(&ctx));
        tick_timers(&mut ctx);
        tick_timers(&mut ctx);
        assert_eq!(ctx.delay_timer, 0);
    }

    #[test]
    fn random_byte_respects_seed() {
        seed_random(7);
        let a = random_byte();
        seed_random(7);
        let b = random_byte();
        assert_eq!(a, b);
    }

    #[test]
    fn key_pressed_out_of_range_is_false() {
        let mut ctx = Context::new();
        ctx.keys[0xF] = true;
        assert!(key_pressed(&ctx, 0xF));
        assert!(!key_pressed(&ctx, 0x10));
    }
}
