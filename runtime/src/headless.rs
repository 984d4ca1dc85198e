// headless.rs - platform backend for automated testing
//
// Runs without display or audio: frames are counted, the clock is synthetic
// (16,667us per query, one timer tick per frame) and input arrives from a
// script. Display contents can be dumped to PBM and compared pixel-exact
// against a reference, which is how recompiled ROMs are validated in CI.

use crate::context::{Context, DISPLAY_HEIGHT, DISPLAY_SIZE, DISPLAY_WIDTH, NUM_KEYS};
use crate::platform::{MenuNav, Platform, PlatformError, Settings};

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;

/// Microseconds per simulated frame (60 FPS).
const FRAME_US: u64 = 16_667;

/// A scripted key transition, applied when the given frame is polled.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub frame: u64,
    pub key: u8,
    pub pressed: bool,
}

/// Headless test platform.
pub struct HeadlessPlatform {
    frames_run: u64,
    max_frames: u64,
    clock_us: u64,
    keys: [bool; NUM_KEYS],
    key_script: Vec<KeyEvent>,
    nav_script: VecDeque<MenuNav>,
}

impl HeadlessPlatform {
    /// Run for `max_frames` frames (0 = unlimited).
    pub fn new(max_frames: u64) -> Self {
        HeadlessPlatform {
            frames_run: 0,
            max_frames,
            clock_us: 0,
            keys: [false; NUM_KEYS],
            key_script: Vec::new(),
            nav_script: VecDeque::new(),
        }
    }

    /// Schedule a key press or release for a future frame.
    pub fn script_key(&mut self, frame: u64, key: u8, pressed: bool) {
        self.key_script.push(KeyEvent { frame, key, pressed });
    }

    /// Queue menu navigation commands, consumed one per poll.
    pub fn script_nav(&mut self, nav: impl IntoIterator<Item = MenuNav>) {
        self.nav_script.extend(nav);
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }
}

impl Platform for HeadlessPlatform {
    fn init(&mut self, _ctx: &mut Context, _title: &str, _scale: u32) -> Result<(), PlatformError> {
        self.frames_run = 0;
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut Context) {}

    fn render(&mut self, ctx: &mut Context) {
        ctx.display_dirty = false;
    }

    fn beep_start(&mut self, _ctx: &mut Context) {}

    fn beep_stop(&mut self, _ctx: &mut Context) {}

    fn poll_events(&mut self, ctx: &mut Context) {
        ctx.keys_prev = ctx.keys;
        ctx.last_key_released = -1;

        for ev in &self.key_script {
            if ev.frame == self.frames_run && (ev.key as usize) < NUM_KEYS {
                self.keys[ev.key as usize] = ev.pressed;
            }
        }
        ctx.keys = self.keys;

        for k in 0..NUM_KEYS {
            if ctx.keys_prev[k] && !ctx.keys[k] {
                ctx.last_key_released = k as i8;
            }
        }

        self.frames_run += 1;
        if self.max_frames > 0 && self.frames_run >= self.max_frames {
            ctx.running = false;
        }
    }

    fn poll_menu_events(&mut self, _ctx: &mut Context) -> MenuNav {
        self.nav_script.pop_front().unwrap_or(MenuNav::None)
    }

    fn should_quit(&mut self, _ctx: &Context) -> bool {
        self.max_frames > 0 && self.frames_run >= self.max_frames
    }

    fn render_menu(&mut self, _ctx: &mut Context, _titles: &[&str], _selected: usize) {}

    fn apply_settings(&mut self, _ctx: &mut Context, _settings: &Settings) {}

    fn now_us(&mut self) -> u64 {
        self.clock_us += FRAME_US;
        self.clock_us
    }

    fn sleep_us(&mut self, _microseconds: u64) {}
}

/// Render the display buffer as ASCII art, one `#` per lit pixel.
pub fn dump_ascii(ctx: &Context) -> String {
    let mut out = String::with_capacity(DISPLAY_SIZE + DISPLAY_HEIGHT);
    for y in 0..DISPLAY_HEIGHT {
        for x in 0..DISPLAY_WIDTH {
            out.push(if ctx.display[y * DISPLAY_WIDTH + x] != 0 {
                '#'
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

/// A cheap order-sensitive hash of the display buffer.
pub fn display_hash(ctx: &Context) -> u32 {
    ctx.display
        .iter()
        .fold(0u32, |h, &p| h.wrapping_mul(31).wrapping_add(p as u32))
}

/// Write the display to `path` as a plain (P1) PBM file.
pub fn dump_pbm(ctx: &Context, path: &Path) -> io::Result<()> {
    let mut out = String::new();
    out.push_str("P1\n");
    out.push_str("# CHIP-8 display dump\n");
    out.push_str(&format!("{} {}\n", DISPLAY_WIDTH, DISPLAY_HEIGHT));
    for y in 0..DISPLAY_HEIGHT {
        for x in 0..DISPLAY_WIDTH {
            out.push(if ctx.display[y * DISPLAY_WIDTH + x] != 0 {
                '1'
            } else {
                '0'
            });
            out.push(if x + 1 == DISPLAY_WIDTH { '\n' } else { ' ' });
        }
    }
    fs::write(path, out)
}

/// Compare the display against a reference P1 PBM file, pixel for pixel.
pub fn compare_pbm(ctx: &Context, reference: &Path) -> io::Result<bool> {
    let text = fs::read_to_string(reference)?;
    let mut tokens = text
        .lines()
        .map(|l| match l.find('#') {
            Some(pos) => &l[..pos],
            None => l,
        })
        .flat_map(|l| l.split_whitespace());

    if tokens.next() != Some("P1") {
        return Ok(false);
    }
    let width: usize = match tokens.next().and_then(|t| t.parse().ok()) {
        Some(w) => w,
        None => return Ok(false),
    };
    let height: usize = match tokens.next().and_then(|t| t.parse().ok()) {
        Some(h) => h,
        None => return Ok(false),
    };
    if width != DISPLAY_WIDTH || height != DISPLAY_HEIGHT {
        return Ok(false);
    }

    for i in 0..DISPLAY_SIZE {
        let bit = match tokens.next() {
            Some("0") => 0u8,
            Some("1") => 1u8,
            _ => return Ok(false),
        };
        if (ctx.display[i] != 0) != (bit != 0) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("chip8rt-{}-{}", std::process::id(), name))
    }

    #[test]
    fn pbm_round_trip_matches() {
        let mut ctx = Context::new();
        ctx.display[0] = 1;
        ctx.display[DISPLAY_SIZE - 1] = 1;

        let path = scratch("roundtrip.pbm");
        dump_pbm(&ctx, &path).unwrap();
        assert!(compare_pbm(&ctx, &path).unwrap());

        ctx.display[5] ^= 1;
        assert!(!compare_pbm(&ctx, &path).unwrap());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn compare_rejects_wrong_dimensions() {
        let ctx = Context::new();
        let path = scratch("badsize.pbm");
        fs::write(&path, "P1\n2 2\n0 0\n0 0\n").unwrap();
        assert!(!compare_pbm(&ctx, &path).unwrap());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn headless_quits_after_max_frames() {
        let mut plat = HeadlessPlatform::new(3);
        let mut ctx = Context::new();
        for _ in 0..3 {
            assert!(ctx.running);
            plat.poll_events(&mut ctx);
        }
        assert!(!ctx.running);
        assert!(plat.should_quit(&ctx));
    }

    #[test]
    fn key_script_produces_release_edge() {
        let mut plat = HeadlessPlatform::new(0);
        plat.script_key(0, 0xA, true);
        plat.script_key(1, 0xA, false);
        let mut ctx = Context::new();

        plat.poll_events(&mut ctx);
        assert!(ctx.keys[0xA]);
        assert_eq!(ctx.last_key_released, -1);

        plat.poll_events(&mut ctx);
        assert!(!ctx.keys[0xA]);
        assert!(ctx.keys_prev[0xA]);
        assert_eq!(ctx.last_key_released, 0xA);
    }

    #[test]
    fn clock_advances_one_frame_per_query() {
        let mut plat = HeadlessPlatform::new(0);
        let a = plat.now_us();
        let b = plat.now_us();
        assert_eq!(b - a, FRAME_US);
    }

    #[test]
    fn display_hash_tracks_content() {
        let mut ctx = Context::new();
        let h0 = display_hash(&ctx);
        ctx.display[17] = 1;
        assert_ne!(h0, display_hash(&ctx));
    }
}
