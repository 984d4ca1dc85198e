// platform.rs - backend abstraction
//
// The main loop drives a Platform implementation for video, audio, input and
// timing. Swapping the implementation retargets every recompiled program;
// the headless backend in this crate exists for automated testing, windowed
// backends live outside the runtime.

use crate::context::Context;

use thiserror::Error;

/// Navigation command reported by [`Platform::poll_menu_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuNav {
    None,
    Up,
    Down,
    Select,
    Back,
}

/// Settings the main loop may push to the backend.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Display scale factor (1 = native 64x32).
    pub scale: u32,
    /// CPU frequency in Hz.
    pub cpu_hz: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scale: 10,
            cpu_hz: crate::context::DEFAULT_CPU_HZ,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform initialization failed: {0}")]
    Init(String),
}

/// Backend interface consumed by the runtime.
///
/// `poll_events` owns the keypad state: it refreshes `keys`, snapshots the
/// previous frame into `keys_prev`, records `last_key_released` and may set
/// its quit flag. The clock must be monotonic.
pub trait Platform {
    /// Open the window / acquire devices.
    fn init(&mut self, ctx: &mut Context, title: &str, scale: u32) -> Result<(), PlatformError>;

    /// Release everything acquired by `init`.
    fn shutdown(&mut self, ctx: &mut Context);

    /// Present the display buffer; clears `display_dirty`.
    fn render(&mut self, ctx: &mut Context);

    fn beep_start(&mut self, ctx: &mut Context);

    fn beep_stop(&mut self, ctx: &mut Context);

    /// Refresh keypad and quit state for this frame.
    fn poll_events(&mut self, ctx: &mut Context);

    /// Menu navigation input, [`MenuNav::None`] when idle.
    fn poll_menu_events(&mut self, ctx: &mut Context) -> MenuNav;

    fn should_quit(&mut self, ctx: &Context) -> bool;

    /// Draw the selection overlay: `titles` with `selected` highlighted.
    fn render_menu(&mut self, ctx: &mut Context, titles: &[&str], selected: usize);

    fn apply_settings(&mut self, ctx: &mut Context, settings: &Settings);

    /// Monotonic clock in microseconds.
    fn now_us(&mut self) -> u64;

    fn sleep_us(&mut self, microseconds: u64);
}
