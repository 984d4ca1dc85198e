// run.rs - cooperative main loop
//
// Drives a recompiled entry routine at 60 frames per second. Each frame the
// routine gets `cpu_hz / 60` instructions of budget and yields back when it
// is spent; the loop then ticks timers, handles sound edges, renders and
// paces. FX0A key waits are completed here, on a release edge.

use crate::context::{Context, TIMER_FREQ_HZ};
use crate::dispatch::EntryFn;
use crate::ops;
use crate::platform::{MenuNav, Platform, PlatformError, Settings};

use log::debug;
use thiserror::Error;

/// Microseconds per 60Hz timer period.
const TIMER_PERIOD_US: u64 = 1_000_000 / TIMER_FREQ_HZ as u64;

/// Configuration for [`run`].
#[derive(Debug, Clone, Copy)]
pub struct RunConfig<'a> {
    /// Window title.
    pub title: &'a str,
    /// Display scale factor.
    pub scale: u32,
    /// CPU frequency in Hz.
    pub cpu_hz: u32,
    /// Extra runtime diagnostics via `log`.
    pub debug: bool,
    /// ROM image loaded at 0x200 before the first frame. May be empty when
    /// the caller manages memory itself.
    pub rom: &'a [u8],
}

impl Default for RunConfig<'_> {
    fn default() -> Self {
        RunConfig {
            title: "CHIP-8",
            scale: 10,
            cpu_hz: crate::context::DEFAULT_CPU_HZ,
            debug: false,
            rom: &[],
        }
    }
}

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Quit requested (window close, script exhausted, ...).
    Quit,
    /// The user asked to return to the launcher menu.
    ReturnToMenu,
}

/// Final state handed back to the caller, mainly for tests and the launcher.
pub struct RunReport {
    pub outcome: RunOutcome,
    pub context: Box<Context>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("ROM image does not fit into memory")]
    RomTooLarge,
}

/// Abort with the offending CHIP-8 address. Recompiled code calls this for
/// unregistered computed jumps, stack faults and holes in the dispatch loop.
pub fn panic_at(message: &str, address: u16) -> ! {
    panic!("CHIP-8 panic at 0x{:03X}: {}", address, message)
}

/// Run a recompiled program until quit or return-to-menu.
pub fn run(
    entry: EntryFn,
    config: &RunConfig,
    platform: &mut dyn Platform,
) -> Result<RunReport, RuntimeError> {
    let mut ctx = Box::new(Context::new());

    if !config.rom.is_empty() && !ctx.load_program(config.rom) {
        return Err(RuntimeError::RomTooLarge);
    }

    platform.init(&mut ctx, config.title, config.scale)?;
    let settings = Settings {
        scale: config.scale,
        cpu_hz: config.cpu_hz,
    };
    platform.apply_settings(&mut ctx, &settings);

    let cycles_per_frame = (config.cpu_hz / TIMER_FREQ_HZ).max(1) as i32;
    if config.debug {
        debug!(
            "main loop starting: {} Hz, {} cycles/frame",
            config.cpu_hz, cycles_per_frame
        );
    }

    let mut last_timer_tick = platform.now_us();
    let mut was_beeping = false;
    let mut outcome = RunOutcome::Quit;

    while ctx.running && !platform.should_quit(&ctx) {
        let frame_start = platform.now_us();

        platform.poll_events(&mut ctx);

        if platform.poll_menu_events(&mut ctx) == MenuNav::Back {
            outcome = RunOutcome::ReturnToMenu;
            break;
        }

        // Complete a pending FX0A on a key-release edge.
        if ctx.waiting_for_key && ctx.last_key_released >= 0 {
            ctx.v[ctx.key_wait_register as usize] = ctx.last_key_released as u8;
            ctx.waiting_for_key = false;
            ctx.last_key_released = -1;
        }

        if !ctx.waiting_for_key {
            ctx.cycles_remaining = cycles_per_frame;
            entry(&mut ctx);
            let executed = cycles_per_frame - ctx.cycles_remaining;
            if executed > 0 {
                ctx.instruction_count += executed as u64;
            }
        }

        // 60Hz timer tick and beep edges.
        let now = platform.now_us();
        if now.saturating_sub(last_timer_tick) >= TIMER_PERIOD_US {
            ops::tick_timers(&mut ctx);
            last_timer_tick = now;
            ctx.frame_count += 1;

            let is_beeping = ops::sound_active(&ctx);
            if is_beeping && !was_beeping {
                platform.beep_start(&mut ctx);
            } else if !is_beeping && was_beeping {
                platform.beep_stop(&mut ctx);
            }
            was_beeping = is_beeping;
        }

        platform.render(&mut ctx);

        let frame_time = platform.now_us().saturating_sub(frame_start);
        if frame_time < TIMER_PERIOD_US {
            platform.sleep_us(TIMER_PERIOD_US - frame_time);
        }
    }

    if config.debug {
        debug!(
            "main loop done: {} frames, {} instructions",
            ctx.frame_count, ctx.instruction_count
        );
    }

    platform.beep_stop(&mut ctx);
    platform.shutdown(&mut ctx);

    Ok(RunReport {
        outcome,
        context: ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPlatform;

    fn idle_entry(ctx: &mut Context) {
        // burn the whole budget without touching state
        ctx.cycles_remaining = 0;
        ctx.should_yield = true;
        ctx.resume_pc = 0x200;
    }

    #[test]
    fn run_counts_instructions_and_frames() {
        let mut platform = HeadlessPlatform::new(10);
        let config = RunConfig {
            cpu_hz: 700,
            rom: &[0x12, 0x00],
            ..Default::default()
        };
        let report = run(idle_entry, &config, &mut platform).unwrap();
        assert_eq!(report.outcome, RunOutcome::Quit);
        // 11 cycles per frame, 10 frames
        assert_eq!(report.context.instruction_count, 110);
        assert_eq!(report.context.frame_count, 10);
        assert_eq!(report.context.memory[0x200], 0x12);
    }

    #[test]
    fn run_rejects_oversized_rom() {
        let mut platform = HeadlessPlatform::new(1);
        let rom = vec![0u8; 4000];
        let config = RunConfig {
            rom: &rom,
            ..Default::default()
        };
        assert!(matches!(
            run(idle_entry, &config, &mut platform),
            Err(RuntimeError::RomTooLarge)
        ));
    }

    #[test]
    fn back_navigation_returns_to_menu() {
        let mut platform = HeadlessPlatform::new(100);
        platform.script_nav([MenuNav::None, MenuNav::Back]);
        let config = RunConfig::default();
        let report = run(idle_entry, &config, &mut platform).unwrap();
        assert_eq!(report.outcome, RunOutcome::ReturnToMenu);
        assert_eq!(report.context.frame_count, 1);
    }

    #[test]
    fn wait_key_blocks_execution_until_release() {
        fn waiting_entry(ctx: &mut Context) {
            if ctx.v[0xC] == 0 {
                ctx.v[0xC] = 1; // first frame only
                ops::wait_key(ctx, 5);
                ctx.resume_pc = 0x202;
                ctx.should_yield = true;
            }
        }

        let mut platform = HeadlessPlatform::new(6);
        platform.script_key(2, 0x7, true);
        platform.script_key(4, 0x7, false);
        let config = RunConfig::default();
        let report = run(waiting_entry, &config, &mut platform).unwrap();
        let ctx = &report.context;
        assert!(!ctx.waiting_for_key);
        assert_eq!(ctx.v[5], 0x7, "released key lands in the wait register");
    }

    #[test]
    fn sound_timer_drives_beep_edges() {
        fn beep_entry(ctx: &mut Context) {
            if ctx.frame_count == 0 && ctx.sound_timer == 0 {
                ctx.sound_timer = 2;
            }
            ctx.cycles_remaining = 0;
        }

        let mut platform = HeadlessPlatform::new(5);
        let config = RunConfig::default();
        let report = run(beep_entry, &config, &mut platform).unwrap();
        assert_eq!(report.context.sound_timer, 0);
    }
}
