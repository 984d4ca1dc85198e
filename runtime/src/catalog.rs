// catalog.rs - multi-ROM catalog and launcher loop
//
// Batch recompilation links many ROMs into one binary; each contributes a
// RomEntry. The launcher presents a selection menu and makes ROM switching a
// single transaction: clear the dispatch table, register the new ROM's
// routines, then run it on a fresh machine with its image at 0x200.

use crate::context::{Context, DEFAULT_CPU_HZ};
use crate::dispatch::{self, EntryFn};
use crate::platform::{MenuNav, Platform};
use crate::run::{run, RunConfig, RunOutcome, RuntimeError};

use log::info;

/// One batch-compiled ROM.
///
/// `data` is the embedded image (pointer and length); `register_functions`
/// installs every routine the ROM's computed jumps can target.
#[derive(Clone, Copy)]
pub struct RomEntry {
    /// Sanitized identifier, matches the generated symbol prefix.
    pub name: &'static str,
    /// Display title.
    pub title: &'static str,
    /// Embedded ROM image.
    pub data: &'static [u8],
    /// Recompiled entry routine.
    pub entry: EntryFn,
    /// Installs this ROM's routines into the dispatch table.
    pub register_functions: fn(),
    /// Preferred CPU frequency in Hz, 0 for the default.
    pub recommended_cpu_hz: u32,
    pub description: Option<&'static str>,
    pub authors: Option<&'static str>,
    pub release: Option<&'static str>,
}

/// Run the selection menu until the user quits.
///
/// Selecting an entry launches it; a "return to menu" from inside the game
/// re-presents the list, quitting from the game exits.
pub fn run_with_menu(catalog: &[RomEntry], platform: &mut dyn Platform) -> Result<(), RuntimeError> {
    assert!(!catalog.is_empty(), "empty ROM catalog");

    let titles: Vec<&str> = catalog.iter().map(|e| e.title).collect();
    let mut selected = 0usize;

    loop {
        let mut menu_ctx = Box::new(Context::new());
        platform.init(&mut menu_ctx, "CHIP-8 Collection", 10)?;

        let choice = loop {
            platform.poll_events(&mut menu_ctx);
            if !menu_ctx.running || platform.should_quit(&menu_ctx) {
                break None;
            }
            match platform.poll_menu_events(&mut menu_ctx) {
                MenuNav::Up => selected = selected.saturating_sub(1),
                MenuNav::Down => selected = (selected + 1).min(catalog.len() - 1),
                MenuNav::Select => break Some(selected),
                MenuNav::Back => break None,
                MenuNav::None => {}
            }
            platform.render_menu(&mut menu_ctx, &titles, selected);
            platform.sleep_us(16_667);
        };

        platform.shutdown(&mut menu_ctx);

        let Some(idx) = choice else {
            return Ok(());
        };
        let rom = &catalog[idx];
        info!("launching {}", rom.title);

        // ROM switch transaction: the table reflects exactly one ROM at a
        // time. run() builds a fresh Context and loads the image at 0x200,
        // which is the reset-and-reload step of the transaction: registers,
        // stack, display, timers and counters all start from zero with the
        // font intact.
        dispatch::clear_all();
        (rom.register_functions)();

        let config = RunConfig {
            title: rom.title,
            cpu_hz: if rom.recommended_cpu_hz > 0 {
                rom.recommended_cpu_hz
            } else {
                DEFAULT_CPU_HZ
            },
            rom: rom.data,
            ..Default::default()
        };

        let report = run(rom.entry, &config, platform)?;
        match report.outcome {
            RunOutcome::ReturnToMenu => continue,
            RunOutcome::Quit => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessPlatform;

    static ROM_A: [u8; 2] = [0x12, 0x00];
    static ROM_B: [u8; 2] = [0x00, 0xE0];

    fn entry_a(ctx: &mut Context) {
        ctx.v[0] = 0xA1;
        ctx.cycles_remaining = 0;
    }

    fn entry_b(ctx: &mut Context) {
        ctx.v[0] = 0xB2;
        ctx.cycles_remaining = 0;
    }

    fn register_a() {
        dispatch::register(0x200, entry_a);
    }

    fn register_b() {
        dispatch::register(0x200, entry_b);
    }

    fn catalog() -> [RomEntry; 2] {
        [
            RomEntry {
                name: "alpha",
                title: "Alpha",
                data: &ROM_A,
                entry: entry_a,
                register_functions: register_a,
                recommended_cpu_hz: 0,
                description: None,
                authors: None,
                release: None,
            },
            RomEntry {
                name: "beta",
                title: "Beta",
                data: &ROM_B,
                entry: entry_b,
                register_functions: register_b,
                recommended_cpu_hz: 900,
                description: Some("second entry"),
                authors: None,
                release: None,
            },
        ]
    }

    #[test]
    fn select_launches_and_quit_exits() {
        let _guard = crate::dispatch::test_support::lock();
        let mut platform = HeadlessPlatform::new(40);
        platform.script_nav([MenuNav::Down, MenuNav::Select]);
        run_with_menu(&catalog(), &mut platform).unwrap();
        // Beta's hook ran last
        let f = dispatch::lookup(0x200).expect("registered");
        let mut ctx = Context::new();
        f(&mut ctx);
        assert_eq!(ctx.v[0], 0xB2);
    }

    #[test]
    fn back_in_menu_exits_cleanly() {
        let mut platform = HeadlessPlatform::new(40);
        platform.script_nav([MenuNav::Up, MenuNav::Back]);
        run_with_menu(&catalog(), &mut platform).unwrap();
    }
}
