// rom.rs - ROM loading and validation
//
// Loads raw CHIP-8 images (no header, big-endian byte stream, loaded at
// 0x200) and derives a sanitized identifier from the file name. The loader
// never transforms bytes.

use log::warn;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Smallest meaningful ROM: one instruction.
pub const MIN_ROM_SIZE: usize = 2;

/// Largest ROM that fits below the top of memory (4096 - 0x200).
pub const MAX_ROM_SIZE: usize = 3584;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM file not found: {0}")]
    NotFound(PathBuf),
    #[error("ROM too large ({size} bytes, max {MAX_ROM_SIZE})")]
    TooLarge { size: usize },
    #[error("ROM too small ({size} bytes, min {MIN_ROM_SIZE})")]
    TooSmall { size: usize },
    #[error("could not read ROM: {0}")]
    Io(#[from] io::Error),
}

/// A loaded ROM image with its derived identifier.
#[derive(Debug, Clone)]
pub struct Rom {
    pub path: Option<PathBuf>,
    /// Sanitized identifier, always a valid Rust identifier.
    pub name: String,
    pub data: Vec<u8>,
}

impl Rom {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// CHIP-8 dialect sniffed from the opcode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Chip8,
    SuperChip,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Chip8 => write!(f, "CHIP-8"),
            Variant::SuperChip => write!(f, "SUPER-CHIP"),
        }
    }
}

/// Load and validate a ROM file.
pub fn load(path: &Path) -> Result<Rom, RomError> {
    if !path.exists() {
        return Err(RomError::NotFound(path.to_path_buf()));
    }
    let data = fs::read(path)?;
    let mut rom = from_bytes(data, extract_rom_name(path))?;
    rom.path = Some(path.to_path_buf());
    Ok(rom)
}

/// Validate an in-memory image.
pub fn from_bytes(data: Vec<u8>, name: String) -> Result<Rom, RomError> {
    if data.len() > MAX_ROM_SIZE {
        return Err(RomError::TooLarge { size: data.len() });
    }
    if data.len() < MIN_ROM_SIZE {
        return Err(RomError::TooSmall { size: data.len() });
    }
    if data.len() % 2 != 0 {
        warn!(
            "ROM size is odd ({} bytes), the trailing byte will be ignored",
            data.len()
        );
    }
    Ok(Rom {
        path: None,
        name,
        data,
    })
}

/// Derive a sanitized identifier from a ROM file name.
///
/// Bracketed and parenthesized metadata is stripped, the rest is lowercased
/// with non-alphanumeric runs collapsed to a single `_`. The result always
/// matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn extract_rom_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Drop "[...]"/"(...)" suffix metadata common in ROM collections.
    let mut name = stem;
    if let Some(pos) = name.find('[') {
        name.truncate(pos);
    }
    if let Some(pos) = name.find('(') {
        name.truncate(pos);
    }

    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }

    let trimmed = out.trim_matches('_');
    let mut name = trimmed.to_string();
    if name.is_empty() {
        name = "rom".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("rom_{}", name);
    }
    name
}

/// Sniff for SUPER-CHIP-only opcodes so the CLI can warn up front.
pub fn detect_variant(rom: &Rom) -> Variant {
    let mut i = 0;
    while i + 1 < rom.data.len() {
        let opcode = (rom.data[i] as u16) << 8 | rom.data[i + 1] as u16;

        // EXIT, LOW, HIGH, SCR, SCL
        if matches!(opcode, 0x00FD | 0x00FE | 0x00FF | 0x00FB | 0x00FC) {
            return Variant::SuperChip;
        }
        // 00Cn scroll down
        if opcode & 0xFFF0 == 0x00C0 {
            return Variant::SuperChip;
        }
        // DXY0: 16x16 sprite
        if opcode & 0xF00F == 0xD000 {
            return Variant::SuperChip;
        }
        // FX30 hi-res font, FX75/FX85 HP48 flags
        if opcode & 0xF0FF == 0xF030 || opcode & 0xF0FF == 0xF075 || opcode & 0xF0FF == 0xF085 {
            return Variant::SuperChip;
        }

        i += 2;
    }
    Variant::Chip8
}

/// Print name, path, size and sniffed variant to stdout.
pub fn print_rom_info(rom: &Rom) {
    println!("ROM information:");
    println!("  Name: {}", rom.name);
    if let Some(path) = &rom.path {
        println!("  Path: {}", path.display());
    }
    println!("  Size: {} bytes (~{} instructions)", rom.size(), rom.size() / 2);
    println!("  Variant: {}", detect_variant(rom));
}

/// One-line-per-row hex dump used by `--debug`.
pub fn dump_rom_hex(rom: &Rom) -> String {
    const BYTES_PER_LINE: usize = 16;
    let mut out = String::new();
    for (row, chunk) in rom.data.chunks(BYTES_PER_LINE).enumerate() {
        out.push_str(&format!("{:03X}: ", 0x200 + row * BYTES_PER_LINE));
        for pair in chunk.chunks(2) {
            for b in pair {
                out.push_str(&format!("{:02X}", b));
            }
            out.push(' ');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(file: &str) -> String {
        extract_rom_name(Path::new(file))
    }

    #[test]
    fn identifier_strips_metadata_and_lowercases() {
        assert_eq!(name_of("Space Invaders [David Winter].ch8"), "space_invaders");
        assert_eq!(name_of("PONG (1 player).ch8"), "pong");
        assert_eq!(name_of("Brix.ch8"), "brix");
    }

    #[test]
    fn identifier_collapses_special_runs() {
        assert_eq!(name_of("Astro-Dodge!!.ch8"), "astro_dodge");
        assert_eq!(name_of("  weird   name .ch8"), "weird_name");
    }

    #[test]
    fn identifier_handles_leading_digit_and_empty() {
        assert_eq!(name_of("15 Puzzle.ch8"), "rom_15_puzzle");
        assert_eq!(name_of("(c) 1978.ch8"), "rom");
        assert_eq!(name_of("[meta only].ch8"), "rom");
    }

    #[test]
    fn identifier_is_always_valid() {
        for file in [
            "a.ch8",
            "0.ch8",
            "___.ch8",
            "Tétris.ch8",
            "UFO (alt) [b1].ch8",
        ] {
            let name = name_of(file);
            let mut chars = name.chars();
            let first = chars.next().unwrap();
            assert!(first.is_ascii_alphabetic() || first == '_', "{name}");
            assert!(
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "{name}"
            );
        }
    }

    #[test]
    fn from_bytes_enforces_bounds() {
        assert!(matches!(
            from_bytes(vec![0x12], "x".into()),
            Err(RomError::TooSmall { size: 1 })
        ));
        assert!(matches!(
            from_bytes(vec![0; MAX_ROM_SIZE + 1], "x".into()),
            Err(RomError::TooLarge { .. })
        ));
        assert!(from_bytes(vec![0x12, 0x00], "x".into()).is_ok());
        assert!(from_bytes(vec![0; MAX_ROM_SIZE], "x".into()).is_ok());
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = load(Path::new("/nonexistent/rom.ch8")).unwrap_err();
        assert!(matches!(err, RomError::NotFound(_)));
    }

    #[test]
    fn variant_detection_flags_superchip() {
        let plain = from_bytes(vec![0x12, 0x00, 0x6A, 0x05], "p".into()).unwrap();
        assert_eq!(detect_variant(&plain), Variant::Chip8);

        // 00FD = EXIT (SUPER-CHIP)
        let schip = from_bytes(vec![0x00, 0xFD], "s".into()).unwrap();
        assert_eq!(detect_variant(&schip), Variant::SuperChip);

        // DXY0 = 16x16 sprite
        let schip2 = from_bytes(vec![0xD1, 0x20], "s2".into()).unwrap();
        assert_eq!(detect_variant(&schip2), Variant::SuperChip);
    }

    #[test]
    fn hex_dump_addresses_start_at_0x200() {
        let rom = from_bytes(vec![0x12, 0x00, 0xAA, 0xBB], "d".into()).unwrap();
        let dump = dump_rom_hex(&rom);
        assert!(dump.starts_with("200: 1200 AABB"));
    }
}
