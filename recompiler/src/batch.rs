// batch.rs - multi-ROM batch compilation
//
// Compiles every ROM in a directory into one launcher project. Each ROM gets
// a unique symbol prefix so the per-ROM modules link together, and the
// catalog plus launcher let one binary host them all.

use crate::cfg::analyze;
use crate::decode::decode_rom;
use crate::emit::{self, EmitError, EmitOptions};
use crate::meta::{self, RomMetadata};
use crate::rom::{self, Rom};

use anyhow::{bail, Context as _};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Batch compilation options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory scanned for `.ch8` / `.chip8` files.
    pub rom_dir: PathBuf,
    /// Where the generated project goes.
    pub output_dir: PathBuf,
    /// Optional JSON metadata file (see `meta.rs`).
    pub metadata_file: Option<PathBuf>,
    /// Base emitter options applied to every ROM.
    pub gen_opts: EmitOptions,
    /// Retry failed per-function emissions in single-function mode.
    pub auto_mode: bool,
}

/// What one ROM compiled to.
#[derive(Debug)]
pub struct BatchRom {
    pub prefix: String,
    pub title: String,
    pub single_function: bool,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub roms: Vec<BatchRom>,
}

const COLLECTION_NAME: &str = "chip8-collection";
const COLLECTION_LIB: &str = "chip8_collection";

/// Compile every ROM under `rom_dir` into a single launcher project.
pub fn compile_batch(options: &BatchOptions) -> anyhow::Result<BatchSummary> {
    let rom_paths = enumerate_roms(&options.rom_dir)?;
    if rom_paths.is_empty() {
        bail!("no .ch8/.chip8 files in {}", options.rom_dir.display());
    }

    let metadata: BTreeMap<String, RomMetadata> = match &options.metadata_file {
        Some(path) => meta::load_metadata_file(path)
            .with_context(|| format!("loading metadata from {}", path.display()))?,
        None => BTreeMap::new(),
    };

    let src_dir = options.output_dir.join("src");
    fs::create_dir_all(&src_dir)
        .with_context(|| format!("creating {}", src_dir.display()))?;

    let mut summary = BatchSummary::default();
    let mut taken: BTreeSet<String> = BTreeSet::new();

    for path in &rom_paths {
        let rom = rom::load(path).with_context(|| format!("loading {}", path.display()))?;
        let prefix = unique_prefix(&rom.name, &mut taken);
        let meta = metadata.get(&rom.name);
        let title = meta
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| meta::pretty_title(&prefix));

        info!("batch: compiling {} as {}", path.display(), prefix);

        let mut opts = options.gen_opts.clone();
        opts.prefix = prefix.clone();
        opts.rom_name = prefix.clone();
        opts.title = title.clone();
        if let Some(m) = meta {
            if m.cpu_hz > 0 {
                opts.recommended_cpu_hz = m.cpu_hz;
            }
        }

        let (source, single_function) = generate_with_fallback(&rom, &mut opts, options.auto_mode)
            .with_context(|| format!("compiling {}", path.display()))?;

        fs::write(src_dir.join(format!("{}.rs", prefix)), source)?;
        fs::write(
            src_dir.join(format!("{}_rom.rs", prefix)),
            emit::generate_rom_data(&rom.data, &opts),
        )?;

        summary.roms.push(BatchRom {
            prefix,
            title,
            single_function,
        });
    }

    fs::write(
        src_dir.join("catalog.rs"),
        generate_catalog(&summary, &rom_paths, &metadata)?,
    )?;
    fs::write(src_dir.join("lib.rs"), generate_batch_lib(&summary))?;
    fs::write(src_dir.join("main.rs"), generate_batch_main())?;
    fs::write(
        options.output_dir.join("Cargo.toml"),
        generate_batch_cargo(&options.gen_opts.runtime_path),
    )?;

    Ok(summary)
}

/// `.ch8` and `.chip8` files, sorted by file name for deterministic output.
fn enumerate_roms(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("ch8") | Some("chip8")
            )
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Two catalog entries never share a prefix: collisions get a numeric
/// suffix.
fn unique_prefix(name: &str, taken: &mut BTreeSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", name, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Per-function first; on a partition failure fall back to single-function
/// mode when auto mode allows it.
fn generate_with_fallback(
    rom: &Rom,
    opts: &mut EmitOptions,
    auto_mode: bool,
) -> anyhow::Result<(String, bool)> {
    let analysis = analyze(decode_rom(&rom.data, 0x200), 0x200);

    if opts.single_function_mode {
        let source = emit::generate_source(&analysis, &rom.data, opts)?;
        return Ok((source, true));
    }

    match emit::generate_source(&analysis, &rom.data, opts) {
        Ok(source) => Ok((source, false)),
        Err(EmitError::NeedsSingleFunction(reason)) if auto_mode => {
            warn!("{}: falling back to single-function mode: {}", opts.rom_name, reason);
            opts.single_function_mode = true;
            let source = emit::generate_source(&analysis, &rom.data, opts)?;
            Ok((source, true))
        }
        Err(e) => Err(e.into()),
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn opt_str(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("Some({})", quote(v)),
        None => "None".to_string(),
    }
}

fn generate_catalog(
    summary: &BatchSummary,
    rom_paths: &[PathBuf],
    metadata: &BTreeMap<String, RomMetadata>,
) -> anyhow::Result<String> {
    let mut out = String::new();
    out.push_str("// catalog.rs - ROM catalog\n//\n// Generated by chip8recomp. Do not edit.\n\n");
    out.push_str("use chip8_rt::RomEntry;\n\n");
    out.push_str(&format!(
        "pub static CATALOG: [RomEntry; {}] = [\n",
        summary.roms.len()
    ));

    for (rom, path) in summary.roms.iter().zip(rom_paths) {
        // metadata is keyed by the underived name; prefixes may carry a
        // collision suffix
        let base = rom::extract_rom_name(path);
        let meta = metadata.get(&base);
        let cpu = meta.map(|m| m.cpu_hz).unwrap_or(0);

        out.push_str("    RomEntry {\n");
        out.push_str(&format!("        name: {},\n", quote(&rom.prefix)));
        out.push_str(&format!("        title: {},\n", quote(&rom.title)));
        out.push_str(&format!(
            "        data: &crate::{}_rom::ROM_DATA,\n",
            rom.prefix
        ));
        out.push_str(&format!(
            "        entry: crate::{}::{}_entry,\n",
            rom.prefix, rom.prefix
        ));
        out.push_str(&format!(
            "        register_functions: crate::{}::{}_register_functions,\n",
            rom.prefix, rom.prefix
        ));
        out.push_str(&format!("        recommended_cpu_hz: {},\n", cpu));
        out.push_str(&format!(
            "        description: {},\n",
            opt_str(meta.and_then(|m| m.description.as_deref()))
        ));
        out.push_str(&format!(
            "        authors: {},\n",
            opt_str(meta.and_then(|m| m.authors.as_deref()))
        ));
        out.push_str(&format!(
            "        release: {},\n",
            opt_str(meta.and_then(|m| m.release.as_deref()))
        ));
        out.push_str("    },\n");
    }

    out.push_str("];\n");
    Ok(out)
}

fn generate_batch_lib(summary: &BatchSummary) -> String {
    let mut out = String::new();
    out.push_str("// lib.rs - batch-compiled ROM collection\n//\n");
    out.push_str("// Generated by chip8recomp. Do not edit.\n\n");
    out.push_str("pub mod catalog;\n");
    for rom in &summary.roms {
        out.push_str(&format!("pub mod {};\n", rom.prefix));
        out.push_str(&format!("pub mod {}_rom;\n", rom.prefix));
    }
    out.push_str("\npub use catalog::CATALOG;\n");
    out
}

fn generate_batch_main() -> String {
    format!(
        r#"// main.rs - multi-ROM launcher
//
// Generated by chip8recomp. Do not edit.

use chip8_rt::headless::HeadlessPlatform;
use chip8_rt::run_with_menu;

use {lib}::CATALOG;

fn main() {{
    // `--frames N` bounds a headless run; 0 runs until quit.
    let frames = std::env::args()
        .skip_while(|a| a != "--frames")
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut platform = HeadlessPlatform::new(frames);
    if let Err(e) = run_with_menu(&CATALOG, &mut platform) {{
        eprintln!("error: {{e}}");
        std::process::exit(1);
    }}
}}
"#,
        lib = COLLECTION_LIB,
    )
}

fn generate_batch_cargo(runtime_path: &str) -> String {
    format!(
        r#"# Cargo.toml - batch-compiled ROM collection
# Generated by chip8recomp. Do not edit.

[package]
name = "{name}"
version = "0.1.0"
edition = "2021"

[lib]
name = "{lib}"

[dependencies]
chip8-rt = {{ path = "{runtime}" }}
"#,
        name = COLLECTION_NAME,
        lib = COLLECTION_LIB,
        runtime = runtime_path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chip8recomp-{}-{}", std::process::id(), tag));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unique_prefix_disambiguates() {
        let mut taken = BTreeSet::new();
        assert_eq!(unique_prefix("pong", &mut taken), "pong");
        assert_eq!(unique_prefix("pong", &mut taken), "pong_2");
        assert_eq!(unique_prefix("pong", &mut taken), "pong_3");
        assert_eq!(unique_prefix("brix", &mut taken), "brix");
    }

    #[test]
    fn batch_compiles_directory_into_one_project() {
        let roms = scratch_dir("batch-roms");
        let out = scratch_dir("batch-out");

        // two ROMs whose names collide after sanitizing
        fs::write(roms.join("Pong (1 player).ch8"), [0x12, 0x00]).unwrap();
        fs::write(roms.join("Pong (2 players).ch8"), [0x00, 0xE0, 0x12, 0x02]).unwrap();
        // ignored: wrong extension
        fs::write(roms.join("notes.txt"), "not a rom").unwrap();

        let options = BatchOptions {
            rom_dir: roms.clone(),
            output_dir: out.clone(),
            metadata_file: None,
            gen_opts: EmitOptions::default(),
            auto_mode: true,
        };
        let summary = compile_batch(&options).unwrap();

        assert_eq!(summary.roms.len(), 2);
        assert_eq!(summary.roms[0].prefix, "pong");
        assert_eq!(summary.roms[1].prefix, "pong_2");

        for prefix in ["pong", "pong_2"] {
            assert!(out.join(format!("src/{}.rs", prefix)).exists());
            assert!(out.join(format!("src/{}_rom.rs", prefix)).exists());
        }
        let catalog = fs::read_to_string(out.join("src/catalog.rs")).unwrap();
        assert!(catalog.contains("pub static CATALOG: [RomEntry; 2]"));
        assert!(catalog.contains("entry: crate::pong::pong_entry,"));
        assert!(catalog.contains("entry: crate::pong_2::pong_2_entry,"));

        let lib = fs::read_to_string(out.join("src/lib.rs")).unwrap();
        assert!(lib.contains("pub mod pong;"));
        assert!(lib.contains("pub mod pong_2;"));

        assert!(out.join("src/main.rs").exists());
        assert!(out.join("Cargo.toml").exists());

        fs::remove_dir_all(&roms).ok();
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn auto_mode_falls_back_to_single_function() {
        let roms = scratch_dir("fallback-roms");
        let out = scratch_dir("fallback-out");

        // JP V0,0x204 can land on plain code: defeats the function partition
        fs::write(
            roms.join("table.ch8"),
            [0x60, 0x00, 0xB2, 0x04, 0x60, 0x01, 0x12, 0x06],
        )
        .unwrap();

        let options = BatchOptions {
            rom_dir: roms.clone(),
            output_dir: out.clone(),
            metadata_file: None,
            gen_opts: EmitOptions::default(),
            auto_mode: true,
        };
        let summary = compile_batch(&options).unwrap();
        assert!(summary.roms[0].single_function);

        let source = fs::read_to_string(out.join("src/table.rs")).unwrap();
        assert!(source.contains("pub fn table_entry(ctx: &mut Context)"));
        assert!(source.contains("computed jump outside table"));

        fs::remove_dir_all(&roms).ok();
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn no_auto_mode_surfaces_the_failure() {
        let roms = scratch_dir("noauto-roms");
        let out = scratch_dir("noauto-out");

        fs::write(
            roms.join("table.ch8"),
            [0x60, 0x00, 0xB2, 0x04, 0x60, 0x01, 0x12, 0x06],
        )
        .unwrap();

        let options = BatchOptions {
            rom_dir: roms.clone(),
            output_dir: out.clone(),
            metadata_file: None,
            gen_opts: EmitOptions::default(),
            auto_mode: false,
        };
        assert!(compile_batch(&options).is_err());

        fs::remove_dir_all(&roms).ok();
        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn metadata_feeds_the_catalog() {
        let roms = scratch_dir("meta-roms");
        let out = scratch_dir("meta-out");

        fs::write(roms.join("pong.ch8"), [0x12, 0x00]).unwrap();
        let meta_path = roms.join("meta.json");
        fs::write(
            &meta_path,
            r#"[{"name": "pong", "title": "Pong!", "authors": "Paul Vervalin", "cpu_hz": 540}]"#,
        )
        .unwrap();

        let options = BatchOptions {
            rom_dir: roms.clone(),
            output_dir: out.clone(),
            metadata_file: Some(meta_path),
            gen_opts: EmitOptions::default(),
            auto_mode: true,
        };
        compile_batch(&options).unwrap();

        let catalog = fs::read_to_string(out.join("src/catalog.rs")).unwrap();
        assert!(catalog.contains("title: \"Pong!\""));
        assert!(catalog.contains("authors: Some(\"Paul Vervalin\")"));
        assert!(catalog.contains("recommended_cpu_hz: 540"));

        fs::remove_dir_all(&roms).ok();
        fs::remove_dir_all(&out).ok();
    }
}
