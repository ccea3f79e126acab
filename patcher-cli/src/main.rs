use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use patcher_core::{
    apply_edits, decode_conditional_sets, decode_events, load_patch_directory, write_patches_xml,
    CommandType, DirectiveAssembler, PatchSet, PatcherSettings, Platform, SectorTable,
    TemplateTable,
};

#[derive(Debug, Parser)]
#[command(name = "asm-patcher", version, about = "Applies XML-described patches to a disc image")]
struct Args {
    /// Settings file; defaults apply when it does not exist.
    #[arg(long, default_value = "patcher.json", global = true)]
    config: PathBuf,

    #[arg(long, value_enum, global = true)]
    platform: Option<PlatformArg>,

    /// JSON sector table to use instead of the built-in one.
    #[arg(long, global = true)]
    sectors: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Psx,
    Psp,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Psx => Platform::Psx,
            PlatformArg::Psp => Platform::Psp,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConditionalKind {
    Battle,
    World,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List every patch found in the patch directory.
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Apply patches to an image.
    Apply {
        #[arg(long)]
        image: PathBuf,
        /// Where to write the patched image; the input is patched in place
        /// when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Patch names to apply. Every visible patch is applied when none
        /// are given.
        #[arg(long = "patch")]
        patches: Vec<String>,
        /// Variable override, `NAME=HEX`.
        #[arg(long = "set", value_parser = parse_assignment)]
        sets: Vec<(String, String)>,
        /// Import file for an import patch, `PATCH=PATH`.
        #[arg(long = "input", value_parser = parse_assignment)]
        inputs: Vec<(String, String)>,
    },
    /// Re-serialise the loaded descriptions into one document.
    Export {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Decode a conditional-set file to JSON.
    Conditionals {
        #[arg(long, value_enum)]
        kind: ConditionalKind,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        templates: Option<PathBuf>,
    },
    /// Decode an event file to JSON.
    Events {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

fn parse_assignment(text: &str) -> std::result::Result<(String, String), String> {
    text.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("patcher_core={}", level).parse()?)
                .add_directive(format!("asm_patcher={}", level).parse()?),
        )
        .init();

    let mut settings = PatcherSettings::load(&args.config)
        .with_context(|| format!("reading settings {}", args.config.display()))?;
    if let Some(platform) = args.platform {
        settings.platform = platform.into();
    }
    if let Some(sectors) = args.sectors {
        settings.sector_table = Some(sectors);
    }
    debug!("Settings: {:?}", settings);

    match args.command {
        Cmd::List { dir } => list(&settings, dir),
        Cmd::Apply {
            image,
            output,
            dir,
            patches,
            sets,
            inputs,
        } => apply(&settings, &image, output.as_deref(), dir, &patches, &sets, &inputs),
        Cmd::Export { dir, output } => export(&settings, dir, &output),
        Cmd::Conditionals {
            kind,
            input,
            templates,
        } => {
            let kind = match kind {
                ConditionalKind::Battle => CommandType::BattleConditional,
                ConditionalKind::World => CommandType::WorldConditional,
            };
            let table = template_table(&settings, kind, templates)?;
            let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let sets = decode_conditional_sets(&table, &bytes)?;
            info!("Decoded {} conditional sets", sets.len());
            println!("{}", serde_json::to_string_pretty(&sets)?);
            Ok(())
        }
        Cmd::Events { input, templates } => {
            let table = template_table(&settings, CommandType::EventCommand, templates)?;
            let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let events = decode_events(&table, &bytes)?;
            info!("Decoded {} events", events.len());
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(())
        }
    }
}

fn template_table(settings: &PatcherSettings, kind: CommandType, path: Option<PathBuf>) -> Result<TemplateTable> {
    if let Some(path) = path {
        return TemplateTable::load(kind, &path).with_context(|| format!("reading templates {}", path.display()));
    }
    settings
        .command_table(kind)?
        .ok_or_else(|| anyhow!("no template table configured for {:?}; pass --templates", kind))
}

fn load_patches(settings: &PatcherSettings, dir: Option<PathBuf>) -> Result<(SectorTable, Vec<PatchSet>)> {
    let table = settings.sector_table()?;
    let dir = dir
        .or_else(|| settings.patch_dir.clone())
        .ok_or_else(|| anyhow!("no patch directory given; pass --dir or set patch_dir"))?;
    let patches = load_patch_directory(&dir, &table, &DirectiveAssembler::new())
        .with_context(|| format!("loading patches from {}", dir.display()))?;
    info!("{} patches loaded from {}", patches.len(), dir.display());
    Ok((table, patches))
}

fn list(settings: &PatcherSettings, dir: Option<PathBuf>) -> Result<()> {
    let (_, patches) = load_patches(settings, dir)?;
    for patch in &patches {
        let mut flags = Vec::new();
        if patch.is_hidden() {
            flags.push("hidden");
        }
        if patch.hide_in_default() {
            flags.push("hide-in-default");
        }
        if patch.is_import_file() {
            flags.push("import");
        }
        println!(
            "{} [{}] {}",
            patch.name(),
            patch.filename(),
            if flags.is_empty() { String::new() } else { format!("({})", flags.join(", ")) }
        );
        if patch.description() != patch.name() {
            println!("    {}", patch.description());
        }
        for var in patch.variables().iter().filter(|v| !v.is_reference()) {
            println!("    {} = {:X}", var.name(), var.value());
        }
        for line in patch.error_text().lines() {
            println!("    ! {}", line);
        }
    }
    Ok(())
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn apply(
    settings: &PatcherSettings,
    image_path: &Path,
    output: Option<&Path>,
    dir: Option<PathBuf>,
    names: &[String],
    sets: &[(String, String)],
    inputs: &[(String, String)],
) -> Result<()> {
    let (table, patches) = load_patches(settings, dir)?;
    let assembler = DirectiveAssembler::new();

    let mut selected: Vec<PatchSet> = if names.is_empty() {
        patches.into_iter().filter(|p| !p.is_hidden() && !p.is_import_file()).collect()
    } else {
        let mut chosen = Vec::new();
        for name in names {
            let patch = patches
                .iter()
                .find(|p| same_name(p.name(), name))
                .ok_or_else(|| anyhow!("no patch named '{}'", name))?;
            chosen.push(patch.clone());
        }
        chosen
    };

    for (name, value) in sets {
        let value = u32::from_str_radix(value.trim_start_matches("0x"), 16)
            .with_context(|| format!("value for {} is not hex: {}", name, value))?;
        let mut found = false;
        for patch in selected.iter_mut().filter(|p| p.variable(name).is_some()) {
            patch.set_variable_value(name, value)?;
            found = true;
        }
        if !found {
            bail!("no selected patch has a variable named '{}'", name);
        }
    }

    for (name, path) in inputs {
        let patch = selected
            .iter_mut()
            .find(|p| same_name(p.name(), name))
            .ok_or_else(|| anyhow!("import patch '{}' is not selected", name))?;
        patch.set_input_file(Path::new(path))?;
    }

    let mut image = fs::read(image_path).with_context(|| format!("reading image {}", image_path.display()))?;
    let mut edits = Vec::new();
    for patch in &mut selected {
        patch.update(&assembler);
        if patch.has_errors() {
            warn!("Patch '{}' has diagnostics:\n{}", patch.name(), patch.error_text().trim_end());
        }
        let patch_edits = patch
            .edits()
            .with_context(|| format!("collecting edits for '{}'", patch.name()))?;
        debug!("Patch '{}': {} edits", patch.name(), patch_edits.len());
        edits.extend(patch_edits);
    }

    apply_edits(&mut image, &edits, &table)?;
    let target = output.unwrap_or(image_path);
    fs::write(target, &image).with_context(|| format!("writing {}", target.display()))?;
    info!("Applied {} patches ({} edits) to {}", selected.len(), edits.len(), target.display());
    Ok(())
}

fn export(settings: &PatcherSettings, dir: Option<PathBuf>, output: &Path) -> Result<()> {
    let (table, patches) = load_patches(settings, dir)?;
    fs::write(output, write_patches_xml(&patches, &table))
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Exported {} patches to {}", patches.len(), output.display());
    Ok(())
}
