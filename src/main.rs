use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use f3d::{AssetSource, BinarySource, CSource, F3dContext, ImportSettings, ImportedMesh, SegmentTable, TextureEntry, Tweakables, Ucode};

/// Interprets an F3D display list and prints what it draws.
#[derive(Parser)]
#[command(name = "f3d-dump", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display lists written as gbi.h macros
    Text(TextArgs),
    /// Display lists in a big-endian ROM image
    Rom(RomArgs),
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, value_enum)]
    ucode: Option<Ucode>,

    /// Divide vertex positions by this
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    #[arg(long)]
    no_textures: bool,

    #[arg(long)]
    no_lighting: bool,
}

#[derive(Args)]
struct TextArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Display list to import
    #[arg(long)]
    dl: String,

    /// Directory #include paths are relative to
    #[arg(long)]
    base: Option<PathBuf>,

    /// Write decoded textures here as PNG
    #[arg(long)]
    dump_textures: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct RomArgs {
    file: PathBuf,

    /// ROM offset of the display list
    #[arg(long, value_parser = parse_number)]
    start: u32,

    /// Segment base, as N=0xOFFSET
    #[arg(long = "segment", value_parser = parse_segment)]
    segments: Vec<(u8, u32)>,

    #[command(flatten)]
    common: CommonArgs,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("bad number '{}': {}", s, e))
}

fn parse_segment(s: &str) -> Result<(u8, u32), String> {
    let (segment, base) = s.split_once('=').ok_or_else(|| format!("expected N=BASE, got '{}'", s))?;
    let segment = parse_number(segment)?;
    if segment >= 16 {
        return Err(format!("segment {} out of range", segment));
    }
    Ok((segment as u8, parse_number(base)?))
}

fn settings(common: &CommonArgs, default_ucode: Ucode) -> ImportSettings {
    ImportSettings {
        scale: common.scale,
        ..ImportSettings::for_ucode(common.ucode.unwrap_or(default_ucode))
    }
}

fn run<S: AssetSource>(mut ctx: F3dContext<S>, common: &CommonArgs, dl: &str) -> f3d::Result<(ImportedMesh, F3dContext<S>)> {
    ctx.set_tweakables(Tweakables { disable_textures: common.no_textures, disable_lighting: common.no_lighting });
    let mesh = ctx.import(dl)?;
    Ok((mesh, ctx))
}

fn print_summary(name: &str, mesh: &ImportedMesh) {
    println!("{}: {} vertices, {} triangles, {} materials", name, mesh.vertices.len(), mesh.triangles.len(), mesh.materials.len());
    for (i, mat) in mesh.materials.iter().enumerate() {
        let tris = mesh.triangles.iter().filter(|t| t.material == i).count();
        let textures: Vec<String> = mat
            .tex
            .iter()
            .filter(|slot| slot.set)
            .map(|slot| match (&slot.image, &slot.reference) {
                (Some(image), _) => format!("{} {}", image, slot.format),
                (None, Some(reference)) => format!("{} {} (reference)", reference, slot.format),
                (None, None) => slot.format.clone(),
            })
            .collect();
        println!("  material {:3}: {:5} triangles, combiner [{}], textures [{}]", i, tris, mat.combiner1.join(" "), textures.join(", "));
    }
    for (name, info) in mesh.textures.iter() {
        println!("  texture {}: {}x{}", name, info.width, info.height);
    }
    for (group, verts) in mesh.limb_groups.iter() {
        debug!(target: "F3D", "transform {}: {} vertices", group, verts.len());
    }
}

#[cfg(feature = "png")]
fn dump_textures<S: AssetSource>(ctx: &F3dContext<S>, dir: &std::path::Path) -> f3d::Result<()> {
    fs::create_dir_all(dir)?;
    for (name, entry) in ctx.textures() {
        if let TextureEntry::Image(img) = entry {
            let path = dir.join(format!("{}.png", name));
            img.save_png(&path)?;
            info!(target: "F3D", "wrote {}", path.display());
        }
    }
    Ok(())
}

#[cfg(not(feature = "png"))]
fn dump_textures<S: AssetSource>(_ctx: &F3dContext<S>, _dir: &std::path::Path) -> f3d::Result<()> {
    warn!(target: "F3D", "built without png support, not writing textures");
    Ok(())
}

fn text_command(args: TextArgs) -> f3d::Result<()> {
    let mut settings = settings(&args.common, Ucode::F3dex2);
    settings.base_path = args.base.clone().or_else(|| args.files.first().and_then(|f| f.parent().map(|p| p.to_path_buf())));

    let source = CSource::from_files(&args.files, &settings)?;
    let (mesh, ctx) = run(F3dContext::new(source, settings), &args.common, &args.dl)?;
    print_summary(&args.dl, &mesh);

    if let Some(dir) = args.dump_textures.as_deref() {
        dump_textures(&ctx, dir)?;
    }
    Ok(())
}

fn rom_command(args: RomArgs) -> f3d::Result<()> {
    let settings = settings(&args.common, Ucode::F3d);
    let rom = fs::read(&args.file)?;
    info!(target: "F3D", "loaded {} (${:08X} bytes)", args.file.display(), rom.len());

    let mut segments = SegmentTable::new();
    for (segment, base) in args.segments.iter() {
        segments.set(*segment, *base);
    }

    let dl = BinarySource::<Vec<u8>>::list_name(args.start as usize);
    let source = BinarySource::new(rom, segments, &settings);
    let (mesh, _) = run(F3dContext::new(source, settings), &args.common, &dl)?;
    print_summary(&dl, &mesh);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Text(args) => text_command(args),
        Commands::Rom(args) => rom_command(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "F3D", "{}", e);
            ExitCode::FAILURE
        },
    }
}
