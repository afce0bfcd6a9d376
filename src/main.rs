use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use memmap2::Mmap;
use rayon::prelude::*;
use rootcause::Report;
use tracing::{info, warn};

use kclkit::kcl::octree::OctreeStats;
use kclkit::kcl::patch::patch_collision_flags;
use kclkit::obj::{self, UpAxis};
use kclkit::{CollisionMesh, EncodeOptions, KclError, KclResult, parse_kcl, write_kcl};

/// Inspect, convert and edit KCL collision files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header, per-model counts and octree statistics
    Info { file: PathBuf },
    /// Convert a KCL file to OBJ
    Export {
        file: PathBuf,
        #[clap(short, long)]
        output: PathBuf,
        #[clap(long, value_enum, default_value_t = UpAxis::Y)]
        up_axis: UpAxis,
    },
    /// Build a KCL file from one or more OBJ files, merged into one model
    Build {
        #[clap(required = true)]
        objs: Vec<PathBuf>,
        #[clap(short, long)]
        output: PathBuf,
        /// Cubes holding at most this many triangles become leaves
        #[clap(long, default_value_t = 30)]
        max_triangles: usize,
        /// Cubes narrower than this are never split
        #[clap(long, default_value_t = 256)]
        min_cube_width: u32,
        #[clap(long, value_enum, default_value_t = UpAxis::Y)]
        up_axis: UpAxis,
        /// Drop zero-area triangles instead of failing
        #[clap(long)]
        skip_degenerate: bool,
        /// Flags for faces without a `flag_<n>` material
        #[clap(long, value_parser = parse_u16, default_value = "0")]
        default_flags: u16,
    },
    /// Rewrite collision flags in place, given `global_index=flags` pairs
    SetFlags {
        file: PathBuf,
        #[clap(required = true, value_parser = parse_assignment)]
        assignments: Vec<(u32, u16)>,
    },
    /// Print the decoded file as JSON
    Dump { file: PathBuf },
}

fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("{value:?}: {e}"))
}

fn parse_assignment(value: &str) -> Result<(u32, u16), String> {
    let (index, flags) = value
        .split_once('=')
        .ok_or_else(|| format!("expected global_index=flags, got {value:?}"))?;
    let index = index.parse::<u32>().map_err(|e| format!("{index:?}: {e}"))?;
    Ok((index, parse_u16(flags)?))
}

fn io_error(e: std::io::Error) -> Report<KclError> {
    Report::new(KclError::Io(e))
}

fn map_file(path: &Path) -> KclResult<Mmap> {
    let file = File::open(path).map_err(io_error)?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_error)?;
    Ok(mmap)
}

fn info(path: &Path) -> KclResult<()> {
    let mmap = map_file(path)?;
    let file = parse_kcl(&mmap[..])?;

    println!("{:#?}", file.header);
    for (i, (model, offset)) in file.models.iter().zip(&file.model_offsets).enumerate() {
        println!("Model{i} @ 0x{offset:X}");
        println!("  positions: {}", model.positions.len());
        println!("  normals:   {}", model.normals.len());
        println!("  triangles: {}", model.triangles.len());
        match model.root_layout() {
            Ok(layout) => println!(
                "  root grid: {:?} cubes of width {}",
                layout.bits.map(|bits| 1u32 << bits),
                layout.cube_width()
            ),
            Err(report) => println!("  root grid: {}", report.current_context()),
        }
        match &model.octree {
            Some(roots) => println!("  {:?}", OctreeStats::collect(roots)),
            None => println!("  octree: not decoded"),
        }
    }
    Ok(())
}

fn export(path: &Path, output: &Path, up_axis: UpAxis) -> KclResult<()> {
    let mmap = map_file(path)?;
    let file = parse_kcl(&mmap[..])?;
    let writer = BufWriter::new(File::create(output).map_err(io_error)?);
    obj::write_obj(writer, &file, up_axis)?;
    info!(output = %output.display(), models = file.models.len(), "exported obj");
    Ok(())
}

fn load_mesh(
    path: &Path,
    up_axis: UpAxis,
    default_flags: u16,
    skip_degenerate: bool,
) -> KclResult<CollisionMesh> {
    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut triangles = obj::read_obj(reader, up_axis, default_flags)?;
    if skip_degenerate {
        let mut index = 0usize;
        triangles.retain(|triangle| {
            let keep = !triangle.is_degenerate();
            if !keep {
                warn!(file = %path.display(), triangle = index, "skipping degenerate triangle");
            }
            index += 1;
            keep
        });
    }
    CollisionMesh::new(triangles)
}

fn build(
    objs: &[PathBuf],
    output: &Path,
    options: &EncodeOptions,
    up_axis: UpAxis,
    skip_degenerate: bool,
    default_flags: u16,
) -> KclResult<()> {
    let meshes = objs
        .par_iter()
        .map(|path| load_mesh(path, up_axis, default_flags, skip_degenerate))
        .collect::<KclResult<Vec<_>>>()?;
    let mesh = CollisionMesh::merge(meshes)?;

    let bytes = write_kcl(&[mesh], options)?;
    fs::write(output, bytes).map_err(io_error)?;
    Ok(())
}

fn set_flags(path: &Path, assignments: &[(u32, u16)]) -> KclResult<()> {
    let mut data = fs::read(path).map_err(io_error)?;
    let flags: BTreeMap<u32, u16> = assignments.iter().copied().collect();
    let changed = patch_collision_flags(&mut data, &flags)?;
    fs::write(path, data).map_err(io_error)?;
    info!(triangles = changed, "updated collision flags");
    Ok(())
}

fn dump(path: &Path) -> KclResult<()> {
    let mmap = map_file(path)?;
    let file = parse_kcl(&mmap[..])?;
    serde_json::to_writer_pretty(std::io::stdout().lock(), &file)
        .map_err(|e| Report::new(KclError::Io(std::io::Error::other(e))))?;
    println!();
    Ok(())
}

fn main() -> KclResult<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Info { file } => info(&file),
        Command::Export {
            file,
            output,
            up_axis,
        } => export(&file, &output, up_axis),
        Command::Build {
            objs,
            output,
            max_triangles,
            min_cube_width,
            up_axis,
            skip_degenerate,
            default_flags,
        } => {
            let options = EncodeOptions::builder()
                .max_triangles_per_leaf(max_triangles)
                .min_cube_width(min_cube_width)
                .build();
            build(&objs, &output, &options, up_axis, skip_degenerate, default_flags)
        }
        Command::SetFlags { file, assignments } => set_flags(&file, &assignments),
        Command::Dump { file } => dump(&file),
    }
}
