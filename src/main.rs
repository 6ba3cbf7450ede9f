use clap::{Parser, Subcommand};
use chrono::Utc;
use log::{error, info, warn, LevelFilter};
use peeler::protection::read_protected_list;
use peeler::region::{read_region, SECTOR_SIZE};
use peeler::state::{LastRunRecord, DEFAULT_STATE_FILE};
use peeler::{peel_world, PeelError, PeelOptions, PeelResult, ProtectionIndex};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "peeler", version, about = "Remove rarely visited chunks from Minecraft region files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove unused chunks from one or more worlds
    Peel {
        /// World directories, comma separated
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        world_dirs: Vec<PathBuf>,
        /// Chunks with an InhabitedTime (ticks) at or below this are removed
        #[arg(long, default_value = "0")]
        min_inhabited: i64,
        #[arg(long, default_value = "10")]
        threads_num: usize,
        /// Report what would be removed without touching any file
        #[arg(long)]
        dry_run: bool,
        /// Write peeled worlds here instead of rewriting in place
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Protection list applied to every world (created if missing)
        #[arg(long, default_value = "protected_chunks.list")]
        protected_chunks: PathBuf,
        /// Minutes after the last run during which peeling is skipped
        #[arg(long, default_value = "0")]
        cool_down: u64,
        /// Minutes a region file must stay unmodified before it is touched
        #[arg(long, default_value = "0")]
        mca_modifiable_delay: u64,
        #[arg(long)]
        skip_peeler: bool,
        /// Where the last run time is kept
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
        #[arg(short, long)]
        verbose: bool,
        /// Print the combined result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// List the chunks of a region file
    Inspect {
        input: PathBuf,
        /// Hide chunks with zero InhabitedTime
        #[arg(long)]
        hide_unused: bool,
    },
}

#[derive(Serialize)]
struct WorldReport {
    world:  PathBuf,
    #[serde(flatten)]
    result: PeelResult,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Peel ─────────────────────────────────────────────────────────────
        Commands::Peel {
            world_dirs, min_inhabited, threads_num, dry_run, output_dir,
            protected_chunks, cool_down, mca_modifiable_delay, skip_peeler,
            state_file, verbose, json,
        } => {
            init_logging(verbose);

            info!("min inhabited time (ticks): {min_inhabited}");
            info!("cool down (min):            {cool_down}");
            info!("modifiable delay (min):     {mca_modifiable_delay}");
            info!("worker threads:             {threads_num}");
            info!("dry run:                    {dry_run}");
            info!("protected chunks list:      {}", protected_chunks.display());

            let protection = load_global_protection(&protected_chunks)?;
            if min_inhabited > 200 {
                warn!("min-inhabited is above 200 ticks (10 seconds)");
                warn!("chunks that are currently in use may be removed");
            }

            let mut record = LastRunRecord::load(&state_file)?;
            if world_dirs.is_empty() {
                info!("no world to process, skipped");
                return Ok(());
            }
            if skip_peeler {
                info!("skipped");
                return Ok(());
            }
            if record.in_cool_down(cool_down, Utc::now()) {
                info!("in cool-down period, skipped");
                return Ok(());
            }

            let mut reports = Vec::new();
            for world in &world_dirs {
                info!("processing {}", world.display());
                let options = PeelOptions {
                    threads: threads_num,
                    min_inhabited,
                    dry_run,
                    output_root: output_dir.as_ref().map(|out| mirror_root(out, world)),
                    min_file_age: (mca_modifiable_delay > 0)
                        .then(|| Duration::from_secs(mca_modifiable_delay * 60)),
                };
                match peel_world(world, protection.clone(), &options) {
                    Ok(result) => {
                        info!("{}: {} region(s) affected, {} chunk(s) removed, {} reclaimed in {:.3}s",
                              world.display(), result.regions_affected, result.chunks_removed,
                              human_bytes(result.bytes_reclaimed), result.elapsed.as_secs_f64());
                        reports.push(WorldReport { world: world.clone(), result });
                    }
                    Err(e @ (PeelError::RegionFilesNotFound(_) | PeelError::Io(_))) => {
                        error!("{}: {e}, skipped", world.display());
                    }
                    Err(e) => {
                        error!("{}: {e}", world.display());
                        return Err(e.into());
                    }
                }
            }

            if !reports.is_empty() && !dry_run {
                record.store(Utc::now())?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input, hide_unused } => {
            init_logging(false);
            let region = read_region(&input)?;
            println!("Region ({}, {})  {}", region.region_x(), region.region_z(), input.display());
            println!("{:>6} {:>6} {:>7} {:>7} {:>16}  {}",
                     "X", "Z", "Sector", "Count", "InhabitedTime", "Note");
            for c in region.existing_chunks() {
                if hide_unused && c.is_unused() {
                    continue;
                }
                let note = if c.oversized { "oversized" } else { "" };
                println!("{:>6} {:>6} {:>7} {:>7} {:>16}  {}",
                         c.global_x, c.global_z, c.offset / SECTOR_SIZE, c.sector_count,
                         c.inhabited_time, note);
            }
            println!("{} chunk(s) present", region.existing_chunks().len());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Create the list if it does not exist yet, then parse it.
fn load_global_protection(path: &Path) -> Result<ProtectionIndex, Box<dyn std::error::Error>> {
    OpenOptions::new().create(true).append(true).open(path)?;
    if !fs::metadata(path)?.is_file() {
        return Err(format!("{} is not a file", path.display()).into());
    }
    Ok(read_protected_list(path, ProtectionIndex::new())?)
}

/// Each world gets its own subdirectory of the output root.
fn mirror_root(output_dir: &Path, world: &Path) -> PathBuf {
    match world.file_name() {
        Some(name) => output_dir.join(name),
        None => output_dir.to_path_buf(),
    }
}

fn human_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
