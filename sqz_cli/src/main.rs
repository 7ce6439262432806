use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use sqz_codecs::{CompressionMethod, CompressionParams};
use sqz_core::{FileEntryInput, FileEntryOutput, Squeeze};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "sqz",
    about = "Create, inspect and extract sqz archives",
    version
)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append files, directories or symlinks to an archive
    Append {
        /// Archive file (created if missing)
        archive: PathBuf,
        /// Paths to append; directories are walked recursively
        paths: Vec<PathBuf>,
        /// Compression method: none | huffman | deflate
        #[arg(short, long, default_value = "deflate")]
        method: String,
        /// Compression level (0-8)
        #[arg(short, long, default_value_t = 5)]
        level: u8,
    },
    /// Append like `append`, but replace entries that already exist
    Update {
        archive: PathBuf,
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = "deflate")]
        method: String,
        #[arg(short, long, default_value_t = 5)]
        level: u8,
    },
    /// List archive entries
    List {
        archive: PathBuf,
    },
    /// Extract entries (all, or only the named paths)
    Extract {
        archive: PathBuf,
        /// Entry paths to extract; empty means everything
        paths: Vec<PathBuf>,
        /// Extraction root directory
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,
    },
    /// Remove entries by path
    Remove {
        archive: PathBuf,
        paths: Vec<PathBuf>,
    },
}

fn method_from_name(name: &str) -> anyhow::Result<CompressionMethod> {
    match name {
        "none" | "n" => Ok(CompressionMethod::None),
        "huffman" | "h" => Ok(CompressionMethod::Huffman),
        "deflate" | "d" => Ok(CompressionMethod::Deflate),
        other => bail!("unknown method '{other}'. Valid options: none, huffman, deflate"),
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Collect `path` and, for directories, everything below it.
fn collect_paths(path: &Path, into: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    into.push(path.to_path_buf());
    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("failed getting file status of '{}'", path.display()))?;
    if metadata.file_type().is_dir() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("failed reading directory '{}'", path.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        children.sort();
        for child in children {
            collect_paths(&child, into)?;
        }
    }
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn open_for_write(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed opening archive '{}'", path.display()))
}

fn run_append(
    archive: PathBuf,
    paths: Vec<PathBuf>,
    method: &str,
    level: u8,
    replace: bool,
) -> anyhow::Result<()> {
    if paths.is_empty() {
        bail!("nothing to append");
    }
    let compression = CompressionParams::new(method_from_name(method)?, level);
    sqz_codecs::validate_params(compression)?;

    let mut all_paths = Vec::new();
    for path in &paths {
        collect_paths(path, &mut all_paths)?;
    }

    let mut file = open_for_write(&archive)?;
    let mut squeeze = Squeeze::new(&mut file);
    let statuses: Vec<_> = all_paths
        .iter()
        .map(|path| {
            let input = Box::new(FileEntryInput::new(path.clone(), compression));
            (path.clone(), squeeze.will_append(input))
        })
        .collect();

    let all_ok = if replace {
        squeeze.update()?
    } else {
        squeeze.write()?
    };

    let mut nr_ok = 0usize;
    for (path, status) in statuses {
        match status.take() {
            Some(Ok(())) => {
                nr_ok += 1;
                eprintln!("  appended {}", path.display());
            }
            Some(Err(error)) => eprintln!("  FAILED {}: {error:#}", path.display()),
            None => eprintln!("  SKIPPED {}", path.display()),
        }
    }
    eprintln!("{nr_ok}/{} entries appended", all_paths.len());
    if !all_ok {
        bail!("some entries failed");
    }
    Ok(())
}

fn run_list(archive: PathBuf) -> anyhow::Result<()> {
    let mut file = File::open(&archive)
        .with_context(|| format!("failed opening archive '{}'", archive.display()))?;
    let mut squeeze = Squeeze::new(&mut file);

    let mut total_content: u64 = 0;
    let mut nr_entries = 0usize;
    for (_, header) in squeeze.iter() {
        println!(
            "{} {:>8} {:>9} {}",
            header.attributes,
            header.compression.method,
            human_bytes(header.content_size),
            header.path_lossy()
        );
        total_content += header.content_size;
        nr_entries += 1;
    }
    eprintln!("{nr_entries} entries, {} of content", human_bytes(total_content));
    Ok(())
}

fn run_extract(
    archive: PathBuf,
    paths: Vec<PathBuf>,
    directory: PathBuf,
) -> anyhow::Result<()> {
    let mut file = File::open(&archive)
        .with_context(|| format!("failed opening archive '{}'", archive.display()))?;
    let mut squeeze = Squeeze::new(&mut file);

    let wanted: Vec<Vec<u8>> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned().into_bytes())
        .collect();

    let entries = squeeze.entries();
    let mut output = FileEntryOutput::new(&directory);
    let mut nr_ok = 0usize;
    let mut nr_failed = 0usize;
    for (pos, header) in &entries {
        if !wanted.is_empty() && !wanted.contains(&header.path) {
            continue;
        }
        match squeeze.extract(*pos, header, &mut output) {
            Ok(()) => {
                nr_ok += 1;
                eprintln!("  extracted {}", header.path_lossy());
            }
            Err(error) => {
                nr_failed += 1;
                eprintln!("  FAILED {}: {error:#}", header.path_lossy());
            }
        }
    }
    eprintln!("{nr_ok} entries extracted into '{}'", directory.display());
    if nr_failed > 0 {
        bail!("{nr_failed} entries failed to extract");
    }
    Ok(())
}

fn run_remove(archive: PathBuf, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    if paths.is_empty() {
        bail!("nothing to remove");
    }
    let mut file = open_for_write(&archive)?;
    let mut squeeze = Squeeze::new(&mut file);

    let wanted: Vec<Vec<u8>> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned().into_bytes())
        .collect();

    let entries = squeeze.entries();
    let mut statuses = Vec::new();
    let mut missing = Vec::new();
    for want in &wanted {
        let mut found = false;
        for (pos, header) in &entries {
            if &header.path == want {
                statuses.push((header.path_lossy().into_owned(), squeeze.will_remove(*pos, header)));
                found = true;
            }
        }
        if !found {
            missing.push(String::from_utf8_lossy(want).into_owned());
        }
    }

    let all_ok = squeeze.write()?;
    for (path, status) in statuses {
        match status.take() {
            Some(Ok(())) => eprintln!("  removed {path}"),
            Some(Err(error)) => eprintln!("  FAILED {path}: {error:#}"),
            None => eprintln!("  SKIPPED {path}"),
        }
    }
    for path in &missing {
        eprintln!("  NOT FOUND {path}");
    }
    if !all_ok || !missing.is_empty() {
        bail!("some entries were not removed");
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Append { archive, paths, method, level } => {
            run_append(archive, paths, &method, level, false)
        }
        Commands::Update { archive, paths, method, level } => {
            run_append(archive, paths, &method, level, true)
        }
        Commands::List { archive } => run_list(archive),
        Commands::Extract { archive, paths, directory } => {
            run_extract(archive, paths, directory)
        }
        Commands::Remove { archive, paths } => run_remove(archive, paths),
    }
}
