//! Command-line front end for zipbridge.
//!
//! SOURCE may be a ZIP archive, a directory, or a single file. Every selected
//! payload is streamed window by window into its destination, which either
//! ends up complete or is not left behind at all.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use zipbridge::{Archive, BridgeConfig, Cli, SourceFile, list_files, valid_paths, write_stream};

/// A selectable payload and the relative name it is listed and copied under.
struct Item {
    name: String,
    file: SourceFile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = cli.config();

    let items = if cli.is_archive() {
        archive_items(Path::new(&cli.source), config).await?
    } else {
        let listing = cli.list || cli.verbose;
        let dest = destination_root(&cli);
        tree_items(Path::new(&cli.source), config, (!listing).then_some(dest.as_path())).await?
    };

    if cli.list || cli.verbose {
        list_items(&items, cli.verbose);
        return Ok(());
    }

    let selected: Vec<&Item> = items.iter().filter(|item| is_selected(&cli, &item.name)).collect();
    let show_names = cli.pipe && selected.len() > 1;
    let mut copied = 0u64;
    for item in selected {
        copied += copy_item(item, &cli, &config, show_names).await?;
    }

    if !cli.is_quiet() {
        eprintln!("\nTotal bytes written: {}", format_size(copied));
    }
    Ok(())
}

/// Logs go to stderr so `-p` output stays clean.
fn init_logging(cli: &Cli) {
    let default = if cli.is_very_quiet() {
        "error"
    } else if cli.is_quiet() {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn archive_items(path: &Path, config: BridgeConfig) -> Result<Vec<Item>> {
    let archive = Arc::new(
        Archive::open_path(path, config)
            .await
            .with_context(|| format!("cannot open archive {}", path.display()))?,
    );

    let mut items = Vec::new();
    for entry in archive.entries() {
        // Directories are recreated from file paths.
        if entry.is_directory {
            continue;
        }
        if !is_contained(&entry.name) {
            warn!(entry = %entry.name, "skipping entry that escapes the destination");
            continue;
        }
        items.push(Item {
            name: entry.name.clone(),
            file: SourceFile::from_entry(archive.clone(), entry.clone()),
        });
    }
    Ok(items)
}

/// Files under `root`, minus those already inside `dest` when the
/// destination is nested in the tree being copied.
async fn tree_items(root: &Path, config: BridgeConfig, dest: Option<&Path>) -> Result<Vec<Item>> {
    let mut paths = valid_paths(&list_files(root).await?).await;
    if let Some(dest) = dest {
        paths = outside_destination(paths, root, dest);
    }

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let relative = match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            // root itself was a file
            _ => PathBuf::from(path.file_name().unwrap_or(path.as_os_str())),
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        items.push(Item {
            name,
            file: SourceFile::open(&path, config).await?,
        });
    }
    Ok(items)
}

fn list_items(items: &[Item], verbose: bool) {
    if verbose {
        println!("{:>10}  {:>10}  {:>5}  Name", "Length", "Date", "Time");
        println!("{}", "-".repeat(50));
    }

    let mut total = 0u64;
    for item in items {
        if !verbose {
            println!("{}", item.name);
            continue;
        }
        let (date, time) = DateTime::from_timestamp_millis(item.file.last_modified())
            .map(|stamp| {
                (
                    stamp.format("%Y-%m-%d").to_string(),
                    stamp.format("%H:%M").to_string(),
                )
            })
            .unwrap_or_default();
        println!("{:>10}  {:>10}  {:>5}  {}", item.file.size(), date, time, item.name);
        total += item.file.size();
    }

    if verbose {
        println!("{}", "-".repeat(50));
        println!("{:>10}  {:>17}  {} files", total, "", items.len());
    }
}

fn is_selected(cli: &Cli, name: &str) -> bool {
    if !cli.files.is_empty() {
        let wanted = cli.files.iter().any(|pattern| {
            if has_glob_chars(pattern) {
                glob_match(pattern, name)
            } else {
                name == pattern || base_name(name) == pattern
            }
        });
        if !wanted {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|pattern| name.contains(pattern.as_str()) || glob_match(pattern, name))
}

/// Copy one item and return the number of bytes written.
async fn copy_item(item: &Item, cli: &Cli, config: &BridgeConfig, show_name: bool) -> Result<u64> {
    if cli.pipe {
        let mut stdout = tokio::io::stdout();
        if show_name {
            stdout
                .write_all(format!("--- {} ---\n", item.name).as_bytes())
                .await?;
        }
        let mut written = 0u64;
        let mut stream = item.file.stream().await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            stdout.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        stdout.flush().await?;
        return Ok(written);
    }

    let relative = if cli.junk_paths {
        base_name(&item.name)
    } else {
        item.name.as_str()
    };
    let output = destination_root(cli).join(relative);

    if item.file.local_path().is_some_and(|source| same_file(source, &output)) {
        warn!(path = %output.display(), "skipping: destination is the source file");
        return Ok(0);
    }

    if tokio::fs::try_exists(&output).await.unwrap_or(false) {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", item.name);
            }
            return Ok(0);
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", item.name);
            }
            return Ok(0);
        }
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    if !cli.is_quiet() {
        println!("  writing: {}", item.name);
    }
    let stream = item.file.stream().await?;
    Ok(write_stream(&output, stream, config).await?)
}

fn destination_root(cli: &Cli) -> PathBuf {
    match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir),
        None => PathBuf::new(),
    }
}

/// Both paths resolve to the same existing file.
#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn outside_destination(paths: Vec<PathBuf>, root: &Path, dest: &Path) -> Vec<PathBuf> {
    let dest = if dest.as_os_str().is_empty() { Path::new(".") } else { dest };
    let (Ok(root), Ok(dest)) = (std::fs::canonicalize(root), std::fs::canonicalize(dest)) else {
        return paths;
    };
    if dest == root || !dest.starts_with(&root) {
        return paths;
    }
    paths
        .into_iter()
        .filter(|path| {
            std::fs::canonicalize(path)
                .map(|p| !p.starts_with(&dest))
                .unwrap_or(true)
        })
        .collect()
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Archive names must stay below the destination directory.
fn is_contained(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// `*` matches any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&pattern[1..], text) || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => matches(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match size {
        s if s >= GB => format!("{:.2} GB", s as f64 / GB as f64),
        s if s >= MB => format!("{:.2} MB", s as f64 / MB as f64),
        s if s >= KB => format!("{:.2} KB", s as f64 / KB as f64),
        s => format!("{s} bytes"),
    }
}
