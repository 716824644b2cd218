//! Roost - a disk-backed image cache, exercised from the command line
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use roost::cache::FetchRequest;
use roost::{CacheStore, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args()? {
        Command::Fetch { url, key } => fetch(&url, key.as_deref()).await,
        Command::Resolve { key } => resolve(&key),
        Command::Remove { key } => remove(&key).await,
        Command::Prune => prune().await,
        Command::Stats => stats().await,
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
enum Command {
    Fetch { url: String, key: Option<String> },
    Resolve { key: String },
    Remove { key: String },
    Prune,
    Stats,
    Help,
    Version,
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "fetch" => {
            let url = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing URL to fetch"))?
                .clone();
            let key = args.get(3).cloned();
            Ok(Command::Fetch { url, key })
        }

        "resolve" => {
            let key = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing cache key"))?
                .clone();
            Ok(Command::Resolve { key })
        }

        "rm" => {
            let key = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing cache key"))?
                .clone();
            Ok(Command::Remove { key })
        }

        "prune" => Ok(Command::Prune),
        "stats" => Ok(Command::Stats),

        other => anyhow::bail!("Unknown command: {other} (try 'roost help')"),
    }
}

fn open_store() -> Result<CacheStore> {
    CacheStore::open(&Config::load()?)
}

/// Fetch a remote image into the cache and print its entry path.
async fn fetch(url: &str, key: Option<&str>) -> Result<()> {
    let store = open_store()?;
    let derived;
    let key = match key {
        Some(k) => k,
        None => {
            derived = roost::cache::derive_key(
                url,
                &std::collections::BTreeMap::new(),
                store.default_format(),
                store.version_marker(),
            );
            &derived
        }
    };

    let request = FetchRequest {
        url: url.to_string(),
        auth_token: std::env::var("ROOST_AUTH_TOKEN").ok(),
        progress: Some(Box::new(|received, total| match total {
            Some(total) if total > 0 => {
                eprint!("\r{received}/{total} bytes ({}%)", received * 100 / total);
            }
            _ => eprint!("\r{received} bytes"),
        })),
    };

    if store.fetch_and_cache(key, request).await {
        eprintln!();
        println!("{}", store.entry_path(key).display());
        Ok(())
    } else {
        eprintln!();
        anyhow::bail!("Fetch failed for {url}")
    }
}

/// Print the displayable URI for a cached entry.
fn resolve(key: &str) -> Result<()> {
    let store = open_store()?;
    println!("{}", store.resolve_cached_uri(key)?);
    Ok(())
}

/// Delete a cached entry.
async fn remove(key: &str) -> Result<()> {
    let store = open_store()?;
    store.remove_entry(key).await;
    println!("Removed {key}");
    Ok(())
}

/// Prune the cache back under the configured size threshold.
async fn prune() -> Result<()> {
    let store = open_store()?;
    let report = store.prune().await?;
    println!(
        "Scanned {} entries ({} bytes), deleted {} ({} bytes freed), {} locked entries kept",
        report.scanned_files,
        report.total_bytes_before,
        report.deleted_files,
        report.freed_bytes,
        report.skipped_locked
    );
    Ok(())
}

/// Print cache occupancy.
async fn stats() -> Result<()> {
    let store = open_store()?;
    let stats = store.stats().await?;
    println!("{} entries, {} bytes", stats.entries, stats.total_bytes);
    println!("{}", store.images_dir().display());
    Ok(())
}

fn print_help() {
    println!("roost {} - a disk-backed image cache", roost::VERSION);
    println!();
    println!("USAGE:");
    println!("  roost <command> [args]");
    println!();
    println!("COMMANDS:");
    println!("  fetch <url> [key]   Download an image into the cache");
    println!("  resolve <key>       Print the file:// URI for a cached entry");
    println!("  rm <key>            Delete a cached entry");
    println!("  prune               Prune the cache under the size threshold");
    println!("  stats               Show entry count and total size");
    println!("  help                Show this help");
    println!("  version             Show version");
    println!();
    println!("ENVIRONMENT:");
    println!("  ROOST_AUTH_TOKEN    Sent as the auth-token header on fetches");
    println!("  RUST_LOG            Log filter (e.g. debug)");
}

fn print_version() {
    println!("roost {}", roost::VERSION);
    println!("{}", roost::REPO_URL);
}
