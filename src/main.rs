//! CLI entry point for `tonieshell`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{TimeZone, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use tonieshell::codec::PAGE_SIZE;
use tonieshell::error::TonieError;
use tonieshell::export;
use tonieshell::store::reader::TonieStore;

/// Default filename of a container on the Toniebox SD card.
const CONTAINER_FILENAME: &str = "500304E0";

#[derive(Parser)]
#[command(name = "tonieshell", version, about = "Inspect, verify, split and rebuild Tonie audio containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and the chapter table
    Info {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Verify the payload hash and length against the header
    Verify {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Export every chapter as a standalone Ogg Opus file
    Export {
        path: PathBuf,
        /// Output directory for chapterNNN.ogg files
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rewrite a container keeping only the listed chapters
    Skip {
        path: PathBuf,
        /// Output file (or directory, which gets a 500304E0 inside)
        #[arg(short, long)]
        output: PathBuf,
        /// Comma-separated chapter numbers to keep, in playback order
        #[arg(short, long, value_delimiter = ',')]
        chapters: Vec<usize>,
    },
    /// Replace all chapters with the given Ogg Opus files
    Swap {
        path: PathBuf,
        /// Output file (or directory, which gets a 500304E0 inside)
        #[arg(short, long)]
        output: PathBuf,
        /// One or more Ogg Opus files, one chapter each
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = tonieshell::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Info { path, json } => cmd_info(&path, json, &config),
        Commands::Verify { path, json } => cmd_verify(&path, json),
        Commands::Export { path, output } => cmd_export(&path, &output),
        Commands::Skip {
            path,
            output,
            chapters,
        } => cmd_skip(&path, &output, &chapters),
        Commands::Swap {
            path,
            output,
            inputs,
        } => cmd_swap(&path, &output, &inputs),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &tonieshell::config::Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = tonieshell::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "tonieshell.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "tonieshell", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Show header fields and the chapter table.
fn cmd_info(path: &Path, json: bool, config: &tonieshell::config::Config) -> anyhow::Result<()> {
    let store = TonieStore::open(path)?;
    if json {
        print_info_json(&store)?;
    } else {
        print_info_table(&store, config);
    }
    Ok(())
}

/// Verify payload integrity, exiting nonzero on mismatch.
fn cmd_verify(path: &Path, json: bool) -> anyhow::Result<()> {
    let store = TonieStore::open(path)?;

    let start = Instant::now();
    let result = store.verify_payload();
    let elapsed = start.elapsed();

    match result {
        Ok(()) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ok": true,
                        "sha1": store.header().hash_hex(),
                        "payload_length": store.header().data_length,
                        "elapsed_ms": elapsed.as_millis(),
                    }))?
                );
            } else {
                println!();
                println!("  OK: payload matches header ({:.2?})", elapsed);
                println!("  {:<16} {}", "SHA-1", store.header().hash_hex());
                println!(
                    "  {:<16} {}",
                    "Payload",
                    format_size(store.header().data_length, BINARY)
                );
                println!();
            }
            Ok(())
        }
        Err(TonieError::Integrity(e)) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ok": false,
                        "hash_mismatch": e.hash.as_ref().map(|h| serde_json::json!({
                            "expected": hex::encode(h.expected),
                            "actual": hex::encode(h.actual),
                        })),
                        "length_mismatch": e.length.as_ref().map(|l| serde_json::json!({
                            "expected": l.expected,
                            "actual": l.actual,
                        })),
                    }))?
                );
            }
            anyhow::bail!("integrity check failed: {e}")
        }
        Err(e) => Err(e.into()),
    }
}

/// Export every chapter as an Ogg Opus file.
fn cmd_export(path: &Path, output: &Path) -> anyhow::Result<()> {
    let store = TonieStore::open(path)?;
    let total = store.header().chapter_count();
    if total == 0 {
        println!("  Container has no chapter markers.");
        return Ok(());
    }

    println!(
        "  Exporting {} chapter(s) to {}",
        total,
        output.display()
    );

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Exporting [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let paths = export::ogg::export_all_chapters(
        &store,
        output,
        Some(&|current, _total| {
            pb.set_position(current as u64);
        }),
    )?;

    pb.finish_and_clear();
    println!("  Exported {} .ogg file(s)", paths.len());
    Ok(())
}

/// Rewrite a container keeping only the listed chapters.
fn cmd_skip(path: &Path, output: &Path, chapters: &[usize]) -> anyhow::Result<()> {
    if chapters.is_empty() {
        anyhow::bail!("no chapters given; use --chapters 0,2,5");
    }

    let store = TonieStore::open(path)?;
    let out_path = resolve_output(output)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Writing [{bar:40.cyan/blue}] {pos}/{len} pages")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let stats = export::tonie::compose_tonie(
        &store,
        chapters,
        &out_path,
        Some(&|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        }),
    )?;
    pb.finish_and_clear();

    print_compose_summary(&out_path, &stats);
    Ok(())
}

/// Replace all chapters with the given Ogg Opus files.
fn cmd_swap(path: &Path, output: &Path, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let mut store = TonieStore::open(path)?;
    let out_path = resolve_output(output)?;

    let mut new_chapters = Vec::with_capacity(inputs.len());
    for input in inputs {
        println!("  Appending {}", input.display());
        let mut file = File::open(input).map_err(|e| TonieError::io(input, e))?;
        new_chapters.push(export::append::append_chapter(&mut store, &mut file)?);
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Writing [{bar:40.cyan/blue}] {pos}/{len} pages")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let stats = export::tonie::compose_tonie(
        &store,
        &new_chapters,
        &out_path,
        Some(&|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        }),
    )?;
    pb.finish_and_clear();

    print_compose_summary(&out_path, &stats);
    Ok(())
}

/// Treat a directory output as `<dir>/500304E0`, like the SD card layout.
fn resolve_output(output: &Path) -> anyhow::Result<PathBuf> {
    if output.is_dir() {
        Ok(output.join(CONTAINER_FILENAME))
    } else {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(output.to_path_buf())
    }
}

fn print_compose_summary(out_path: &Path, stats: &export::tonie::ComposeStats) {
    println!();
    println!("  {:<16} {}", "Output", out_path.display());
    println!("  {:<16} {}", "Chapters", stats.chapter_pages.len());
    println!("  {:<16} {}", "Pages", stats.page_count);
    println!(
        "  {:<16} {}",
        "Payload",
        format_size(stats.payload_len, BINARY)
    );
    println!();
}

/// Print header fields and the chapter table.
fn print_info_table(store: &TonieStore, config: &tonieshell::config::Config) {
    let header = store.header();
    let file_size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    let timestamp = Utc
        .timestamp_opt(i64::from(header.timestamp), 0)
        .single()
        .map(|t| t.format(&config.general.date_format).to_string())
        .unwrap_or_else(|| header.timestamp.to_string());

    println!();
    println!("  {:<16} {}", "File", store.path().display());
    println!("  {:<16} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<16} {}", "SHA-1", header.hash_hex());
    println!(
        "  {:<16} {}",
        "Payload",
        format_size(header.data_length, BINARY)
    );
    println!("  {:<16} {} ({})", "Timestamp", timestamp, header.timestamp);
    println!("  {:<16} {}", "Ogg pages", store.pages().len());
    println!(
        "  {:<16} {}",
        "Payload aligned",
        if store.payload_offset() % PAGE_SIZE as u64 == 0 {
            "yes"
        } else {
            "NO"
        }
    );

    if header.chapter_pages.is_empty() {
        println!("  {:<16} none", "Chapters");
        println!();
        return;
    }

    println!();
    println!("  {:<4} {:>10} {:>8} {:>10}", "#", "Start page", "Pages", "Duration");
    println!("  {}", "-".repeat(36));
    for chapter in 0..header.chapter_count() {
        let range = match store.chapter_page_range(chapter) {
            Ok(range) => range,
            Err(_) => continue,
        };
        let pages = range.len();
        let samples: u64 = range.map(|p| store.pages()[p].duration()).sum();
        let seconds = samples / 48_000;
        println!(
            "  {:<4} {:>10} {:>8} {:>7}:{:02}",
            chapter,
            header.chapter_pages[chapter],
            pages,
            seconds / 60,
            seconds % 60
        );
    }
    println!();
}

/// Print header fields and the chapter table as JSON.
fn print_info_json(store: &TonieStore) -> anyhow::Result<()> {
    let header = store.header();
    let file_size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    let chapters: Vec<serde_json::Value> = (0..header.chapter_count())
        .map(|chapter| {
            let (pages, samples) = store
                .chapter_page_range(chapter)
                .map(|range| {
                    let pages = range.len();
                    let samples: u64 = range.map(|p| store.pages()[p].duration()).sum();
                    (pages, samples)
                })
                .unwrap_or((0, 0));
            serde_json::json!({
                "chapter": chapter,
                "start_page": header.chapter_pages[chapter],
                "pages": pages,
                "duration_samples": samples,
            })
        })
        .collect();

    let info = serde_json::json!({
        "file": store.path().to_string_lossy(),
        "file_size": file_size,
        "sha1": header.hash_hex(),
        "payload_length": header.data_length,
        "timestamp": header.timestamp,
        "ogg_pages": store.pages().len(),
        "payload_offset": store.payload_offset(),
        "payload_aligned": store.payload_offset() % PAGE_SIZE as u64 == 0,
        "chapters": chapters,
    });

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
