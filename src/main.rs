//! # Syllabus Insights CLI (`syl`)
//!
//! The `syl` binary manages the syllabus library from the command line and
//! starts the web server.
//!
//! ## Usage
//!
//! ```bash
//! syl --config ./config/syl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `syl init` | Write a starter config (if missing) and create the data directories |
//! | `syl serve` | Start the HTTP server |
//! | `syl list` | List uploaded syllabi |
//! | `syl upload <file>` | Store a syllabus |
//! | `syl insight <slug> <kind>` | Print an insight, generating it if needed |
//! | `syl remove <slug>` | Delete a syllabus and its cached insights |
//! | `syl clear-cache <slug>` | Drop a syllabus's cached insights |
//! | `syl prune` | Drop records whose files are missing, and orphaned cache entries |
//!
//! ## Examples
//!
//! ```bash
//! syl init
//! syl upload ~/Downloads/cs101.pdf --course-code CS101 --instructor Smith --quarter Fall --year 2024
//! syl insight cs101-smith-fall-2024 grading
//! RUST_LOG=debug syl serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use syllabus_insights::cache::InsightSource;
use syllabus_insights::config::{self, Config};
use syllabus_insights::library::Library;
use syllabus_insights::models::{InsightKind, NewDocument};
use syllabus_insights::server;
use syllabus_insights::slug::Slug;

/// Upload course syllabi and read generated insights about them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `syl init` writes a starter one.
#[derive(Parser)]
#[command(
    name = "syl",
    about = "Syllabus Insights: upload syllabi and read generated insights about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/syl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config if none exists and create the storage layout.
    ///
    /// Safe to run repeatedly; an existing config is left untouched.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// List uploaded syllabi, oldest first.
    List,

    /// Store a syllabus file (.pdf, .docx, .pptx, .txt, .md).
    ///
    /// Without `--slug`, the slug is derived from the course fields, then the
    /// title, then the file name.
    Upload {
        /// Path to the file.
        path: PathBuf,

        #[arg(long)]
        slug: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        course_code: Option<String>,

        #[arg(long)]
        instructor: Option<String>,

        #[arg(long)]
        quarter: Option<String>,

        #[arg(long)]
        year: Option<i32>,
    },

    /// Print an insight for a syllabus, generating and caching it on first use.
    Insight {
        slug: String,

        /// One of: summary, workload, grading, prereqs.
        kind: String,
    },

    /// Delete a syllabus, its file and its cached insights. The slug stays
    /// reserved.
    Remove { slug: String },

    /// Drop every cached insight for a syllabus.
    ClearCache { slug: String },

    /// Drop records whose files are missing, and cache entries of unknown syllabi.
    Prune,
}

const STARTER_CONFIG: &str = r#"[storage]
root = "./data"
# max_upload_bytes = 26214400

[server]
bind = "127.0.0.1:8000"

[generation]
# "openai" calls an OpenAI-compatible chat-completions API.
# "placeholder" returns demo text without network access.
provider = "placeholder"
model = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 60
max_input_chars = 45000

[insights]
precompute_on_upload = false
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config_path = cli.config;
    let load = || config::load_config(&config_path);

    match cli.command {
        Commands::Init => {
            run_init(&config_path)?;
        }
        Commands::Serve => {
            server::run_server(&load()?).await?;
        }
        Commands::List => {
            run_list(&load()?)?;
        }
        Commands::Upload {
            path,
            slug,
            title,
            course_code,
            instructor,
            quarter,
            year,
        } => {
            let new = NewDocument {
                filename: String::new(),
                slug,
                title: title.unwrap_or_default(),
                course_code: course_code.unwrap_or_default(),
                instructor: instructor.unwrap_or_default(),
                quarter: quarter.unwrap_or_default(),
                year,
            };
            run_upload(&load()?, &path, new).await?;
        }
        Commands::Insight { slug, kind } => {
            run_insight(&load()?, &slug, &kind).await?;
        }
        Commands::Remove { slug } => {
            let library = Library::open(&load()?)?;
            let record = library.remove(&Slug::parse(&slug)?).await?;
            println!("Removed {} ({})", record.slug, record.filename);
        }
        Commands::ClearCache { slug } => {
            let library = Library::open(&load()?)?;
            let removed = library.clear_cache(&Slug::parse(&slug)?).await?;
            println!("Cleared {} cached insight(s) for {}", removed, slug);
        }
        Commands::Prune => {
            let library = Library::open(&load()?)?;
            let report = library.prune().await?;
            for slug in &report.removed {
                println!("Pruned {} (file missing)", slug);
            }
            println!(
                "Pruned {} record(s), {} orphaned cache entr{}",
                report.removed.len(),
                report.orphaned_entries,
                if report.orphaned_entries == 1 { "y" } else { "ies" }
            );
        }
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn run_init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Using existing config {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(config_path, STARTER_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote starter config to {}", config_path.display());
    }

    let cfg = config::load_config(config_path)?;
    Library::open(&cfg)?;
    println!("Storage ready at {}", cfg.storage.root.display());
    Ok(())
}

fn run_list(cfg: &Config) -> anyhow::Result<()> {
    let library = Library::open(cfg)?;
    let records = library.list();
    if records.is_empty() {
        println!("No syllabi uploaded.");
        return Ok(());
    }

    for record in records {
        let cached: Vec<&str> = library
            .cached_kinds(&record.slug)
            .into_iter()
            .map(InsightKind::key)
            .collect();
        println!(
            "{}  {}  [{}]  {}",
            record.slug,
            record.display_name(),
            cached.join(","),
            record.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn run_upload(cfg: &Config, path: &Path, mut new: NewDocument) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    new.filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();

    let library = Library::open(cfg)?;
    let record = library.upload(new, &bytes)?;
    println!("Uploaded {} as {}", record.filename, record.slug);

    if cfg.insights.precompute_on_upload {
        library.precompute(&record.slug).await;
    }
    Ok(())
}

async fn run_insight(cfg: &Config, slug: &str, kind: &str) -> anyhow::Result<()> {
    let kind: InsightKind = kind.parse()?;
    let slug = Slug::parse(slug)?;
    let library = Library::open(cfg)?;
    let outcome = library.insight(&slug, kind).await?;

    let source = match outcome.source {
        InsightSource::Cache => "cache",
        InsightSource::Generated => "generated",
    };
    println!("# {} for {} ({})", kind.label(), slug, source);
    println!();
    println!("{}", outcome.text.trim_end());
    Ok(())
}
