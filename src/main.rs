//! splimport - SPL labeling archive importer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use splimport::archive::{self, ArchiveSource};
use splimport::db::SplDb;
use splimport::import::{BatchSummary, CancelFlag, ImportProgress, Importer};
use splimport::render::{self, MissingChildPolicy};
use splimport::settings::Settings;

#[derive(Parser)]
#[command(name = "splimport")]
#[command(version)]
#[command(about = "Import SPL labeling archives into SQLite and render their section trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one or more zip archives
    Import {
        /// Archives to import, in order
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Database file (defaults to the settings value)
        #[arg(long, env = "SPLIMPORT_DB")]
        db: Option<PathBuf>,

        /// User recorded as the importer
        #[arg(long, env = "SPLIMPORT_USER")]
        user: Option<Uuid>,

        /// Build sections with discovery + bulk build
        #[arg(long)]
        staged_bulk: bool,

        /// Write ingredient/packaging/operation rows in batches
        #[arg(long)]
        bulk: bool,

        /// Isolate each top-level section in its own savepoint
        #[arg(long)]
        no_batch_save: bool,
    },

    /// Print the section tree of an imported document
    Render {
        /// Document id
        document_guid: Uuid,

        #[arg(long, env = "SPLIMPORT_DB")]
        db: Option<PathBuf>,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,

        /// Warn about edges that point at missing sections
        #[arg(long)]
        report_missing: bool,
    },

    /// List the entries of an archive
    Info {
        /// Path to the zip archive
        archive: PathBuf,
    },

    /// List imported documents
    Documents {
        #[arg(long, env = "SPLIMPORT_DB")]
        db: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    // Only initialize logging if verbose or RUST_LOG is set
    if !verbose && std::env::var("RUST_LOG").is_err() {
        return Ok(());
    }
    let filter = EnvFilter::from_default_env()
        .add_directive(if verbose { "splimport=debug".parse()? } else { "splimport=warn".parse()? });

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn open_db(path: Option<PathBuf>, settings: &Settings) -> Result<SplDb> {
    let path = path.unwrap_or_else(|| settings.database_path());
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    SplDb::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn read_archives(paths: &[PathBuf]) -> Result<Vec<ArchiveSource>> {
    paths
        .iter()
        .map(|p| ArchiveSource::from_path(p).with_context(|| format!("Failed to read {}", p.display())))
        .collect()
}

async fn run_import(
    settings: &Settings,
    archives: &[PathBuf],
    db: Option<PathBuf>,
    user: Option<Uuid>,
    staged_bulk: bool,
    bulk: bool,
    no_batch_save: bool,
) -> Result<()> {
    let mut flags = settings.flags();
    flags.use_staged_bulk |= staged_bulk;
    flags.use_bulk |= bulk;
    if no_batch_save {
        flags.use_batch_save = false;
    }
    let user = user.or(settings.user_id).unwrap_or_else(Uuid::nil);

    let sources = read_archives(archives)?;
    let db = open_db(db, settings)?;

    println!("splimport - SPL archive import");
    println!("Archives:   {}", sources.len());
    println!(
        "Strategy:   {}{}",
        if flags.use_staged_bulk { "staged bulk" } else { "naive" },
        if flags.use_bulk { " (bulk children)" } else { "" }
    );
    println!();

    let pb = ProgressBar::new(sources.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] Importing [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
            .progress_chars("=>-"),
    );

    let mut importer = Importer::new(db, flags).with_extension(settings.document_extension.clone());
    let bar = pb.clone();
    importer.set_progress_callback(Arc::new(move |progress: ImportProgress| match progress {
        ImportProgress::ArchiveStarted { name, .. } => bar.set_message(name),
        ImportProgress::Batch { results, .. } => bar.set_position(results.len() as u64),
        ImportProgress::EntryFinished(entry) if !entry.success => {
            bar.println(format!("  FAILED {}: {}", entry.entry_name, entry.message));
        }
        _ => {}
    }));

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let results = importer.import_batch(sources, user, cancel).await?;
    pb.finish_and_clear();

    let summary = BatchSummary::from_results(&results);
    println!("=== Import Summary ===");
    println!(
        "Entries:    {} imported, {} skipped (duplicate), {} failed",
        summary.imported, summary.skipped, summary.failed
    );
    println!(
        "Created:    {} documents, {} sections, {} edges, {} products, {} ingredients",
        summary.counts.documents,
        summary.counts.sections,
        summary.counts.section_hierarchies,
        summary.counts.products,
        summary.counts.ingredients
    );

    for result in results.iter().filter(|r| !r.success()) {
        println!("\n{}:", result.archive_name);
        for entry in result.entries.iter().filter(|e| !e.success) {
            println!("  {}: {}", entry.entry_name, entry.message);
            for error in entry.errors.iter().take(5) {
                println!("    - {}", error);
            }
        }
    }

    if summary.failed > 0 {
        println!("\nSome entries failed. Fix issues and run again.");
    } else {
        println!("\nImport complete!");
    }
    Ok(())
}

fn run_info(path: &Path, extension: &str) -> Result<()> {
    let listing = archive::list_archive(path, extension)?;
    println!("=== {} ===", path.display());
    for entry in &listing {
        let guid = if entry.importable {
            archive::document_guid_from_name(&entry.name).to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:>10}  {}  {}  {}",
            entry.size,
            if entry.importable { "import" } else { "skip  " },
            guid,
            entry.name
        );
    }
    let importable = listing.iter().filter(|e| e.importable).count();
    eprintln!("\nTotal: {} files, {} importable", listing.len(), importable);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    let settings = Settings::load();
    settings.validate()?;

    match cli.command {
        Commands::Import {
            archives,
            db,
            user,
            staged_bulk,
            bulk,
            no_batch_save,
        } => {
            run_import(&settings, &archives, db, user, staged_bulk, bulk, no_batch_save).await?;
        }

        Commands::Render {
            document_guid,
            db,
            json,
            report_missing,
        } => {
            let db = open_db(db, &settings)?;
            let document = db
                .load_document_tree(document_guid)?
                .with_context(|| format!("Document {} not found", document_guid))?;

            let mut options = settings.render_options();
            if report_missing {
                options.missing_child = MissingChildPolicy::Report;
            }
            let tree = render::document_rendering_tree(&document, options);

            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                println!(
                    "{} (version {})",
                    document.document.title.as_deref().unwrap_or("(untitled)"),
                    document
                        .document
                        .version_number
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".into())
                );
                println!();
                print!("{}", render::render_outline(&tree));
            }
        }

        Commands::Info { archive } => {
            run_info(&archive, &settings.document_extension)?;
        }

        Commands::Documents { db } => {
            let db = open_db(db, &settings)?;
            let documents = db.list_documents()?;
            for doc in &documents {
                println!(
                    "{}  v{:<3} {:>5} sections  {}",
                    doc.document_guid,
                    doc.version_number.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                    doc.section_count,
                    doc.title.as_deref().unwrap_or("(untitled)")
                );
            }
            let totals = db.entity_totals()?;
            eprintln!(
                "\nTotal: {} documents, {} sections, {} products",
                totals.documents, totals.sections, totals.products
            );
        }
    }

    Ok(())
}
