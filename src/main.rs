use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use log::{info, Level, LevelFilter};
use mreplace::{DocumentStore, EditRequest, ReplaceOptions};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const DEFAULT_MIN_SIMILARITY: f64 = 0.3;

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(args) {
        // {:?} prints the whole `anyhow` context chain.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if !args.root.is_dir() {
        return Err(anyhow!(
            "Document root '{}' not found or is not a directory.",
            args.root.display()
        ));
    }
    if !(0.0..=1.0).contains(&args.min_similarity) {
        bail!("Minimum similarity must be between 0.0 and 1.0.");
    }

    let options = ReplaceOptions::builder()
        .multiple_candidates_threshold(args.min_similarity)
        .build();
    let store = DocumentStore::with_options(&args.root, options);

    if args.list {
        for document in store.list_documents()? {
            println!("{}", document.display());
        }
        return Ok(());
    }

    let document = args
        .document
        .as_ref()
        .ok_or_else(|| anyhow!("A document is required unless --list is given."))?;
    let old_string = read_text(args.old.as_deref(), args.old_file.as_ref(), "--old")?;
    let new_string = read_text(args.new.as_deref(), args.new_file.as_ref(), "--new")?;
    let request = EditRequest::new(old_string, new_string).replace_all(args.all);

    let outcome = store
        .replace_text(document, &request, args.dry_run)
        .with_context(|| format!("Failed to edit document '{}'", document.display()))?;

    if let Some(diff) = outcome.diff {
        println!("----- Proposed Changes for {} -----", document.display());
        print!("{}", diff);
        println!("------------------------------------");
        info!("DRY RUN completed. No files were modified.");
    } else {
        println!(
            "{} {}",
            "ok:".green().bold(),
            outcome.replacement.message()
        );
    }
    Ok(())
}

/// Takes a text argument either inline or from a file, verbatim.
fn read_text(inline: Option<&str>, file: Option<&PathBuf>, flag: &str) -> Result<String> {
    match (inline, file) {
        (Some(text), None) => Ok(text.to_string()),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} file '{}'", flag, path.display())),
        (None, None) => bail!("Missing {} (or {}-file).", flag, flag),
        (Some(_), Some(_)) => bail!("{} and {}-file are mutually exclusive.", flag, flag),
    }
}

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Replace an approximately quoted region of a document.",
    long_about = "Locates OLD in the document even when its indentation has drifted or only its first and last lines match, and replaces it with NEW. Refuses to edit when the match is ambiguous."
)]
struct Args {
    /// Document to edit, relative to --root.
    #[arg(required_unless_present = "list")]
    document: Option<PathBuf>,
    /// Directory containing the documents.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
    /// Text to replace.
    #[arg(long, conflicts_with = "old_file")]
    old: Option<String>,
    /// Read the text to replace from a file.
    #[arg(long)]
    old_file: Option<PathBuf>,
    /// Replacement text.
    #[arg(long, conflicts_with = "new_file")]
    new: Option<String>,
    /// Read the replacement text from a file.
    #[arg(long)]
    new_file: Option<PathBuf>,
    /// Replace every occurrence of the matched text.
    #[arg(short = 'a', long)]
    all: bool,
    #[arg(
        short = 'n',
        long,
        help = "Show what would be done, but don't modify files."
    )]
    dry_run: bool,
    /// Similarity required of the best block when several first/last-line
    /// anchored blocks compete (0.0 to 1.0).
    #[arg(long, default_value_t = DEFAULT_MIN_SIMILARITY)]
    min_similarity: f64,
    /// List the documents under --root and exit.
    #[arg(short, long)]
    list: bool,
    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace.")]
    verbose: u8,
}

/// Sets up the global logger with colored level prefixes.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
