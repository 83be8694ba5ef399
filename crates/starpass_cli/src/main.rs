//! star_pass CLI
//!
//! Command-line front end for the GalaxyDigital API.
//!
//! # Commands
//!
//! - `push-shifts` - Upload shifts from a CSV export, one call per need,
//!   optionally checked against a JSON Schema
//! - `deactivate-users` - Look up users by email and deactivate them
//! - `pull` - Read a collection
//! - `push` - Create or update records from a JSON file
//!
//! Connection settings come from the environment (`BASE_URL`, `GC_TOKEN`),
//! optionally loaded from a `.env` file.

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// GalaxyDigital batch tools.
#[derive(Parser)]
#[command(name = "starpass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load environment variables from this file instead of `.env`
    #[arg(global = true, long)]
    env_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Print the planned requests without sending anything
    #[arg(global = true, long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload shifts from a CSV export
    PushShifts {
        /// CSV file with one shift per row
        #[arg(short, long)]
        input: PathBuf,

        /// JSON Schema each need's body must satisfy
        /// [default: $JSON_SCHEMA_DIR/$JSON_SCHEMA_SHIFT_FILE]
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Also write the grouped shift payload to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Deactivate users listed by email
    DeactivateUsers {
        /// File with one email address per line
        #[arg(short, long)]
        emails: PathBuf,

        /// Write the ids that were found to this file
        #[arg(long)]
        ids_out: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Read every record of a collection
    Pull {
        /// Collection path, e.g. /users
        #[arg(short, long)]
        collection: String,

        /// Filter as key=value; may be repeated
        #[arg(long = "filter", value_parser = commands::pull::parse_filter)]
        filters: Vec<(String, String)>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Create or update records from a JSON array
    Push {
        /// Collection path, e.g. /users
        #[arg(short, long)]
        collection: String,

        /// JSON file holding an array of objects
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .map_err(|e| format!("failed to load {}: {e}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::PushShifts {
            input,
            schema,
            output,
            format,
        } => {
            let schema = match schema.or_else(commands::push_shifts::schema_path_from_env) {
                Some(path) => Some(commands::push_shifts::load_schema(&path)?),
                None => None,
            };
            let push = commands::push_shifts::ShiftPush {
                input,
                layout: commands::push_shifts::layout_from_env(),
                schema,
                output,
                dry_run: cli.dry_run,
            };
            let sync = commands::connect()?;
            commands::push_shifts::run(&sync, &push, format, &mut out)?;
        }
        Commands::DeactivateUsers {
            emails,
            ids_out,
            format,
        } => {
            let sync = commands::connect()?;
            commands::deactivate_users::run(
                &sync,
                &emails,
                ids_out.as_deref(),
                cli.dry_run,
                format,
                &mut out,
            )?;
        }
        Commands::Pull {
            collection,
            filters,
            format,
        } => {
            let sync = commands::connect()?;
            commands::pull::run(&sync, &collection, &filters, format, &mut out)?;
        }
        Commands::Push {
            collection,
            input,
            format,
        } => {
            let sync = commands::connect()?;
            commands::push::run(&sync, &collection, &input, cli.dry_run, format, &mut out)?;
        }
        Commands::Version => {
            println!("star_pass CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
