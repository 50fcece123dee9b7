//! bandscore CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use bandscore_core::model::ModuleKind;

mod commands;

#[derive(Parser)]
#[command(
    name = "bandscore",
    version,
    about = "IELTS-style test attempts with automated band scoring"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that touches stored attempts.
#[derive(clap::Args, Clone)]
pub struct StoreArgs {
    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Attempt store directory (overrides `store_dir` from the config)
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new attempt
    Start {
        /// Path to a test definition file or directory
        #[arg(long)]
        tests: PathBuf,

        /// Test to take
        #[arg(long)]
        test_id: String,

        /// Learner identifier
        #[arg(long)]
        user: String,

        /// Practise a single module instead of the full test
        #[arg(long)]
        module: Option<ModuleKind>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Submit answers for the attempt's current module
    Submit {
        /// Path to a test definition file or directory
        #[arg(long)]
        tests: PathBuf,

        /// Attempt ID
        #[arg(long)]
        attempt: Uuid,

        /// Learner identifier
        #[arg(long)]
        user: String,

        /// Module the answers belong to
        #[arg(long)]
        module: ModuleKind,

        /// Answers as inline JSON or a path to a JSON file
        #[arg(long)]
        answers: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Show an attempt and its latest result
    Show {
        /// Attempt ID
        #[arg(long)]
        attempt: Uuid,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Re-evaluate failed modules of a completed attempt and aggregate again
    Rescore {
        /// Path to a test definition file or directory
        #[arg(long)]
        tests: PathBuf,

        /// Attempt ID
        #[arg(long)]
        attempt: Uuid,

        /// Learner identifier
        #[arg(long)]
        user: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Finish an attempt whose aggregation was interrupted, or show where it stands
    Resume {
        /// Path to a test definition file or directory
        #[arg(long)]
        tests: PathBuf,

        /// Attempt ID
        #[arg(long)]
        attempt: Uuid,

        /// Learner identifier
        #[arg(long)]
        user: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Validate test definition TOML files
    Validate {
        /// Path to a test definition file or directory
        #[arg(long)]
        tests: PathBuf,
    },

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example test definition
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bandscore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            tests,
            test_id,
            user,
            module,
            store,
        } => commands::start::execute(tests, test_id, user, module, store).await,
        Commands::Submit {
            tests,
            attempt,
            user,
            module,
            answers,
            store,
        } => commands::submit::execute(tests, attempt, user, module, answers, store).await,
        Commands::Show {
            attempt,
            format,
            store,
        } => commands::show::execute(attempt, format, store).await,
        Commands::Rescore {
            tests,
            attempt,
            user,
            store,
        } => commands::rescore::execute(tests, attempt, user, store).await,
        Commands::Resume {
            tests,
            attempt,
            user,
            store,
        } => commands::resume::execute(tests, attempt, user, store).await,
        Commands::Validate { tests } => commands::validate::execute(tests),
        Commands::ListModels { provider, config } => {
            commands::list_models::execute(provider, config)
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
