use clap::{Parser, Subcommand};
use tracing::error;

mod commands;
mod serve;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Persistent personal assistant daemon")]
struct Cli {
    /// Data directory (default: ~/.vigil).
    #[arg(long, global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Principal user id (default: "primary").
    #[arg(long, global = true, default_value = "primary")]
    user_id: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant (default).
    Serve,
    /// Inspect memory: core, projections, archival, or all.
    Memory {
        #[arg(default_value = "all")]
        area: String,
        /// Search archival memory instead of listing recent facts.
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Include settled projections.
        #[arg(long)]
        all: bool,
    },
    /// Run one reflection pass over recent conversation.
    Reflect {
        #[arg(long, default_value_t = 30)]
        window: i64,
    },
    /// Insert a fact into archival memory from the command line.
    ArchiveFact { content: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = vigil_core::datadir::DataDir::new(
        cli.data_dir
            .unwrap_or_else(vigil_core::datadir::DataDir::default_root),
    );

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve::run(data_dir, &cli.user_id).await,
        Command::Memory {
            area,
            query,
            limit,
            all,
        } => commands::memory(&data_dir, &cli.user_id, &area, query.as_deref(), limit, all),
        Command::Reflect { window } => commands::reflect(&data_dir, &cli.user_id, window).await,
        Command::ArchiveFact { content } => {
            commands::archive_fact(&data_dir, &cli.user_id, &content).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
