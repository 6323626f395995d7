//! draftgate CLI: serve the draft review workflow over HTTP, or drive a
//! single run from the terminal.
//!
//! Reuses the same core domain logic (draftgate-core) and server bootstrap
//! (draftgate-server) that back the HTTP API.

mod commands;

use clap::{Args, Parser, Subcommand};

/// draftgate: draft, human review, finalize
#[derive(Parser)]
#[command(name = "draftgate", version, about = "draftgate: draft, human review, finalize")]
pub struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// SQLite file for durable checkpoints (in-memory when omitted)
    #[arg(long, env = "DRAFTGATE_DB_PATH", global = true)]
    db: Option<String>,

    /// Seconds an idle session is kept before it is reclaimed
    #[arg(long, env = "DRAFTGATE_SESSION_TTL", default_value_t = 3600, global = true)]
    session_ttl: u64,

    /// Generation backend: scripted or openai
    #[arg(long, env = "DRAFTGATE_GENERATOR", default_value = "scripted", global = true)]
    generator: String,

    /// Model ID (openai backend)
    #[arg(long, env = "DRAFTGATE_MODEL", global = true)]
    model: Option<String>,

    /// API base URL (openai backend)
    #[arg(long, env = "DRAFTGATE_BASE_URL", global = true)]
    base_url: Option<String>,

    /// API key (openai backend); `${VAR}` references are resolved
    #[arg(long, env = "DRAFTGATE_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the draftgate HTTP server
    Server {
        /// Host to bind to
        #[arg(long, env = "DRAFTGATE_HOST", default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, env = "DRAFTGATE_PORT", default_value_t = 8000)]
        port: u16,
        /// Allowed CORS origin (repeatable; any origin when omitted)
        #[arg(long = "cors-origin")]
        cors_origins: Vec<String>,
    },

    /// Draft a response, review it in the terminal, then finalize it
    Run {
        /// The request to draft a response for
        request: String,
        /// Approve the draft without prompting
        #[arg(long, conflicts_with = "feedback")]
        approve: bool,
        /// Send this feedback without prompting
        #[arg(long)]
        feedback: Option<String>,
        /// Print tokens as they are generated
        #[arg(long)]
        stream: bool,
        /// Print the final result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Server { .. } => {
            "draftgate_core=info,draftgate_server=info,draftgate_cli=info,tower_http=info"
        }
        Commands::Run { .. } => "draftgate_core=warn,draftgate_server=warn,draftgate_cli=warn",
    };

    // Initialize tracing
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();

    let result = match cli.command {
        Commands::Server {
            host,
            port,
            cors_origins,
        } => match commands::server_config(&cli.opts) {
            Ok(config) => commands::server::run(config, host, port, cors_origins).await,
            Err(e) => Err(e),
        },

        Commands::Run {
            request,
            approve,
            feedback,
            stream,
            json,
        } => {
            let state = commands::init_state(&cli.opts).await;
            let review = commands::run::preset_review(approve, feedback);
            commands::run::run(&state, &request, review, stream, json).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
