//! efx-face CLI - run local MLX inference servers and chat with them.

use clap::{Parser, Subcommand};

mod commands;

/// efx-face - supervise mlx-openai-server and stream chats from it
#[derive(Parser)]
#[command(name = "efx-face")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server and follow its output until Ctrl-C
    Serve(commands::serve::ServeArgs),

    /// Send one prompt to a running server and stream the answer
    Chat {
        /// Port of the running server
        #[arg(short, long, default_value_t = efx_server::DEFAULT_PORT)]
        port: u16,
        /// Model name sent with the request
        #[arg(short, long)]
        model: Option<String>,
        /// Prompt text
        prompt: String,
    },

    /// Check that the required tools are installed
    Check {
        /// Also probe a server on this port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List built-in model templates
    Templates,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match cli.command {
        Commands::Templates => commands::templates::run(),
        command => {
            let runtime = tokio::runtime::Runtime::new()
                .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;
            runtime.block_on(async move {
                match command {
                    Commands::Serve(args) => commands::serve::run(args).await,
                    Commands::Chat {
                        port,
                        model,
                        prompt,
                    } => commands::chat::run(port, model, &prompt).await,
                    Commands::Check { port } => commands::check::run(port).await,
                    Commands::Templates => commands::templates::run(),
                }
            })
        }
    }
}
