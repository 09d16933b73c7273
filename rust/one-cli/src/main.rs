//! The `one` command line: a thin shell over the instance, channel and
//! store layers.
//!
//! Exit codes: 0 success, 2 invalid arguments (from clap), 3 authentication
//! failure, 4 not found, 5 transport failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod session;

#[derive(Parser)]
#[command(name = "one", version, about = "content-addressed personal data substrate")]
struct Cli {
    /// Base directory for instance storage and the login session.
    #[arg(long, global = true, default_value = ".one")]
    directory: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new instance.
    Init {
        /// Instance name.
        #[arg(long)]
        name: String,
        /// Owner email; with the name it forms the instance identity.
        #[arg(long)]
        email: String,
        /// Secret the storage keys are wrapped with.
        #[arg(long)]
        secret: String,
    },
    /// Log into an existing instance.
    Login {
        /// Owner email of the instance.
        #[arg(long)]
        email: String,
        /// The instance secret.
        #[arg(long)]
        secret: String,
    },
    /// Forget the current login.
    Logout,
    /// Post a JSON payload to a channel.
    Post {
        /// The instance secret (never read from disk).
        #[arg(long)]
        secret: String,
        /// Channel id.
        #[arg(long)]
        channel: String,
        /// Channel owner as a 64-hex person id, or "me".
        #[arg(long)]
        owner: Option<String>,
        /// Path of a JSON file with the payload.
        #[arg(long)]
        payload: PathBuf,
    },
    /// List the channels known to the registry.
    Channels {
        /// The instance secret (never read from disk).
        #[arg(long)]
        secret: String,
    },
    /// Print a stored record by content address.
    Cat {
        /// The instance secret (never read from disk).
        #[arg(long)]
        secret: String,
        /// 64 lowercase hex characters.
        hash: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init {
            name,
            email,
            secret,
        } => commands::init(&cli.directory, &name, &email, &secret).await,
        Command::Login { email, secret } => {
            commands::login(&cli.directory, &email, &secret).await
        }
        Command::Logout => commands::logout(&cli.directory).await,
        Command::Post {
            secret,
            channel,
            owner,
            payload,
        } => {
            commands::post(&cli.directory, &secret, &channel, owner.as_deref(), &payload).await
        }
        Command::Channels { secret } => commands::channels(&cli.directory, &secret).await,
        Command::Cat { secret, hash } => commands::cat(&cli.directory, &secret, &hash).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("one: {}", error.message);
            ExitCode::from(error.exit_code)
        }
    }
}
