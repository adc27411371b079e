use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
mod auth;
use cardnest::config::{self, Config};
use cardnest::crypto::{available_algorithms, default_algorithm};
use cardnest::quality::{Dictionary, rating};
use cardnest::{CardNest, Node, Storage, default_storage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CARDNEST_LOG";

fn resolve_storage(path: Option<PathBuf>) -> Result<Storage> {
    match path {
        Some(p) => Ok(Storage::new(p)),
        None => Ok(default_storage()?),
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(p) => p,
        None => config::default_config_path()?,
    };
    Config::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_dictionary(path: Option<&Path>) -> Result<Arc<Dictionary>> {
    match path {
        Some(p) => Dictionary::cached(p)
            .with_context(|| format!("failed to load dictionary {}", p.display())),
        None => Ok(Arc::new(Dictionary::default())),
    }
}

#[derive(Debug, Parser)]
#[command(name = "cardnest")]
#[command(
    version,
    about = "Offline password store with optional smartcard second factor."
)]
struct Cli {
    /// Path to the document file
    #[arg(long, global = true, value_name = "PATH", env = "CARDNEST_PATH")]
    store: Option<PathBuf>,

    /// Path to the JSON settings file
    #[arg(long, global = true, value_name = "PATH", env = "CARDNEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates an empty document
    Init,

    /// Replaces the document content with a JSON tree of groups and properties
    #[command(arg_required_else_help = true)]
    Import { json: PathBuf },

    /// Prints the decrypted document content as JSON
    Export,

    /// Lists the ciphers available in this build
    Algorithms,

    /// Estimates how long a password withstands a brute-force attack
    Quality {
        /// Word list, one word per line (defaults to the configured one)
        #[arg(long, value_name = "PATH")]
        dictionary: Option<PathBuf>,
    },

    /// Shows what the configured card terminal reports
    CardInfo,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let args = Cli::parse();
    let config = resolve_config(args.config.clone())?;

    match args.command {
        Commands::Init => {
            let storage = resolve_storage(args.store.clone())?;
            let password = auth::read_password()?;
            let nest = CardNest::new(storage).with_prompt(auth::TerminalPrompt);
            nest.init(&password, &config)?;
            println!("document initialized");
        }
        Commands::Import { json } => {
            let text = fs::read_to_string(&json)
                .with_context(|| format!("failed to read {}", json.display()))?;
            let tree: Vec<Node> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a document tree", json.display()))?;

            let storage = resolve_storage(args.store.clone())?;
            let password = auth::read_password()?;
            let nest = CardNest::new(storage).with_prompt(auth::TerminalPrompt);
            nest.write(&tree, &password, &config)?;
            println!("imported {} top-level node(s)", tree.len());
        }
        Commands::Export => {
            let storage = resolve_storage(args.store.clone())?;
            if !storage.exists() {
                anyhow::bail!("no document at {}", storage.path().display());
            }
            let password = auth::read_password()?;
            let nest = CardNest::new(storage).with_prompt(auth::TerminalPrompt);
            let document = nest.read(&password, &config)?;
            println!("{}", serde_json::to_string_pretty(&document.passwords)?);
        }
        Commands::Algorithms => {
            let default = default_algorithm();
            for algorithm in available_algorithms() {
                if Some(*algorithm) == default {
                    println!("{algorithm} (default)");
                } else {
                    println!("{algorithm}");
                }
            }
        }
        Commands::Quality { dictionary } => {
            let path = dictionary.or_else(|| config.dictionary_file_path.clone());
            let dictionary = load_dictionary(path.as_deref())?;
            let password = auth::read_password()?;
            let days = dictionary.days_to_crack(&password);
            println!("{days:.2} days to crack ({})", rating(days));
        }
        Commands::CardInfo => {
            let storage = resolve_storage(args.store.clone())?;
            let nest = CardNest::new(storage).with_prompt(auth::TerminalPrompt);
            let status = nest.card_info(&config)?;
            println!("card type: {}", status.card_type);
            match status.capacity {
                Some(bytes) => println!("capacity:  {bytes} bytes"),
                None => println!("capacity:  unknown"),
            }
            match status.protocol {
                Some(protocol) => println!("protocol:  {protocol}"),
                None => println!("protocol:  unknown"),
            }
        }
    }

    Ok(())
}
