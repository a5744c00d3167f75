pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scout8")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent discovery and trust toolkit for Kubernetes", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to a YAML config file (defaults to SCOUT8_* env)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "List labeled agent candidates without probing them")]
    List {
        #[arg(short, long, help = "Kubernetes namespace")]
        namespace: Option<String>,

        #[arg(short = 'A', long, help = "Scan all namespaces")]
        all_namespaces: bool,
    },
    #[command(about = "Probe agent candidates and report live status")]
    Discover {
        #[arg(short, long, help = "Kubernetes namespace")]
        namespace: Option<String>,

        #[arg(short = 'A', long, help = "Scan all namespaces")]
        all_namespaces: bool,

        #[arg(long, help = "Only mark Ready when the card signature verifies")]
        require_signature: bool,
    },
    #[command(about = "Fetch and verify one agent's card")]
    Card {
        #[arg(help = "Agent origin, e.g. https://echo.apps.example.com")]
        url: String,

        #[arg(long, help = "Card endpoint path (defaults to the well-known location)")]
        path: Option<String>,
    },
    #[command(about = "Send a message to an agent")]
    Send {
        #[arg(help = "Agent origin")]
        url: String,

        #[arg(help = "Message text")]
        message: String,

        #[arg(long, help = "Use the streamed messaging variant")]
        stream: bool,
    },
    #[command(about = "Serve the bridge tool surface over HTTP")]
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:7465", help = "Listen address")]
        listen: String,
    },
    #[command(about = "Manage card signing keys")]
    Keys {
        #[command(subcommand)]
        keys_command: KeysCommands,
    },
    #[command(about = "Sign an agent card document")]
    Sign {
        #[arg(help = "Path to the card JSON file")]
        card: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum KeysCommands {
    #[command(about = "Generate a fresh Ed25519 signing key")]
    Generate {
        #[arg(long, help = "Key id for the new key")]
        kid: Option<String>,

        #[arg(long, help = "Write the private JWK here instead of stdout")]
        out_private: Option<PathBuf>,

        #[arg(long, help = "Write the public key set here")]
        out_jwks: Option<PathBuf>,
    },
}
