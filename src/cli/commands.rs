use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::bridge::{server, ProtocolBridge};
use crate::cli::{Commands, KeysCommands};
use crate::config::Config;
use crate::discovery::{CandidateSource, DiscoveryScope, StaticCandidateSource};
use crate::k8s::K8sClient;
use crate::trust::keys::{generate_ed25519, KeySet};
use crate::trust::signer::CardSigner;

pub async fn handle_command(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::List { namespace, all_namespaces } => {
            let bridge = cluster_bridge(config).await?;
            let records = bridge.list_agents(&scope(namespace, all_namespaces)).await?;
            print_json(&records)
        }
        Commands::Discover { namespace, all_namespaces, require_signature } => {
            let bridge = cluster_bridge(config).await?;
            let records = bridge
                .discover_agents(&scope(namespace, all_namespaces), true, require_signature)
                .await?;
            print_json(&records)
        }
        Commands::Card { url, path } => {
            let bridge = local_bridge(config).await?;
            let report = bridge.get_card(&url, path.as_deref()).await?;
            print_json(&report)
        }
        Commands::Send { url, message, stream } => {
            let bridge = local_bridge(config).await?;
            if stream {
                let report = bridge.send_message_streaming(&url, &message).await?;
                print_json(&report)
            } else {
                let report = bridge.send_message(&url, &message).await?;
                print_json(&report)
            }
        }
        Commands::Serve { listen } => {
            let addr: std::net::SocketAddr = listen
                .parse()
                .with_context(|| format!("invalid listen address: {listen}"))?;
            let publish = config.signing.publish_jwks;
            let signing = config.signing.clone();
            let bridge = cluster_bridge(config).await?;
            if publish {
                // Publish our own signing key alongside the deployer-pushed
                // ones at the well-known key-set path.
                let signer = CardSigner::from_config(&signing)?;
                bridge.trust_store().merge(signer.public_key_set());
                info!(kid = signer.kid(), "Publishing signing key in served key set");
            }
            server::serve(addr, Arc::new(bridge)).await?;
            Ok(())
        }
        Commands::Keys { keys_command } => handle_keys(keys_command),
        Commands::Sign { card } => {
            if !config.signing.sign_cards {
                anyhow::bail!("card signing is disabled; set SCOUT8_SIGN_CARD=true");
            }
            let signer = CardSigner::from_config(&config.signing)?;
            let text = std::fs::read_to_string(&card)
                .with_context(|| format!("failed to read {}", card.display()))?;
            let mut value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not JSON", card.display()))?;
            signer.sign_card(&mut value)?;
            print_json(&value)
        }
    }
}

fn handle_keys(command: KeysCommands) -> anyhow::Result<()> {
    match command {
        KeysCommands::Generate { kid, out_private, out_jwks } => {
            let kid = kid.unwrap_or_else(|| "scout8-signing-key".to_string());
            let generated = generate_ed25519(&kid)?;
            info!(kid = %kid, "Generated Ed25519 signing key");

            let jwks = KeySet { keys: vec![generated.public_jwk] };
            if let Some(path) = out_jwks {
                std::fs::write(&path, serde_json::to_string_pretty(&jwks)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("wrote public key set to {}", path.display());
            } else {
                print_json(&jwks)?;
            }

            match out_private {
                Some(path) => {
                    std::fs::write(&path, generated.private_jwk.to_string())
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote private JWK to {}", path.display());
                }
                None => print_json(&generated.private_jwk)?,
            }
            Ok(())
        }
    }
}

async fn cluster_bridge(config: Config) -> anyhow::Result<ProtocolBridge> {
    let client = K8sClient::try_default().await?;
    Ok(ProtocolBridge::new(Arc::new(client) as Arc<dyn CandidateSource>, config).await?)
}

/// Single-target commands never touch the cluster.
async fn local_bridge(config: Config) -> anyhow::Result<ProtocolBridge> {
    let source = Arc::new(StaticCandidateSource::default());
    Ok(ProtocolBridge::new(source, config).await?)
}

fn scope(namespace: Option<String>, all_namespaces: bool) -> DiscoveryScope {
    if all_namespaces {
        DiscoveryScope::AllNamespaces
    } else {
        DiscoveryScope::Namespace(namespace.unwrap_or_else(|| "default".to_string()))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
