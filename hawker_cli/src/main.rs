extern crate env_logger;
extern crate serde_json;
extern crate hawker;

pub mod options;

use clap::Parser;
use hawker::abort::AbortSignal;
use hawker::actions::{ConversationTarget, Messenger};
use hawker::configuration::Configuration;
use hawker::consent::NoConsent;
use hawker::conversation::{Account, ConversationRef, ProxyServer};
use hawker::features::chrome::ChromeSessionFactory;
use hawker::pipeline::FetchOptions;
use hawker::tokio;
use hawker::transport::ReqwestMessageBox;
use options::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;

fn conversation_ref(raw: &str) -> ConversationRef {
    if raw.starts_with("http") {
        ConversationRef::from_url(raw)
    } else {
        ConversationRef::from_id(raw)
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &str, what: &str) -> T {
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {what} file {path}: {e}"));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("cannot parse {what} file {path}: {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        use env_logger::Env;
        let env = Env::default()
            .filter_or("RUST_LOG", "debug")
            .write_style_or("RUST_LOG_STYLE", "always");

        env_logger::init_from_env(env);
    }

    let accounts: Vec<Account> = load_json(&cli.accounts, "accounts");
    let proxies: Vec<ProxyServer> = match cli.proxies.as_deref() {
        Some(path) => load_json(path, "proxies"),
        None => Vec::new(),
    };

    if accounts.is_empty() {
        eprintln!("the accounts file holds no accounts");
        std::process::exit(1);
    }

    let mut configuration = Configuration::new();
    if let Some(origin) = cli.origin.as_deref() {
        configuration.with_origin(origin);
    }
    if let Some(deadline) = cli.deadline_ms {
        configuration.with_action_deadline(Duration::from_millis(deadline));
    }
    if let Some(concurrency) = cli.concurrency {
        configuration.with_concurrency(concurrency);
    }

    let sessions = Arc::new(ChromeSessionFactory::new(&configuration));
    let messenger = Messenger::new(
        configuration,
        Arc::new(ReqwestMessageBox),
        sessions,
        Arc::new(NoConsent),
    );

    let account = &accounts[0];
    let proxy = proxies.first();

    let outcome = match cli.command {
        Commands::FETCH { max, enrich_images } => {
            let merged = messenger
                .fetch_messages(
                    &accounts,
                    &proxies,
                    &FetchOptions {
                        max_conversations: max,
                        enrich_images,
                    },
                )
                .await;
            println!(
                "{}",
                serde_json::to_string_pretty(&merged).unwrap_or_default()
            );
            Ok(())
        }
        Commands::SEND { conversation, text } => messenger
            .send_conversation_message(
                account,
                proxy,
                &ConversationTarget::from_ref(conversation_ref(&conversation)),
                &text,
            )
            .await
            .map(|snapshot| {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot).unwrap_or_default()
                );
            }),
        Commands::MEDIA {
            conversation,
            text,
            files,
        } => messenger
            .send_conversation_media(
                account,
                proxy,
                &conversation_ref(&conversation),
                &text,
                &files,
                AbortSignal::new(),
                None,
            )
            .await
            .map(|snapshot| {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot).unwrap_or_default()
                );
            }),
        Commands::DECLINE { conversation } => messenger
            .decline_conversation_offer(
                account,
                proxy,
                &conversation_ref(&conversation),
                AbortSignal::new(),
                None,
            )
            .await
            .map(|snapshot| {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot).unwrap_or_default()
                );
            }),
    };

    if let Err(e) = outcome {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
