#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Quill server and command-line client

use clap::{Parser, Subcommand};
use quill_server::accounts::{load_accounts, seed_accounts};
use quill_server::connection::{ClientIdentity, tls_connector};
use quill_server::protocol::{
    BodyPayload, ContentPartPayload, FetchPayload, FetchResponsePayload, SendOptionsPayload,
    SendPayload, SendResponsePayload,
};
use quill_server::{
    ClientConfig, Dispatcher, FederationClient, Listener, QuillClient, Server, ServerConfig,
    StaticTokenAuthenticator, Storage, tls,
};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Federated mailbox server and client for the Quill protocol")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (configured through QUILL_* variables)
    Serve,

    /// Check that a server answers
    Ping,

    /// Send a message as the account behind QUILL_TOKEN
    Send {
        /// Recipient address (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Carbon-copy address (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        /// Blind-copy address (repeatable)
        #[arg(long)]
        bcc: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        /// Message body
        #[arg(long)]
        body: Option<String>,

        /// Send the body as text/html
        #[arg(long)]
        html: bool,

        /// Continue an existing thread
        #[arg(long)]
        thread: Option<String>,
    },

    /// Fetch messages from a folder or thread
    Fetch {
        /// Folder to list
        #[arg(long, default_value = "inbox")]
        folder: String,

        /// List a thread instead of a folder
        #[arg(long)]
        thread: Option<String>,

        /// Maximum number of messages to show
        #[arg(long, default_value = "10")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Serve => cmd_serve().await,
        Command::Ping => cmd_ping(&client()?, &args).await,
        Command::Send {
            to,
            cc,
            bcc,
            subject,
            body,
            html,
            thread,
        } => {
            let kind = if *html { "text/html" } else { "text/plain" };
            let payload = SendPayload {
                to: to.clone(),
                cc: cc.clone(),
                bcc: bcc.clone(),
                subject: subject.clone(),
                body: BodyPayload {
                    content: body
                        .iter()
                        .map(|value| ContentPartPayload {
                            kind: kind.to_string(),
                            value: value.clone(),
                        })
                        .collect(),
                },
                options: SendOptionsPayload {
                    thread_id: thread.clone(),
                    ..SendOptionsPayload::default()
                },
                ..SendPayload::default()
            };
            cmd_send(&client()?, &args, &payload).await
        }
        Command::Fetch {
            folder,
            thread,
            limit,
            offset,
        } => {
            let payload = FetchPayload {
                mode: if thread.is_some() { "thread" } else { "folder" }.to_string(),
                thread_id: thread.clone(),
                folder: Some(folder.clone()),
                limit: Some(*limit),
                offset: Some(*offset),
            };
            cmd_fetch(&client()?, &args, &payload).await
        }
    }
}

fn client() -> anyhow::Result<QuillClient> {
    Ok(QuillClient::new(ClientConfig::from_env()?)?)
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    let storage = Storage::in_memory();
    let auth = Arc::new(StaticTokenAuthenticator::new());

    if let Some(path) = &config.accounts_file {
        let seeds = load_accounts(path).await?;
        seed_accounts(&seeds, storage.users.as_ref(), &auth).await?;
    }

    let peer_trust = config.peer.trust.load()?;
    let mut listeners = Vec::new();
    let mut identity = None;
    if let (Some(cert_path), Some(key_path)) = (&config.tls_cert, &config.tls_key) {
        let certs = tls::load_certs(cert_path)?;
        let key = tls::load_private_key(key_path)?;
        let server_tls = tls::server_config(certs.clone(), key.clone_key(), &peer_trust)?;
        let acceptor = TlsAcceptor::from(server_tls);
        listeners.push(Listener::tls(&config.listen_addr, acceptor).await?);
        identity = Some(ClientIdentity { certs, key });
    }
    if let Some(addr) = &config.plaintext_addr {
        listeners.push(Listener::plain(addr).await?);
    }

    let connector = tls_connector(peer_trust, identity)?;
    let federation =
        FederationClient::new(config.peer.directory(), connector, config.peer.timeout);
    let dispatcher = Dispatcher::new(config.domain.clone(), storage, auth, Arc::new(federation));
    let server = Server::new(dispatcher, config.shutdown_grace);

    for listener in &listeners {
        println!("listening on {}", listener.local_addr()?);
    }

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
        }
        shutdown.cancel();
    });

    server.run(listeners).await?;
    Ok(())
}

async fn cmd_ping(client: &QuillClient, args: &Args) -> anyhow::Result<()> {
    let pong = client.ping().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pong)?);
    } else {
        println!(
            "{}:{} OK ({})",
            client.config().host,
            client.config().port,
            pong.server_time.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}

async fn cmd_send(
    client: &QuillClient,
    args: &Args,
    payload: &SendPayload,
) -> anyhow::Result<()> {
    let sent = client.send(payload).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sent)?);
    } else {
        print_send_result(&sent);
    }

    Ok(())
}

async fn cmd_fetch(
    client: &QuillClient,
    args: &Args,
    payload: &FetchPayload,
) -> anyhow::Result<()> {
    let page = client.fetch(payload).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_message_table(&page);
    }

    Ok(())
}

fn print_send_result(sent: &SendResponsePayload) {
    println!("Message: {}", sent.message_id);
    println!("Thread:  {}", sent.thread_id);
    if !sent.delivered_to.is_empty() {
        println!("Delivered to: {}", sent.delivered_to.join(", "));
    }
    if !sent.queued_for.is_empty() {
        println!("Queued for:   {}", sent.queued_for.join(", "));
    }
    for failure in &sent.failures {
        println!(
            "Failed:       {} ({}: {})",
            failure.recipient, failure.code, failure.message
        );
    }
}

fn print_message_table(page: &FetchResponsePayload) {
    if page.messages.is_empty() {
        println!("No messages found.");
        return;
    }

    let header = format!("{:<2} {:<20} {:<30} {}", "", "Sent", "From", "Subject");
    println!("{header}");
    println!("{}", "-".repeat(100));

    for message in &page.messages {
        println!(
            "{:<2} {:<20} {:<30} {}",
            if message.read { "" } else { "*" },
            message.sent_at.format("%Y-%m-%d %H:%M"),
            truncate(&message.from, 28),
            truncate(&message.subject, 40),
        );
    }

    println!(
        "\n{} of {} message(s), offset {}",
        page.messages.len(),
        page.total,
        page.offset
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
