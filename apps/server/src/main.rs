use anyhow::Context;
use clap::{Parser, Subcommand};
use courier_chats::{ChatId, MessageStore, UserId};
use courier_config::load as load_config;
use courier_gateway::create_router;
use courier_runtime::{shutdown_signal, telemetry, RelayServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "courier-server")]
#[command(about = "Courier presence and message-delivery relay (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start the relay
    Serve,
    /// Print a development token for a user
    IssueToken {
        #[arg(long)]
        user: String,
    },
    /// Create a chat room with the given members
    CreateChat {
        #[arg(long = "member", required = true)]
        members: Vec<String>,
    },
    /// Print the latest messages of a chat
    History {
        #[arg(long)]
        chat: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::IssueToken { user } => issue_token(user),
        Commands::CreateChat { members } => create_chat(members).await,
        Commands::History { chat, limit } => history(chat, limit).await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Courier relay");

    let config = load_config().context("failed to load configuration")?;

    let services = RelayServices::initialise(&config)
        .await
        .context("failed to initialise relay services")?;

    let app = create_router(services.hub.clone());

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    services.db_pool.close().await;
    info!("relay shut down");
    Ok(())
}

fn issue_token(user: String) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let verifier = courier_auth::JwtVerifier::from_config(&config.auth);

    let token = verifier
        .issue_token(&UserId::new(user.clone()))
        .context("failed to issue token")?;

    info!(user_id = %user, "issued development token");
    println!("{token}");
    Ok(())
}

async fn create_chat(members: Vec<String>) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let services = RelayServices::initialise(&config)
        .await
        .context("failed to initialise relay services")?;

    let participants = members.into_iter().map(UserId::new).collect();
    let room = services
        .store
        .create_chat(participants)
        .await
        .context("failed to create chat")?;

    println!("{}", room.id);
    for member in &room.participants {
        println!("  member: {member}");
    }
    Ok(())
}

async fn history(chat: String, limit: i64) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let services = RelayServices::initialise(&config)
        .await
        .context("failed to initialise relay services")?;

    let chat_id = ChatId::new(chat);
    let messages = services
        .store
        .history(&chat_id, limit)
        .await
        .with_context(|| format!("failed to fetch history for {chat_id}"))?;

    if messages.is_empty() {
        println!("No messages in {chat_id}");
        return Ok(());
    }

    println!(
        "{:<28} {:<12} {:<10} {:<32} {}",
        "Created At", "Sender", "Status", "Id", "Content"
    );
    println!("{}", "-".repeat(110));
    for message in messages {
        println!(
            "{:<28} {:<12} {:<10} {:<32} {}",
            message.created_at.to_rfc3339(),
            message.sender.as_str(),
            message.status.as_str(),
            message.id.as_str(),
            message.content
        );
    }
    Ok(())
}
