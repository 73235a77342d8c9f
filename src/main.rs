use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sixsixbot::bot::{BotReply, SixSixBot};
use sixsixbot::config::Config;
use sixsixbot::mcp::BotServer;

#[derive(Parser)]
#[command(name = "sixsixbot")]
#[command(about = "Daily idol check-in and catchphrase bot")]
struct Cli {
    /// Data directory (defaults to the user config dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in and draw today's idol
    Checkin { user: String },
    /// Send a plain group message through the catchphrase rules
    Say { user: String, text: String },
    /// Show an idol's profile card
    Info { target: String },
    /// Register an idol and add a nickname
    Add { name: String, nickname: String },
    /// Add a catchphrase: -i <idol> -t <trigger> -r <response>
    Catchphrase {
        #[arg(allow_hyphen_values = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// List an idol's nicknames, or every catchphrase when no idol is given
    List { target: Option<String> },
    /// Grant admin rights
    Auth { user: String },
    /// Revoke admin rights
    Rauth { user: String },
    /// Clear today's check-ins
    ResetToday,
    /// Serve JSON-RPC over stdio
    Server,
}

fn print_reply(reply: &BotReply) {
    println!("{}", reply.text);
    if let Some(image) = &reply.image {
        println!("🖼  {}", image.display());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.data_dir)?;
    let bot = SixSixBot::new(config)?;

    let reply = match cli.command {
        Commands::Checkin { user } => bot.checkin(&user),
        Commands::Say { user, text } => match bot.on_message(&user, &text) {
            Some(reply) => reply,
            None => return Ok(()),
        },
        Commands::Info { target } => bot.profile(&target),
        Commands::Add { name, nickname } => bot.add_nickname(&name, &nickname),
        Commands::Catchphrase { args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            bot.add_catchphrase_command(&args)
        }
        Commands::List { target: Some(target) } => bot.list_nicknames(&target),
        Commands::List { target: None } => bot.list_catchphrases(),
        Commands::Auth { user } => bot.auth(None, &user),
        Commands::Rauth { user } => bot.rauth(None, &user),
        Commands::ResetToday => bot.reset_today(None),
        Commands::Server => {
            let server = BotServer::new(bot);
            return server.run().await;
        }
    };

    print_reply(&reply);
    Ok(())
}
