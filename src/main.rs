use clap::Parser;
use semantic_chat_store::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Search(args) => cli::search::run(args).await,
        Command::CheckConfig => cli::check_config::run(),
    }
}
