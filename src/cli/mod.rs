//! CLI module for the chat store
//!
//! Provides subcommands:
//! - `search`: vector search over a local JSON catalog
//! - `check-config`: validate and print the effective configuration

pub mod check_config;
pub mod search;

use clap::{Parser, Subcommand};

/// Chat store - sessions, semantic cache and product search over a document store
#[derive(Parser)]
#[command(name = "chat-store")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Search a product catalog by vector similarity
    Search(search::SearchArgs),

    /// Validate configuration and print the effective values
    CheckConfig,
}
