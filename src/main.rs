mod betslips;
mod config;
mod error;
mod ledger;
mod pagination;
mod records;
mod session;
mod users;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pagination::SortOrder;
use crate::session::Session;

#[derive(Parser)]
#[command(name = "backoffice-scraper")]
#[command(about = "Exports player and bet-slip records from the back office into per-entity JSON files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the players list and export one folder per player.
    ScrapeUserList {
        /// Sort order of the player id column.
        #[arg(long, value_enum, default_value = "asc")]
        order: SortOrder,
    },
    /// Walk the betting report and export one JSON file per bet slip.
    ScrapeBetSlips {
        /// Sort order of the bet slip id column.
        #[arg(long, value_enum, default_value = "asc")]
        order: SortOrder,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env();

    info!("starting back-office scraper");
    let session = Session::launch().await?;

    let outcome = match cli.command {
        Command::ScrapeUserList { order } => {
            users::scrape_user_list(&session, &config, order).await
        }
        Command::ScrapeBetSlips { order } => {
            betslips::scrape_bet_slips(&session, &config, order).await
        }
    };

    if let Err(e) = &outcome {
        error!("run aborted: {e:?}");
    }
    if let Err(e) = session.close().await {
        warn!("failed to close browser: {e:?}");
    }
    outcome?;

    info!("run complete");
    Ok(())
}
