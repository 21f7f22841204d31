use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use keyword_rankings::{AppState, CampaignIdentity};

#[derive(Parser)]
#[command(version, about = "Keyword rank retrieval with cached fallbacks")]
struct Cli {
    /// Directory holding the ranking cache and diagnostics.
    #[arg(long, env = "RANK_DATA_DIR", default_value = ".keyword-rankings")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store or update the campaign for an owner's slot.
    SetCampaign {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        slot: String,
        /// `<project id>_<tracking id>`
        #[arg(long)]
        campaign_id: String,
        #[arg(long)]
        domain: String,
    },
    /// List an owner's campaigns.
    Campaigns {
        #[arg(long)]
        owner: String,
    },
    /// Rankings for a configured campaign, served from cache while fresh.
    Fetch {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        slot: String,
    },
    /// Fallback tiers only, keyed by domain. Bypasses the cache.
    FetchDomain {
        #[arg(long)]
        domain: String,
    },
    /// Drop the cached rankings for one slot.
    Invalidate {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        slot: String,
    },
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = AppState::initialize(&cli.data_dir)
        .with_context(|| format!("failed to open {}", cli.data_dir.display()))?;
    let service = state.service();

    match cli.command {
        Command::SetCampaign {
            owner,
            slot,
            campaign_id,
            domain,
        } => {
            let change = service
                .configure_campaign(&owner, &slot, &CampaignIdentity::new(campaign_id, domain))
                .context("campaign rejected")?;
            print_json(&change)?;
        }
        Command::Campaigns { owner } => {
            print_json(&service.campaigns().list(&owner)?)?;
        }
        Command::Fetch { owner, slot } => {
            let view = service
                .rankings(&owner, &slot)
                .await
                .with_context(|| format!("unable to fetch rankings for {owner}/{slot}"))?;
            print_json(&view)?;
        }
        Command::FetchDomain { domain } => {
            print_json(&service.rankings_for_domain(&domain).await?)?;
        }
        Command::Invalidate { owner, slot } => {
            let removed = service.cache().invalidate(&owner, &slot)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Health => {
            print_json(&state.health())?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
