use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use client_core::{AppContext, ClientConfig, Tab};
use shared::{
    domain::{LeadId, LeadStatus, UserId},
    protocol::{
        BulkAssignRequest, DistributionCriteria, LeadListQuery, LeadSortField, ManualAmount,
        SortDirection, UpdateLeadRequest,
    },
};
use tracing_subscriber::EnvFilter;

mod render;

/// Operator console for the lead CRM.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "CRM_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long, env = "CRM_USERNAME")]
    username: String,
    #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value_t = 20)]
    page_size: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lead counters; admins also see sellers and open provinces.
    Stats,
    Leads(LeadsArgs),
    /// Plans a distribution without assigning anything.
    Preview(DistributionArgs),
    Distribute(DistributionArgs),
    Import { path: PathBuf },
    UpdateLead {
        id: i64,
        #[arg(long)]
        status: Option<LeadStatus>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Args, Debug)]
struct LeadsArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    status: Option<LeadStatus>,
    #[arg(long)]
    province: Option<String>,
    /// Seller id or `unassigned`.
    #[arg(long)]
    seller: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum)]
    sort_by: Option<SortArg>,
    #[arg(long, requires = "sort_by")]
    desc: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SortArg {
    Name,
    Status,
    Province,
    CreatedAt,
    AssignedAt,
    LastContact,
    NextAction,
}

impl From<SortArg> for LeadSortField {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Name => LeadSortField::Name,
            SortArg::Status => LeadSortField::Status,
            SortArg::Province => LeadSortField::Province,
            SortArg::CreatedAt => LeadSortField::CreatedAt,
            SortArg::AssignedAt => LeadSortField::AssignedAt,
            SortArg::LastContact => LeadSortField::LastContact,
            SortArg::NextAction => LeadSortField::NextAction,
        }
    }
}

#[derive(Args, Debug)]
struct DistributionArgs {
    /// equitativo, regional, performance or manual.
    #[arg(long, default_value = "equitativo")]
    strategy: String,
    #[arg(long, default_value_t = 0)]
    quantity: i64,
    /// Comma separated seller ids, in the order shares are handed out.
    #[arg(long, value_delimiter = ',')]
    sellers: Vec<i64>,
    #[arg(long)]
    status: Option<LeadStatus>,
    #[arg(long)]
    province: Option<String>,
    /// Also redistribute leads that already have a seller.
    #[arg(long)]
    include_assigned: bool,
    /// Manual amounts as `seller=quantity`.
    #[arg(long, value_parser = parse_manual)]
    manual: Vec<ManualAmount>,
}

impl DistributionArgs {
    fn to_request(&self) -> BulkAssignRequest {
        BulkAssignRequest {
            strategy: self.strategy.clone(),
            quantity: self.quantity,
            user_ids: self.sellers.iter().copied().map(UserId).collect(),
            criteria: DistributionCriteria {
                status: self.status,
                province: self.province.clone(),
                unassigned_only: !self.include_assigned,
            },
            manual: self.manual.clone(),
        }
    }
}

fn parse_manual(raw: &str) -> Result<ManualAmount, String> {
    let (seller, quantity) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected seller=quantity, got '{raw}'"))?;
    Ok(ManualAmount {
        user_id: UserId(seller.trim().parse().map_err(|e| format!("bad seller id: {e}"))?),
        quantity: quantity.trim().parse().map_err(|e| format!("bad quantity: {e}"))?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();

    let ctx = AppContext::init(ClientConfig {
        server_url: cli.server_url.clone(),
        page_size: cli.page_size,
    })?;
    render::install(ctx.store());

    let principal = ctx.session().login(&cli.username, &cli.password).await?;
    println!("logged in as {} ({})", principal.name, principal.role.as_str());

    let outcome = run(&ctx, cli.command).await;
    ctx.destroy();
    outcome
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Stats => {
            ctx.dashboard().refresh().await?;
        }
        Command::Leads(args) => {
            let direction = if args.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            ctx.leads()
                .load(LeadListQuery {
                    status: args.status,
                    province: args.province,
                    seller: args.seller,
                    search: args.search,
                    page: Some(args.page),
                    limit: Some(ctx.config().page_size),
                    sort_by: args.sort_by.map(LeadSortField::from),
                    sort_direction: args.sort_by.map(|_| direction),
                })
                .await?;
        }
        Command::Preview(args) => {
            ctx.dashboard().preview(&args.to_request()).await?;
        }
        Command::Distribute(args) => {
            let request = args.to_request();
            ctx.dashboard().preview(&request).await?;
            ctx.dashboard().execute(&request).await?;
        }
        Command::Import { path } => {
            let csv = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ctx.switch_tab(Tab::Import).await?;
            ctx.import().upload(csv).await?;
        }
        Command::UpdateLead { id, status, notes } => {
            let lead = ctx
                .leads()
                .update_lead(LeadId(id), UpdateLeadRequest {
                    status,
                    notes,
                    next_action: None,
                })
                .await?;
            println!("lead {} is now {}", lead.id, lead.status.as_str());
        }
    }
    if ctx.session().is_expired() {
        return Err(anyhow!("session expired"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_amounts_parse_as_pairs() {
        assert_eq!(
            parse_manual("12=4").expect("pair"),
            ManualAmount {
                user_id: UserId(12),
                quantity: 4
            }
        );
        assert!(parse_manual("12").is_err());
        assert!(parse_manual("x=4").is_err());
    }

    #[test]
    fn distribution_args_default_to_unassigned_leads() {
        let cli = Cli::try_parse_from([
            "console",
            "--username",
            "admin",
            "--password",
            "pw",
            "preview",
            "--quantity",
            "10",
            "--sellers",
            "3,1,2",
        ])
        .expect("args");
        let Command::Preview(args) = cli.command else {
            panic!("expected preview");
        };
        let request = args.to_request();
        assert_eq!(request.user_ids, vec![UserId(3), UserId(1), UserId(2)]);
        assert!(request.criteria.unassigned_only);
        assert_eq!(request.strategy, "equitativo");
    }
}
