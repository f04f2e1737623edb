use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AppState, AssemblyCommand, ChannelKey, Command, Coordinator, FeedState,
};
use shared::domain::{ComponentId, OrderNumber};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured REST base URL.
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Lists the component catalog grouped by category.
    Catalog,
    /// Watches a live feed for a while.
    Feed {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Watch the signed-in user's orders instead of the public feed.
        #[arg(long)]
        user: bool,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Assembles and submits an order.
    Order {
        #[arg(long)]
        base: String,
        #[arg(long = "filling")]
        fillings: Vec<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Shows one order by number.
    Lookup { number: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    let coordinator = Coordinator::from_settings(&settings)
        .with_context(|| format!("failed to set up client for {}", settings.api_url))?;

    match cli.command {
        Action::Catalog => catalog(&coordinator).await?,
        Action::Feed {
            seconds,
            user,
            email,
            password,
        } => {
            if user {
                sign_in(&coordinator, email, password).await?;
            }
            watch_feed(&coordinator, user, Duration::from_secs(seconds)).await?;
        }
        Action::Order {
            base,
            fillings,
            email,
            password,
        } => {
            if email.is_some() {
                sign_in(&coordinator, email, password).await?;
            }
            place_order(&coordinator, &base, &fillings).await?;
        }
        Action::Lookup { number } => lookup(&coordinator, OrderNumber(number)).await?,
    }

    coordinator.shutdown().await;
    Ok(())
}

async fn sign_in(
    coordinator: &Coordinator,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let (Some(email), Some(password)) = (email, password) else {
        bail!("--email and --password are both required to sign in");
    };
    let user = coordinator.login(&email, &password).await?;
    info!(name = %user.name, "signed in");
    Ok(())
}

async fn catalog(coordinator: &Coordinator) -> Result<()> {
    coordinator.fetch_catalog().await?;
    let state = coordinator.snapshot();
    let mut components: Vec<_> = state.catalog.items.iter().collect();
    components.sort_by_key(|component| component.category.to_string());
    for component in components {
        println!(
            "{:<8} {:<28} {:>6}  {}",
            component.category, component.id, component.price, component.name
        );
    }
    Ok(())
}

async fn place_order(coordinator: &Coordinator, base: &str, fillings: &[String]) -> Result<()> {
    coordinator.fetch_catalog().await?;
    let catalog = coordinator.snapshot().catalog;
    let find = |id: &str| {
        catalog
            .find(&ComponentId::new(id))
            .cloned()
            .ok_or_else(|| anyhow!("unknown component {id}"))
    };

    coordinator.dispatch(Command::Assembly(AssemblyCommand::SetBase(find(base)?)));
    for filling in fillings {
        coordinator.dispatch(Command::Assembly(AssemblyCommand::add_item(find(filling)?)));
    }
    let assembly = coordinator.snapshot().assembly;
    if assembly.base.is_none() {
        bail!("{base} cannot be used as a base");
    }
    if assembly.items.len() != fillings.len() {
        bail!("some fillings were refused; see the log for details");
    }
    println!("assembled burger, price {}", assembly.price());

    let order = coordinator.submit_order().await?;
    println!("order #{} accepted: {}", order.number, order.name);
    Ok(())
}

async fn lookup(coordinator: &Coordinator, number: OrderNumber) -> Result<()> {
    coordinator.fetch_catalog().await?;
    let Some(order) = coordinator.lookup_order(number).await? else {
        bail!("order #{number} not found");
    };
    println!("order #{} {:?}: {}", order.number, order.status, order.name);
    if let Some(summary) = coordinator.summarize(&order) {
        for line in &summary.lines {
            println!(
                "  {} x {:<30} {:>6}",
                line.count, line.component.name, line.component.price
            );
        }
        println!("  total {}", summary.total);
    }
    Ok(())
}

async fn watch_feed(coordinator: &Coordinator, user: bool, duration: Duration) -> Result<()> {
    let key = if user {
        coordinator.start_user_feed().await?;
        ChannelKey::UserFeed
    } else {
        coordinator.start_public_feed().await?;
        ChannelKey::PublicFeed
    };

    let select = |state: &AppState| -> FeedState {
        match key {
            ChannelKey::PublicFeed => state.feed.clone(),
            ChannelKey::UserFeed => state.user_feed.clone(),
        }
    };

    let mut updates = coordinator.subscribe();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let feed = select(&updates.borrow_and_update());
                if let Some(error) = &feed.error {
                    println!("{key}: {error}");
                }
                println!(
                    "{key}: {} orders, total {}, today {}, connected {}",
                    feed.orders.len(),
                    feed.total,
                    feed.total_today,
                    feed.connected
                );
            }
        }
    }

    coordinator.stop_channel(key).await?;
    Ok(())
}
