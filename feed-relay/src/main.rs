use anyhow::Context;
use clap::{Parser, Subcommand};
use feed_relay::subscriptions::describe_feed;
use feed_relay::{
    ConsoleDestination, DestinationGateway, DiscordConfig, DiscordDestination, FeedProcessor, FeedScheduler, FeedSource,
    FetchConfig, HttpFeedSource, InboundMessage, KeywordDelivery, KeywordRouter, MemoryStore, PgStore, RelayConfig,
    SchedulerHandle, SubscriptionManager, SubscriptionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-relay", version, about = "Relays RSS items and keyword matches into chat channels")]
struct Cli {
    /// Postgres connection string; the in-memory store is used when absent.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Bot token; deliveries are only logged when absent.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    discord_token: Option<String>,

    #[arg(long, env = "RELAY_TICK_SECONDS", default_value_t = 60)]
    tick_seconds: u64,

    #[arg(long, env = "DEFAULT_RSS_CHECK_INTERVAL", default_value_t = 30)]
    default_interval: u32,

    #[arg(long, env = "RELAY_MAX_CONCURRENT_FEEDS", default_value_t = 4)]
    max_concurrent_feeds: usize,

    #[arg(long, env = "RELAY_FETCH_TIMEOUT_SECONDS", default_value_t = 45)]
    fetch_timeout_seconds: u64,

    #[arg(long, env = "RELAY_FETCH_RETRIES", default_value_t = 0)]
    fetch_retries: u32,

    #[arg(long, value_enum, env = "RELAY_KEYWORD_DELIVERY", default_value_t = KeywordDelivery::PerDestination)]
    keyword_delivery: KeywordDelivery,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll feeds on a fixed tick until interrupted
    Run {
        /// Also route JSON-lines messages read from stdin; a `check` line forces a feed check
        #[arg(long)]
        stdin: bool,
    },
    /// Check every feed once, ignoring intervals
    Check,
    /// Route JSON-lines messages read from stdin through the keyword subscriptions
    Route,
    /// Manage feed subscriptions
    Feed {
        #[command(subcommand)]
        action: FeedCommand,
    },
    /// Manage keyword subscriptions
    Keyword {
        #[command(subcommand)]
        action: KeywordCommand,
    },
}

#[derive(Subcommand)]
enum FeedCommand {
    Add {
        url: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        guild: String,
        /// Minutes between checks
        #[arg(long)]
        interval: Option<u32>,
    },
    Remove {
        url: String,
        /// Omit to remove the feed from every channel of the guild
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        guild: String,
    },
    List {
        #[arg(long)]
        guild: String,
    },
}

#[derive(Subcommand)]
enum KeywordCommand {
    Add {
        keyword: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        guild: String,
    },
    Remove {
        keyword: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        guild: String,
    },
    List {
        #[arg(long)]
        guild: String,
    },
}

struct Services {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn FeedSource>,
    destinations: Arc<dyn DestinationGateway>,
    config: RelayConfig,
}

impl Services {
    fn processor(&self) -> Arc<FeedProcessor> {
        Arc::new(FeedProcessor::new(
            self.store.clone(),
            self.source.clone(),
            self.destinations.clone(),
            self.config.fetch_timeout,
        ))
    }

    fn scheduler(&self) -> FeedScheduler {
        FeedScheduler::new(self.store.clone(), self.processor(), &self.config)
    }

    fn router(&self) -> KeywordRouter {
        KeywordRouter::new(self.store.clone(), self.destinations.clone(), self.config.keyword_delivery)
    }

    fn subscriptions(&self) -> SubscriptionManager {
        SubscriptionManager::new(self.store.clone(), self.source.clone(), self.destinations.clone())
            .with_default_interval(self.config.default_check_interval_minutes)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let services = build_services(&cli).await?;

    match cli.command {
        Command::Run { stdin } => run(&services, stdin).await?,
        Command::Check => {
            let report = services.scheduler().check_now().await;
            println!(
                "{} feeds: {} checked, {} failed, {} items delivered",
                report.feeds_total, report.feeds_checked, report.feeds_failed, report.items_delivered
            );
        }
        Command::Route => route_lines(&services.router(), None).await?,
        Command::Feed { action } => feed_command(&services.subscriptions(), action).await?,
        Command::Keyword { action } => keyword_command(&services.subscriptions(), action).await?,
    }

    Ok(())
}

async fn build_services(cli: &Cli) -> anyhow::Result<Services> {
    let config = RelayConfig {
        tick_interval: Duration::from_secs(cli.tick_seconds.max(1)),
        fetch_timeout: Duration::from_secs(cli.fetch_timeout_seconds),
        max_concurrent_feeds: cli.max_concurrent_feeds,
        default_check_interval_minutes: cli.default_interval,
        keyword_delivery: cli.keyword_delivery,
    };

    let store: Arc<dyn SubscriptionStore> = match &cli.database_url {
        Some(url) => {
            let store = PgStore::new(url).await.context("Failed to connect to the database")?;
            store.migrate().await.context("Failed to run database migrations")?;
            info!("Using Postgres subscription store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, subscriptions and processed items are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let fetch_config = FetchConfig {
        max_retries: cli.fetch_retries,
        ..Default::default()
    };
    let source: Arc<dyn FeedSource> = Arc::new(HttpFeedSource::new(fetch_config)?);

    let destinations: Arc<dyn DestinationGateway> = match &cli.discord_token {
        Some(token) => Arc::new(DiscordDestination::new(DiscordConfig::new(token.as_str()))?),
        None => {
            warn!("DISCORD_TOKEN not set, deliveries are written to the log");
            Arc::new(ConsoleDestination::new())
        }
    };

    Ok(Services {
        store,
        source,
        destinations,
        config,
    })
}

async fn run(services: &Services, with_stdin: bool) -> anyhow::Result<()> {
    let (handle, trigger) = SchedulerHandle::channel();
    let scheduler = services.scheduler();
    let router = services.router();

    // Reaching the end of stdin must not stop the scheduler.
    let routing = async {
        if with_stdin {
            if let Err(e) = route_lines(&router, Some(&handle)).await {
                error!("Stopped reading messages from stdin: {}", e);
            }
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = scheduler.run(trigger) => {}
        _ = routing => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    Ok(())
}

async fn route_lines(router: &KeywordRouter, scheduler: Option<&SchedulerHandle>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "check" {
            match scheduler {
                Some(handle) => handle.check_now(),
                None => warn!("No scheduler running, ignoring check request"),
            }
            continue;
        }

        let message: InboundMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping unreadable message: {}", e);
                continue;
            }
        };

        for attempt in router.route(&message).await {
            println!(
                "{} -> {} [{}]: {:?}",
                message.id,
                attempt.channel_id,
                attempt.keywords.join(", "),
                attempt.outcome
            );
        }
    }

    Ok(())
}

async fn feed_command(subscriptions: &SubscriptionManager, action: FeedCommand) -> anyhow::Result<()> {
    match action {
        FeedCommand::Add {
            url,
            channel,
            guild,
            interval,
        } => {
            let feed = subscriptions.add_feed(&url, &channel, &guild, interval).await?;
            println!("Added {}", describe_feed(&feed, chrono::Utc::now()));
        }
        FeedCommand::Remove { url, channel, guild } => {
            let removed = subscriptions.remove_feed(&url, channel.as_deref(), &guild).await?;
            println!("Removed {} subscription(s) to {}", removed, url);
        }
        FeedCommand::List { guild } => {
            let feeds = subscriptions.list_feeds(&guild).await?;
            if feeds.is_empty() {
                println!("No feeds in this server");
            }
            let now = chrono::Utc::now();
            for feed in feeds {
                println!("{}", describe_feed(&feed, now));
            }
        }
    }
    Ok(())
}

async fn keyword_command(subscriptions: &SubscriptionManager, action: KeywordCommand) -> anyhow::Result<()> {
    match action {
        KeywordCommand::Add { keyword, channel, guild } => {
            let subscription = subscriptions.add_keyword(&keyword, &channel, &guild).await?;
            println!("Forwarding \"{}\" to <#{}>", subscription.keyword, subscription.channel_id);
        }
        KeywordCommand::Remove { keyword, channel, guild } => {
            subscriptions.remove_keyword(&keyword, &channel, &guild).await?;
            println!("Stopped forwarding \"{}\"", keyword.trim().to_lowercase());
        }
        KeywordCommand::List { guild } => {
            let keywords = subscriptions.list_keywords(&guild).await?;
            if keywords.is_empty() {
                println!("No keywords in this server");
            }
            for keyword in keywords {
                println!("\"{}\" -> <#{}>", keyword.keyword, keyword.channel_id);
            }
        }
    }
    Ok(())
}
