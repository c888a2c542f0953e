//! Operator CLI

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shardmeta::common::{parse_duration, Config, Error};
use shardmeta::models::{ActionGcPolicy, GroupId, ServerGroup, SlotId, SlotStatus, Store};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardmeta")]
#[command(about = "Slot, group and action log administration", version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Coordination backend (etcd, memory)
    #[arg(long, global = true)]
    coordinator: Option<String>,

    /// Comma-separated backend endpoints
    #[arg(long, global = true)]
    addrs: Option<String>,

    /// Backend credentials, user:password
    #[arg(long, global = true)]
    auth: Option<String>,

    /// Product (cluster) name
    #[arg(long, global = true)]
    product: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create slots 0..N as offline and unowned
    InitSlots { n: SlotId },

    /// Assign a slot range to a group
    SlotRange {
        from: SlotId,
        to: SlotId,
        group: GroupId,
        /// online or offline
        status: String,
    },

    /// Start migrating a slot between groups
    Migrate {
        slot: SlotId,
        from: GroupId,
        to: GroupId,
    },

    /// List slots
    Slots {
        /// Only slots in migrate state
        #[arg(long)]
        migrating: bool,
    },

    /// Register an empty server group
    GroupAdd { id: GroupId },

    /// Remove a server group
    GroupRemove { id: GroupId },

    /// Print the action log
    Actions,

    /// Follow the action log until interrupted
    Watch,

    /// Garbage collect the action log
    Gc {
        /// Keep the newest N actions
        #[arg(long, conflicts_with = "older_than")]
        keep: Option<usize>,

        /// Drop actions older than this (e.g. 30m, 7d)
        #[arg(long)]
        older_than: Option<String>,
    },

    /// Take the product lock
    Lock,

    /// Release the product lock
    Unlock,

    /// Show the current lock holder
    Topom,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(name) = cli.coordinator {
        config.coordinator.name = name;
    }
    if let Some(addrs) = cli.addrs {
        config.coordinator.addrs = addrs;
    }
    if let Some(auth) = cli.auth {
        config.coordinator.auth = auth;
    }
    if let Some(product) = cli.product {
        config.product = product;
    }
    if let Some(ms) = cli.timeout_ms {
        config.coordinator.timeout_ms = ms;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    let client = shardmeta::client::connect(&config.coordinator).await?;
    let store = Store::with_base(client, &config.base_dir, &config.product)?;

    let result = run(&store, &config, cli.command).await;
    store.close().await?;
    result
}

async fn run(store: &Store, config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitSlots { n } => {
            store.init_slot_set(n).await?;
            println!("{} slots initialized", n);
        }

        Commands::SlotRange {
            from,
            to,
            group,
            status,
        } => {
            store
                .set_slot_range(from, to, group, SlotStatus::from(status))
                .await?;
            println!("slots {}..={} -> group {}", from, to, group);
        }

        Commands::Migrate { slot, from, to } => {
            let Some(mut current) = store.get_slot(slot, true).await? else {
                bail!("slot {} not found", slot);
            };
            store.set_migrate_status(&mut current, from, to).await?;
            println!("slot {} migrating {} -> {}", slot, from, to);
        }

        Commands::Slots { migrating } => {
            let slots = if migrating {
                store.get_migrating_slots().await?
            } else {
                store.slots().await?
            };
            for slot in slots {
                println!(
                    "slot-{:04}  group={:<4} status={}",
                    slot.id, slot.group_id, slot.state.status
                );
            }
        }

        Commands::GroupAdd { id } => {
            if store.group_exists(id).await? {
                bail!("group {} already exists", id);
            }
            store
                .update_group(&ServerGroup::new(store.product(), id))
                .await?;
            println!("group {} added", id);
        }

        Commands::GroupRemove { id } => {
            store.delete_group(id).await?;
            println!("group {} removed", id);
        }

        Commands::Actions => {
            let seqs = match store.get_action_seq_list().await {
                Ok(seqs) => seqs,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            for seq in seqs {
                let action = store.get_action_with_seq(seq).await?;
                println!("{:06} {}", seq, serde_json::to_string(&action)?);
            }
        }

        Commands::Watch => {
            let mut feed = store.action_feed(None);
            loop {
                tokio::select! {
                    batch = feed.next_batch() => {
                        for (seq, action) in batch? {
                            println!("{:06} {}", seq, serde_json::to_string(&action)?);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }

        Commands::Gc { keep, older_than } => {
            let policy = match (keep, older_than) {
                (Some(n), _) => ActionGcPolicy::KeepLast(n),
                (None, Some(age)) => ActionGcPolicy::OlderThan(parse_duration(&age)?),
                (None, None) => match config.gc.policy() {
                    Some(policy) => policy,
                    None => bail!("no gc policy: pass --keep or --older-than"),
                },
            };
            let removed = store.action_gc(policy).await?;
            println!("{} actions removed", removed);
        }

        Commands::Lock => {
            store.lock().await?;
            println!("locked {}", store.paths().lock());
        }

        Commands::Unlock => {
            store.unlock().await?;
            println!("unlocked {}", store.paths().lock());
        }

        Commands::Topom => match store.load_topom(false).await {
            Ok(Some(topom)) => println!("{}", serde_json::to_string_pretty(&topom)?),
            Ok(None) => println!("no leader"),
            // held through `lock`, which stores only hostname and pid
            Err(Error::Corrupted { .. }) => {
                let raw = store.client().read(&store.paths().lock(), false).await?;
                println!("{}", String::from_utf8_lossy(&raw.unwrap_or_default()));
            }
            Err(e) => return Err(e.into()),
        },
    }

    Ok(())
}
