mod snapshot;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xdw::Document;
use xdw_core::config::value_or_default;
use xdw_core::constants::{DEFAULT_EVENT_SERVICE_URL, DEFAULT_XDS_DOMAIN_KEY, NHS_OID_DEFAULT};
use xdw_core::store::{IdMapFilter, NewEvent};
use xdw_core::subscription::SubscriptionFilter;
use xdw_core::{
    CoreConfig, InMemoryStore, InMemorySubscriptions, LifecycleManager, Requester,
    SubscriptionService, WorkflowKey, WorkflowStore,
};
use xdw_types::{Pathway, PatientId};

use snapshot::Snapshot;

const DEFAULT_STATE_FILE: &str = "xdw-state.json";

type Manager = LifecycleManager<InMemoryStore, InMemorySubscriptions>;

#[derive(Parser)]
#[command(name = "xdw")]
#[command(about = "XDW clinical workflow engine CLI")]
struct Cli {
    /// State file (default: $XDW_STATE_FILE, else xdw-state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RequesterArgs {
    /// Acting user
    #[arg(long)]
    user: String,
    /// Acting organisation
    #[arg(long, default_value = "")]
    org: String,
    /// Acting role
    #[arg(long, default_value = "")]
    role: String,
}

impl From<RequesterArgs> for Requester {
    fn from(args: RequesterArgs) -> Self {
        Requester::new(args.user, args.org, args.role)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or replace) a pathway definition
    RegisterDefinition {
        /// Pathway name, e.g. toc
        pathway: String,
        /// JSON definition file
        file: PathBuf,
    },
    /// Register (or replace) the XDS metadata for a pathway
    RegisterMeta {
        /// Pathway name
        pathway: String,
        /// JSON metadata file
        file: PathBuf,
    },
    /// Create a workflow for a patient, superseding any current one
    Create {
        pathway: String,
        patient: String,
        #[command(flatten)]
        requester: RequesterArgs,
    },
    /// Record a clinical event against a task
    RecordEvent {
        pathway: String,
        patient: String,
        /// Task id
        task: String,
        /// Input or output part name
        expression: String,
        /// Registry entry uid of the referenced document
        #[arg(long, default_value = "")]
        uid: String,
        /// Repository unique id of the referenced document
        #[arg(long, default_value = "")]
        repository: String,
        /// Free-text note
        #[arg(long, default_value = "")]
        comments: String,
        #[command(flatten)]
        requester: RequesterArgs,
    },
    /// Apply pending events to the current workflow
    Update {
        pathway: String,
        patient: String,
        #[command(flatten)]
        requester: RequesterArgs,
    },
    /// Update, then print workflow, task and dashboard state
    Consume {
        pathway: String,
        patient: String,
        #[command(flatten)]
        requester: RequesterArgs,
    },
    /// Print dashboard counts
    Dashboard {
        /// Restrict to one pathway
        #[arg(long)]
        pathway: Option<String>,
    },
    /// Cross-reference a local id to a mapped id
    MapId {
        local_id: String,
        mapped_id: String,
    },
    /// List broker subscriptions
    Subscriptions {
        /// Restrict to one pathway
        #[arg(long)]
        pathway: Option<String>,
    },
}

/// Entry point for the `xdw` CLI.
///
/// Loads engine state from the snapshot file, runs one command and writes the state back.
///
/// # Environment Variables
/// - `XDW_EVENT_SERVICE_URL`: base of back-references for inline parts (default: "/eventservice/event")
/// - `XDW_XDS_DOMAIN_KEY`: id map key of the home community id (default: "xdsdomain")
/// - `XDW_PATIENT_ID_ROOT`: patient identifier OID (default: NHS number OID)
/// - `XDW_DSUB_BROKER_URL`, `XDW_DSUB_CONSUMER_URL`: broker coordinates (default: empty)
/// - `XDW_STATE_FILE`: snapshot file (default: "xdw-state.json")
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("xdw=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'xdw --help' for commands");
        return Ok(());
    };

    let state_path = cli.state.unwrap_or_else(|| {
        PathBuf::from(value_or_default(
            std::env::var("XDW_STATE_FILE").ok(),
            DEFAULT_STATE_FILE,
        ))
    });
    let config = Arc::new(config_from_env()?);

    let snapshot = Snapshot::load(&state_path)?;
    let mut manager = LifecycleManager::new(config, snapshot.store, snapshot.subscriptions);

    let result = run(&mut manager, command);

    // Partial progress is kept even when the command fails.
    let (store, subscriptions) = manager.into_parts();
    Snapshot {
        store,
        subscriptions,
    }
    .save(&state_path)?;
    result
}

fn config_from_env() -> anyhow::Result<CoreConfig> {
    let env = |name: &str| std::env::var(name).ok();
    let config = CoreConfig::new(
        value_or_default(env("XDW_EVENT_SERVICE_URL"), DEFAULT_EVENT_SERVICE_URL),
        value_or_default(env("XDW_XDS_DOMAIN_KEY"), DEFAULT_XDS_DOMAIN_KEY),
        value_or_default(env("XDW_PATIENT_ID_ROOT"), NHS_OID_DEFAULT),
        value_or_default(env("XDW_DSUB_BROKER_URL"), ""),
        value_or_default(env("XDW_DSUB_CONSUMER_URL"), ""),
    )?;
    Ok(config)
}

fn workflow_key(pathway: &str, patient: &str) -> anyhow::Result<WorkflowKey> {
    Ok(WorkflowKey::new(Pathway::new(pathway)?, PatientId::new(patient)?))
}

fn read_payload(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(manager: &mut Manager, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::RegisterDefinition { pathway, file } => {
            let report = manager.register_definition(&Pathway::new(&pathway)?, &read_payload(&file)?)?;
            print_json(&report)?;
        }
        Commands::RegisterMeta { pathway, file } => {
            manager.register_xds_meta(&Pathway::new(&pathway)?, &read_payload(&file)?)?;
            println!("Registered XDS metadata for {pathway}");
        }
        Commands::Create {
            pathway,
            patient,
            requester,
        } => {
            let document = manager.create(&workflow_key(&pathway, &patient)?, &requester.into())?;
            print!("{}", Document::render(&document)?);
        }
        Commands::RecordEvent {
            pathway,
            patient,
            task,
            expression,
            uid,
            repository,
            comments,
            requester,
        } => {
            let id = manager.record_event(NewEvent {
                creation_time: Utc::now(),
                pathway: Pathway::new(&pathway)?,
                patient: PatientId::new(&patient)?,
                task_id: task,
                expression,
                xds_doc_entry_uid: uid,
                repository_unique_id: repository,
                user: requester.user,
                org: requester.org,
                role: requester.role,
                comments,
            })?;
            println!("Recorded event {id}");
        }
        Commands::Update {
            pathway,
            patient,
            requester,
        } => {
            let report = manager.update(&workflow_key(&pathway, &patient)?, &requester.into())?;
            print_json(&report)?;
        }
        Commands::Consume {
            pathway,
            patient,
            requester,
        } => {
            let report = manager.consume(&workflow_key(&pathway, &patient)?, &requester.into())?;
            print_json(&report)?;
        }
        Commands::Dashboard { pathway } => {
            let pathway = pathway.map(Pathway::new).transpose()?;
            print_json(&manager.dashboard(pathway.as_ref())?)?;
        }
        Commands::MapId {
            local_id,
            mapped_id,
        } => {
            let store = manager.store_mut();
            let replaced = store.delete_id_maps(&IdMapFilter::mapped(&mapped_id))?;
            store.insert_id_map(&local_id, &mapped_id)?;
            if replaced > 0 {
                tracing::info!("replaced existing mapping for {mapped_id}");
            }
            println!("Mapped {mapped_id} to {local_id}");
        }
        Commands::Subscriptions { pathway } => {
            let filter = SubscriptionFilter {
                pathway: pathway.map(Pathway::new).transpose()?,
                ..Default::default()
            };
            print_json(&manager.subscriptions().select(&filter)?)?;
        }
    }
    Ok(())
}
