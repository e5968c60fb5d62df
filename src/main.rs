use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use concord::config::ConcordConfig;
use concord::dispatch::{ChangeNotification, Dispatch, Dispatcher};
use concord::engine::{Engine, OperationKind};
use concord::model::ident::{EntityTag, InternalKey};

/// Keep duplicated records consistent across data sources
///
/// concord watches for change notifications about records that live in
/// several external stores at once. On each notification it classifies
/// the change (create/update/delete), diffs the changed copy against a
/// remembered baseline, merges concurrent changes, writes the merged
/// result back to every store, and records the evidence — including
/// conflict fragments a human can resolve later.
///
/// Entities, their sources, and the operational store are declared in
/// concord.toml (see --config).
#[derive(Parser)]
#[command(name = "concord")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "concord.toml", env = "CONCORD_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one change notification
    ///
    /// The triple names the entity, the source the change happened in,
    /// and the record's key inside that source. Unknown entities and
    /// sources are logged and ignored (exit 0), matching the
    /// at-least-once delivery contract of upstream notifiers.
    Notify {
        /// The entity tag (e.g. "user").
        entity: String,
        /// The source tag (e.g. "upstream").
        source: String,
        /// The record's key inside the source.
        key: String,
    },

    /// List records with unresolved conflicts
    Conflicts {
        /// Restrict to one entity.
        #[arg(long)]
        entity: Option<String>,
    },

    /// Print a record's baseline document
    Show {
        /// The entity tag.
        entity: String,
        /// The record's internal id.
        id: i64,
    },
}

fn main() -> Result<()> {
    concord::telemetry::init();
    let cli = Cli::parse();

    let config = ConcordConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let store = config.open_store()?;
    let catalog = config.build_catalog()?;
    let engine = Engine::new(catalog, store);

    match cli.command {
        Commands::Notify {
            entity,
            source,
            key,
        } => notify(engine, &ChangeNotification::new(entity, source, key)),
        Commands::Conflicts { entity } => conflicts(&engine, entity.as_deref()),
        Commands::Show { entity, id } => show(&engine, &entity, id),
    }
}

fn notify(engine: Engine, notification: &ChangeNotification) -> Result<()> {
    let dispatcher = Dispatcher::new(engine);
    match dispatcher.dispatch(notification)? {
        Dispatch::Ignored { reason } => {
            println!("ignored: {reason}");
        }
        Dispatch::Handled(outcome) => {
            match &outcome.operation {
                OperationKind::Created(ik) => println!("created {ik}"),
                OperationKind::Updated(ik) => {
                    if outcome.conflicts > 0 {
                        println!(
                            "updated {ik} with {} conflict fragment(s) — see `concord conflicts`",
                            outcome.conflicts
                        );
                    } else {
                        println!("updated {ik}");
                    }
                }
                OperationKind::Deleted(ik) => println!("deleted {ik}"),
                OperationKind::Problem { key, reason } => {
                    println!("problem with {key}: {reason}");
                }
            }
            for failure in &outcome.failures {
                eprintln!("warning: source '{}': {}", failure.source, failure.error);
            }
        }
    }
    Ok(())
}

fn conflicts(engine: &Engine, entity: Option<&str>) -> Result<()> {
    let filter = entity
        .map(EntityTag::new)
        .transpose()
        .context("invalid entity tag")?;
    let pending = engine.store().pending_notifications(filter.as_ref())?;
    if pending.is_empty() {
        println!("no unresolved conflicts");
        return Ok(());
    }
    for notification in pending {
        println!(
            "{} (merged diff {})",
            notification.key, notification.diff_id
        );
        for fragment in engine.store().conflict_fragments(&notification.key)? {
            let origin = fragment.diff.label.as_deref().unwrap_or("unlabelled");
            println!("  [{origin}] {}", fragment.diff);
        }
    }
    Ok(())
}

fn show(engine: &Engine, entity: &str, id: i64) -> Result<()> {
    let entity = EntityTag::new(entity).context("invalid entity tag")?;
    let ik = InternalKey::new(entity, id);
    match engine.store().lookup_initial_document(&ik)? {
        Some(doc) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        None => bail!("no baseline recorded for {ik}"),
    }
}
