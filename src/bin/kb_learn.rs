//! kb-learn - inspect and maintain a feedback-learn knowledge base.
//!
//! Every mutating command runs one full learning session against the
//! store, so what it writes is exactly what an interactive review would.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedback_learn::{
    Correction, EntityKind, ExtractedEntities, JsonFileStore, KnowledgeStore, LearningConfig,
    LearningReport, LearningSession,
};

#[derive(Parser)]
#[command(name = "kb-learn")]
#[command(about = "Correction memory and pattern learning for extracted entities")]
struct Cli {
    /// Directory holding the knowledge base
    #[arg(long, env = "KB_LEARN_STORE_DIR", default_value = "data/feedback")]
    store_dir: PathBuf,

    /// JSON configuration file
    #[arg(long, env = "KB_LEARN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print what has been learned so far
    Report,

    /// Record one correction and persist it
    Record {
        /// Entity kind (person, workflow, insight)
        #[arg(long)]
        kind: EntityKind,

        /// Entity key as extracted
        #[arg(long)]
        key: String,

        /// Corrected field
        #[arg(long)]
        field: String,

        /// Value the analysis produced (empty if the field was missing)
        #[arg(long, default_value = "")]
        wrong: String,

        /// Correct value
        #[arg(long)]
        correct: String,

        /// Document the mistake came from
        #[arg(long, default_value = "")]
        document: String,
    },

    /// Apply learned knowledge to an analyzer output file
    Apply {
        /// Analyzer output (JSON with identified_persons, workflows, insights)
        analysis: PathBuf,

        /// Document identifier (defaults to the file name)
        #[arg(long)]
        document: Option<String>,
    },

    /// Re-run abstraction over the full history and persist
    Abstract,

    /// Drop idle superseded rules per the configured retention policy
    Prune,
}

fn load_config(path: Option<&PathBuf>) -> Result<LearningConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(LearningConfig::from_json_file(path)?),
        None => Ok(LearningConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let store = Arc::new(JsonFileStore::open(&cli.store_dir, &config)?);
    let mut session = LearningSession::new(store.clone(), config)?;

    match cli.command {
        Commands::Report => {
            let knowledge = store.load()?;
            print!("{}", LearningReport::from_knowledge(&knowledge));
        }

        Commands::Record {
            kind,
            key,
            field,
            wrong,
            correct,
            document,
        } => {
            let correction = Correction::builder()
                .entity(kind, key)
                .field(field)
                .wrong_value(wrong)
                .correct_value(correct)
                .source_document(document)
                .build()?;

            session.begin()?;
            let id = session.record_correction(correction)?;
            let report = session.persist()?;
            session.end()?;
            info!(%id, rules_added = report.merge.added, "correction stored");
            println!("{id}");
        }

        Commands::Apply { analysis, document } => {
            let raw = std::fs::read_to_string(&analysis)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let document_id = document.unwrap_or_else(|| {
                analysis
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let entities = ExtractedEntities::from_analysis_json(document_id, &value);

            session.begin()?;
            let applied = session.apply(&entities)?;
            let advisories = session.advisories()?;
            session.persist()?;
            session.end()?;

            let output = json!({
                "entities": applied.entities,
                "warnings": applied.warnings,
                "advisories": advisories,
                "checklist": feedback_learn::verification_checklist(&advisories),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Abstract => {
            session.begin()?;
            let report = session.persist()?;
            session.end()?;
            println!(
                "added {}, updated {}, unchanged {}, superseded {}",
                report.merge.added, report.merge.updated, report.merge.unchanged, report.merge.superseded
            );
        }

        Commands::Prune => {
            session.begin()?;
            let removed = session.prune_idle_rules()?;
            session.persist()?;
            session.end()?;
            println!("pruned {} rule(s)", removed.len());
        }
    }

    Ok(())
}
