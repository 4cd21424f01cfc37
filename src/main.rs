use anyhow::Context;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;
use visage_core::enrollment::write_face;
use visage_core::{
    validate_label, Bucket, ClassifierCache, Engine, EngineConfig, FaceStore, Vector, VectorCorpus,
};
use visage_storage::LocalStore;

/// Live face identification over a local face store
#[derive(Parser, Debug)]
#[command(name = "visage")]
#[command(about = "Identify, enroll and curate faces", long_about = None)]
struct Args {
    /// Path to the data directory
    #[arg(short, long, default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct ConfigArgs {
    /// Minimum classifier confidence for a match
    #[arg(long, default_value_t = 0.60, global = true)]
    confidence_threshold: f32,

    /// Minimum cosine similarity to the nearest enrolled face
    #[arg(long, default_value_t = 0.70, global = true)]
    similarity_threshold: f32,

    /// Seconds between stored images of the same label
    #[arg(long, default_value_t = 600, global = true)]
    persist_window_secs: u64,

    /// Seconds between detection logs of the same label
    #[arg(long, default_value_t = 600, global = true)]
    log_window_secs: u64,

    /// Store faces that match nobody
    #[arg(long, default_value_t = true, action = ArgAction::Set, global = true)]
    persist_unrecognized: bool,

    /// Process every Nth frame
    #[arg(long, default_value_t = 5, global = true)]
    frame_sample_interval: u64,

    /// Embedding dimension
    #[arg(long, default_value_t = 512, global = true)]
    dimension: usize,

    /// Background writer threads
    #[arg(long, default_value_t = 2, global = true)]
    workers: usize,

    /// Background queue capacity
    #[arg(long, default_value_t = 256, global = true)]
    queue_capacity: usize,
}

impl From<&ConfigArgs> for EngineConfig {
    fn from(args: &ConfigArgs) -> Self {
        EngineConfig {
            confidence_threshold: args.confidence_threshold,
            similarity_threshold: args.similarity_threshold,
            persist_window: Duration::from_secs(args.persist_window_secs),
            log_window: Duration::from_secs(args.log_window_secs),
            persist_unrecognized: args.persist_unrecognized,
            frame_sample_interval: args.frame_sample_interval,
            dimension: args.dimension,
            workers: args.workers,
            queue_capacity: args.queue_capacity,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Labels, record counts and model status
    Stats,
    /// Fit the classifier, or confirm the cached one still matches
    Train,
    /// Resolve one embedding and print the decision
    Identify {
        /// JSON file holding an array of floats
        #[arg(long)]
        vector: PathBuf,
    },
    /// Store a labeled embedding, with an optional face image
    Enroll {
        #[arg(long)]
        label: String,
        #[arg(long)]
        vector: PathBuf,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Images and detection logs for a label
    Profile {
        #[arg(long)]
        label: String,
    },
    /// List faces that matched nobody
    Unrecognized,
    /// File an unrecognized face under a label
    Assign {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        label: String,
    },
    /// Refile a face from one label to another
    Move {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        id: Uuid,
    },
    /// Remove a face from a label
    Delete {
        #[arg(long)]
        label: String,
        #[arg(long)]
        id: Uuid,
    },
}

fn read_vector(path: &Path, dimension: usize) -> anyhow::Result<Vector> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f32> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {} as a JSON float array", path.display()))?;
    let vector = Vector::new(values);
    vector.validate(dimension)?;
    Ok(vector)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from(&args.config);
    config.validate()?;

    info!("visage v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", args.data_dir);

    let store = Arc::new(LocalStore::open(&args.data_dir)?);

    match args.command {
        Command::Stats => {
            let labels = store.list_labels()?;
            let mut counts = serde_json::Map::new();
            for label in &labels {
                counts.insert(label.clone(), json!(store.profile(label)?.images.len()));
            }
            let corpus = VectorCorpus::load(store.as_ref(), config.dimension)?;
            let model = ClassifierCache::new(store.model_cache()).load_cached();
            let model_status = match &model {
                None => "absent",
                Some(m) if m.dimension() == corpus.dimension() && m.labels().matches(corpus.labels()) => {
                    "current"
                }
                Some(_) => "stale",
            };
            print_json(&json!({
                "labels": counts,
                "unrecognized": store.list_unrecognized()?.len(),
                "model": model_status,
            }))?;
        }
        Command::Train => {
            let corpus = VectorCorpus::load(store.as_ref(), config.dimension)?;
            let classifier = ClassifierCache::new(store.model_cache());
            let (model, origin) = classifier.train_or_load(&corpus)?;
            print_json(&json!({
                "origin": origin,
                "labels": model.labels().labels(),
                "entries": corpus.len(),
            }))?;
        }
        Command::Identify { vector } => {
            let vector = read_vector(&vector, config.dimension)?;
            let cache = store.model_cache();
            let engine = Engine::init(config, store, cache)?;
            let decision = engine.resolve(&vector)?;
            engine.shutdown();
            print_json(&decision)?;
        }
        Command::Enroll { label, vector, image } => {
            validate_label(&label)?;
            let vector = read_vector(&vector, config.dimension)?;
            let image = match image {
                Some(path) => Some(
                    image::open(&path)
                        .with_context(|| format!("opening {}", path.display()))?
                        .to_rgb8(),
                ),
                None => None,
            };
            let record = write_face(
                store.as_ref(),
                image.as_ref(),
                &Bucket::Label(label),
                vector.as_slice(),
            )?;
            print_json(&record)?;
        }
        Command::Profile { label } => {
            print_json(&store.profile(&label)?)?;
        }
        Command::Unrecognized => {
            print_json(&store.list_unrecognized()?)?;
        }
        Command::Assign { id, label } => {
            let record = store.assign_unrecognized(&id, &label)?;
            info!("Assigned {} to {}", record.id, label);
            print_json(&record)?;
        }
        Command::Move { from, to, id } => {
            let record = store.move_record(&from, &to, &id)?;
            info!("Moved {} from {} to {}", record.id, from, to);
            print_json(&record)?;
        }
        Command::Delete { label, id } => {
            let deleted = store.delete_record(&label, &id)?;
            if !deleted {
                info!("No record {} under {}", id, label);
            }
            print_json(&json!({ "deleted": deleted }))?;
        }
    }

    Ok(())
}
