use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{FaceAnalyzer, Gallery, Metric, ModelPaths, OnnxAnalyzer, ThresholdMatcher};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", about = "Match faces against a reference gallery without the daemon")]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, env = "FACEMATCH_MODEL_DIR", global = true)]
    models: Option<PathBuf>,

    /// Directory of reference images
    #[arg(long, env = "FACEMATCH_REFERENCE_DIR", default_value = "reference_images", global = true)]
    references: PathBuf,

    /// ONNX Runtime intra-op threads per session
    #[arg(long, env = "FACEMATCH_INTRA_THREADS", default_value_t = 2, global = true)]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the faces detected in an image
    Detect {
        image: PathBuf,
    },
    /// Match every face in an image against the reference gallery
    Match {
        image: PathBuf,
        /// Comparison metric (cosine or euclidean)
        #[arg(long, env = "FACEMATCH_METRIC", default_value = "cosine")]
        metric: Metric,
        /// Match threshold; defaults to the metric's own default
        #[arg(long, env = "FACEMATCH_THRESHOLD")]
        threshold: Option<f32>,
    },
    /// Load the reference gallery and list its entries
    Gallery,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let model_dir = cli.models.clone().unwrap_or_else(facematch_core::default_model_dir);
    let mut analyzer = OnnxAnalyzer::load(&ModelPaths::in_dir(&model_dir), cli.threads)
        .with_context(|| format!("loading models from {}", model_dir.display()))?;

    match cli.command {
        Commands::Detect { image } => {
            let image = open_image(&image)?;
            let faces = analyzer.analyze(&image)?;
            let boxes: Vec<_> = faces.iter().map(|f| &f.bbox).collect();
            println!("{}", serde_json::to_string_pretty(&boxes)?);
        }
        Commands::Match { image, metric, threshold } => {
            let gallery = load_gallery(&cli.references, &mut analyzer)?;
            let matcher = ThresholdMatcher::new(metric, threshold.unwrap_or(metric.default_threshold()));
            let image = open_image(&image)?;
            let results = facematch_core::match_faces(&image, &mut analyzer, &matcher, &gallery)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Gallery => {
            let gallery = load_gallery(&cli.references, &mut analyzer)?;
            let listing = serde_json::json!({
                "references": gallery.names().collect::<Vec<_>>(),
                "skipped": gallery
                    .skipped()
                    .iter()
                    .map(|s| serde_json::json!({ "name": s.name, "reason": s.reason }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
    }

    Ok(())
}

fn open_image(path: &Path) -> Result<image::RgbImage> {
    facematch_core::open_image(path).with_context(|| format!("decoding {}", path.display()))
}

fn load_gallery(dir: &Path, analyzer: &mut OnnxAnalyzer) -> Result<Gallery> {
    Gallery::load(dir, analyzer).with_context(|| format!("loading gallery from {}", dir.display()))
}
