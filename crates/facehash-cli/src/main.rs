use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facehash_core::{
    BinaryHash, ChannelOrder, DetectorBackend, FaceHasher, HammingMatcher, LabeledImage, Matcher,
    ModelOptions, MIN_IMAGES,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facehash", about = "Facial similarity hashing from the command line")]
struct Cli {
    /// Directory containing det_10g.onnx and facenet.onnx
    #[arg(long, global = true, env = "FACEHASH_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Face detector backend (scrfd, skip)
    #[arg(long, global = true, default_value = "scrfd")]
    backend: DetectorBackend,

    /// Channel order the embedding model expects (rgb, bgr)
    #[arg(long, global = true, default_value = "rgb")]
    channel_order: ChannelOrder,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash the face in one image
    Hash {
        image: PathBuf,
        /// Print the SHA-256 digest of the hash instead of the hash itself
        #[arg(long)]
        secure: bool,
    },
    /// Hash the mean embedding of several images
    Average {
        #[arg(required = true, num_args = 1..)]
        images: Vec<PathBuf>,
    },
    /// Compare two hashes by Hamming distance
    Compare {
        hash_a: String,
        hash_b: String,
        /// Maximum distance still considered a match
        #[arg(long)]
        threshold: u32,
    },
    /// Hash two images and compare them
    CompareImages {
        image1: PathBuf,
        image2: PathBuf,
        /// Maximum distance still considered a match
        #[arg(long)]
        threshold: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = ModelOptions {
        model_dir: cli.model_dir.clone().unwrap_or_else(facehash_core::default_model_dir),
        backend: cli.backend,
        channel_order: cli.channel_order,
    };

    let output = match cli.command {
        Commands::Hash { image, secure } => {
            let mut hasher = load(&options)?;
            let hash = hasher
                .hash_image(&read(&image)?)
                .with_context(|| format!("{}", image.display()))?;
            let hash = if secure { hash.digest() } else { hash.to_string() };
            serde_json::json!({ "hash": hash })
        }
        Commands::Average { images } => {
            if images.len() < MIN_IMAGES {
                bail!("at least {MIN_IMAGES} images required");
            }
            let inputs = images
                .iter()
                .map(|p| Ok(LabeledImage::new(p.display().to_string(), read(p)?)))
                .collect::<Result<Vec<_>>>()?;
            let result = load(&options)?.average_hash(&inputs)?;
            serde_json::to_value(&result)?
        }
        Commands::Compare {
            hash_a,
            hash_b,
            threshold,
        } => {
            let a: BinaryHash = hash_a.parse().context("first hash")?;
            let b: BinaryHash = hash_b.parse().context("second hash")?;
            let comparison = HammingMatcher::new(threshold).compare(&a, &b)?;
            serde_json::json!({
                "hamming_distance": comparison.distance,
                "is_match": comparison.is_match,
                "hash_length": a.len(),
                "threshold": threshold,
            })
        }
        Commands::CompareImages {
            image1,
            image2,
            threshold,
        } => {
            let mut hasher = load(&options)?;
            let hash1 = hasher
                .hash_image(&read(&image1)?)
                .with_context(|| format!("{}", image1.display()))?;
            let hash2 = hasher
                .hash_image(&read(&image2)?)
                .with_context(|| format!("{}", image2.display()))?;
            let comparison = HammingMatcher::new(threshold).compare(&hash1, &hash2)?;
            serde_json::json!({
                "hashes": { "image1": hash1, "image2": hash2 },
                "hamming_distance": comparison.distance,
                "is_match": comparison.is_match,
                "hash_length": hash1.len(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load(options: &ModelOptions) -> Result<FaceHasher> {
    tracing::debug!(model_dir = %options.model_dir.display(), backend = options.backend.as_str(), "loading models");
    FaceHasher::load(options).context("failed to load face models")
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}
