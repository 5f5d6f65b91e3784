use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn, Level};

use action_recognition::clip::loader::clip_frame_ids;
use action_recognition::clip::{sampler, LoaderMode, Mode, SamplingConfig};
use action_recognition::database::repo::ResultSink;
use action_recognition::ingest::storage::LocalObjectStore;
use action_recognition::ml::engine::InferenceEngine;
use action_recognition::ml::labels::ClassLabels;
use action_recognition::ml::pipeline::FfmpegClipReader;
use action_recognition::service::endpoint::{Endpoint, EndpointRequest};
use action_recognition::service::trigger::TriggerHandler;
use action_recognition::training::dataset::{SampleFormat, VideoDataset};
use action_recognition::training::loader::{BatchLoader, LoaderOptions};
use action_recognition::training::trainer::{PriorLearner, Trainer, TrainingConfig};
use action_recognition::utils::config::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one video from object storage.
    Predict {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// `s3://bucket/key` of the video.
        #[arg(long)]
        video: String,
        #[arg(long)]
        max_frames: Option<usize>,
        /// Persist the prediction into this table.
        #[arg(long)]
        table: Option<String>,
    },
    /// Answer newline-delimited endpoint requests from stdin.
    Serve {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// Process an object-created event file.
    Trigger {
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[arg(long)]
        event: PathBuf,
    },
    /// Run the training loop over a frame or video dataset.
    Train(TrainArgs),
    /// Print the frame indices the sampler picks for a video.
    Sample {
        #[arg(long)]
        frames: usize,
        #[arg(long, default_value_t = 32)]
        clip_length: usize,
        #[arg(long, default_value_t = 1)]
        step: usize,
        #[arg(long, default_value_t = 1)]
        segments: usize,
        #[arg(long, default_value = "test")]
        mode: String,
        #[arg(long)]
        slowfast: bool,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

/// Overrides for the environment settings.
#[derive(Args, Debug)]
struct EndpointArgs {
    #[arg(long)]
    model_dir: Option<PathBuf>,
    #[arg(long)]
    storage_root: Option<PathBuf>,
    #[arg(long)]
    database: Option<PathBuf>,
    /// cpu, cuda or cuda:<id>
    #[arg(long)]
    device: Option<String>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0.9)]
    momentum: f64,
    #[arg(long, default_value_t = 0.0001)]
    wd: f64,
    #[arg(long, default_value = "sgd")]
    optimizer: String,
    #[arg(long, default_value_t = 100)]
    log_interval: usize,
    /// Root directory of the extracted frames.
    #[arg(long)]
    train: PathBuf,
    /// Setting file listing `path num_frames label` per line.
    #[arg(long)]
    setting: PathBuf,
    #[arg(long)]
    val_setting: Option<PathBuf>,
    /// Read encoded videos `<path>.<ext>` instead of frame directories.
    #[arg(long)]
    video_ext: Option<String>,
    /// Where the training history is written.
    #[arg(long)]
    model_dir: PathBuf,
    #[arg(long, default_value_t = 8)]
    num_workers: usize,
    #[arg(long, default_value_t = 100)]
    max_batches_per_epoch: usize,
    #[arg(long, default_value_t = 32)]
    clip_length: usize,
    #[arg(long, default_value_t = 224)]
    crop_size: u32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Predict {
            endpoint,
            video,
            max_frames,
            table,
        } => {
            let (settings, endpoint) = build_endpoint(endpoint)?;
            let request = EndpointRequest {
                s3_video_path: video,
                model_max_frames: max_frames.unwrap_or(settings.model_max_frames),
                detection_table_name: table.or(settings.detection_table_name),
            };
            let item = endpoint.handle(&request)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Serve { endpoint } => {
            let (_, endpoint) = build_endpoint(endpoint)?;
            serve(&endpoint)?;
        }
        Command::Trigger { endpoint, event } => {
            let (settings, endpoint) = build_endpoint(endpoint)?;
            let body = fs::read_to_string(&event).with_context(|| format!("Failed to read event {:?}", event))?;
            let handler = TriggerHandler::new(endpoint, settings.model_max_frames, settings.detection_table_name);
            match handler.handle_event(&body)? {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None => warn!("Event {:?} contained no records", event),
            }
        }
        Command::Train(args) => train(args)?,
        Command::Sample {
            frames,
            clip_length,
            step,
            segments,
            mode,
            slowfast,
            seed,
        } => {
            let mut cfg = SamplingConfig::default().with_clip_length(clip_length).with_step(step);
            cfg.segments = segments;
            if slowfast {
                cfg.loader_mode = LoaderMode::slowfast();
            }
            let mode: Mode = mode.parse()?;
            let sampled = sampler::sample(&cfg, frames, mode, &mut StdRng::seed_from_u64(seed))?;
            let output = serde_json::json!({
                "segment_offsets": sampled.segment_offsets,
                "skip_offsets": sampled.skip_offsets,
                "frame_ids": clip_frame_ids(&cfg, &sampled, frames),
            });
            println!("{}", output);
        }
    }
    Ok(())
}

fn build_endpoint(args: EndpointArgs) -> Result<(Settings, Endpoint<InferenceEngine, FfmpegClipReader>)> {
    let mut settings = Settings::load()?;
    if let Some(dir) = args.model_dir {
        settings.model_dir = Some(dir);
    }
    if let Some(root) = args.storage_root {
        settings.storage_root = root;
    }
    if let Some(path) = args.database {
        settings.database_path = path;
    }
    if let Some(device) = args.device {
        settings.device = device.parse()?;
    }

    if let Some(name) = &settings.endpoint_name {
        info!("Endpoint {}", name);
    }
    let paths = settings.model_paths()?;
    let engine = InferenceEngine::new(&paths.model, &settings.device)?;
    let labels = ClassLabels::load(&paths.classes)?;
    info!("Loaded {} class labels from {:?}", labels.len(), paths.classes);

    let sink = ResultSink::open(&settings.database_path)
        .with_context(|| format!("Failed to open result store {:?}", settings.database_path))?;
    let endpoint = Endpoint::new(
        engine,
        FfmpegClipReader,
        labels,
        Box::new(LocalObjectStore::new(&settings.storage_root)),
    )
    .with_sink(sink);
    Ok((settings, endpoint))
}

/// One request per line in, one response per line out. A failed request
/// answers with an error object and the loop carries on.
fn serve(endpoint: &Endpoint<InferenceEngine, FfmpegClipReader>) -> Result<()> {
    info!("Serving requests from stdin");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match endpoint.handle_json(&line) {
            Ok(body) => body,
            Err(e) => {
                error!("Request failed: {:#}", e);
                serde_json::json!({ "error": format!("{:#}", e) }).to_string()
            }
        };
        writeln!(out, "{}", response)?;
        out.flush()?;
    }
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    let sampling = SamplingConfig::default()
        .with_clip_length(args.clip_length)
        .with_crop_size(args.crop_size);
    let config = TrainingConfig {
        batch_size: args.batch_size,
        epochs: args.epochs,
        learning_rate: args.learning_rate,
        momentum: args.momentum,
        weight_decay: args.wd,
        optimizer: args.optimizer,
        log_interval: args.log_interval,
        num_workers: args.num_workers,
        max_batches_per_epoch: args.max_batches_per_epoch,
        ..Default::default()
    };
    let options = LoaderOptions {
        batch_size: config.batch_size,
        num_workers: config.num_workers,
        max_batches: Some(config.max_batches_per_epoch),
        seed: args.seed,
        ..Default::default()
    };

    let format = match &args.video_ext {
        Some(extension) => SampleFormat::Video {
            extension: extension.clone(),
        },
        None => SampleFormat::Frames,
    };

    let train_set = VideoDataset::from_setting_file(&args.train, &args.setting, sampling.clone(), Mode::Train)?
        .with_format(format.clone());
    info!("Load {} training samples", train_set.len());
    let num_classes = train_set.num_classes();
    let train_loader = BatchLoader::new(Arc::new(train_set), options.clone())?;

    let val_loader = match &args.val_setting {
        Some(setting) => {
            let val_set =
                VideoDataset::from_setting_file(&args.train, setting, sampling, Mode::Val)?.with_format(format);
            info!("Load {} validation samples", val_set.len());
            let val_options = LoaderOptions {
                shuffle: false,
                max_batches: None,
                ..options
            };
            Some(BatchLoader::new(Arc::new(val_set), val_options)?)
        }
        None => None,
    };

    let trainer = Trainer::new(config);
    let mut learner = PriorLearner::new(num_classes);
    let history = trainer.fit(&mut learner, &train_loader, val_loader.as_ref())?;

    fs::create_dir_all(&args.model_dir)?;
    let history_path = args.model_dir.join("history.json");
    history.save(&history_path)?;
    info!("Saved training history to {:?}", history_path);
    Ok(())
}
