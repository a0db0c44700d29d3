//! Train and evaluate a model on a synthetic bag-of-features task.
//!
//! Every label owns a block of "signal" features; an example is a handful of
//! features from its label's block plus some shared noise features. Training
//! runs hogwild on several threads against one shared model.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use std::{process, thread};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use fasttext_core::{LossKind, Model, ModelArgs, Predictions};

#[derive(Parser)]
#[command(about = "Train a bag-of-features classifier on synthetic data", long_about = None)]
struct Options {
    /// Loss function
    #[arg(long, value_enum, default_value_t = LossKind::Softmax)]
    loss: LossKind,

    /// Size of embedding vectors
    #[arg(long, default_value_t = 16)]
    dim: usize,

    /// Number of labels
    #[arg(long, default_value_t = 20)]
    labels: usize,

    /// Signal features owned by each label
    #[arg(long = "features-per-label", default_value_t = 10)]
    features_per_label: usize,

    /// Noise features shared by all labels
    #[arg(long = "noise-features", default_value_t = 50)]
    noise_features: usize,

    /// Number of training examples (the test set is a quarter of this)
    #[arg(long, default_value_t = 20_000)]
    examples: usize,

    /// Number of epochs
    #[arg(long, default_value_t = 5)]
    epoch: usize,

    /// Starting learning rate
    #[arg(long, default_value_t = 0.5)]
    lr: f32,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 4)]
    num_threads: usize,

    /// Number of negatives sampled (negative sampling only)
    #[arg(long, default_value_t = 5)]
    neg: usize,

    /// Seed for data generation and training
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Number of labels to predict when evaluating
    #[arg(long, default_value_t = 1)]
    k: usize,

    /// Minimum score for a predicted label
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,

    /// Guard matrix rows with N sharded locks instead of training lock-free
    #[arg(long = "lock-shards", value_name = "N")]
    lock_shards: Option<usize>,
}

struct Example {
    features: Vec<usize>,
    label: usize,
}

/// Generate `n` examples. Label frequencies fall off as `1 / (label + 1)`.
fn generate(options: &Options, n: usize, rng: &mut StdRng) -> Result<Vec<Example>> {
    let weights = (0..options.labels).map(|l| 1.0 / (l + 1) as f64);
    let label_dist = WeightedIndex::new(weights).context("invalid label distribution")?;
    let signal = options.labels * options.features_per_label;

    Ok((0..n)
        .map(|_| {
            let label = label_dist.sample(rng);
            let mut features: Vec<usize> = (0..4)
                .map(|_| label * options.features_per_label + rng.gen_range(0..options.features_per_label))
                .collect();
            if options.noise_features > 0 {
                features.extend((0..2).map(|_| signal + rng.gen_range(0..options.noise_features)));
            }
            Example { features, label }
        })
        .collect())
}

fn train_thread(
    model: &Model,
    options: &Options,
    examples: &[Example],
    id: usize,
    processed: &AtomicU64,
    progress: &ProgressBar,
) -> Result<Option<f32>> {
    let total = (options.epoch * examples.len()) as u64;
    let begin = examples.len() * id / options.num_threads;
    let end = examples.len() * (id + 1) / options.num_threads;
    let mut state = model.new_state(options.seed.wrapping_add(id as u64));

    let mut local = 0u64;
    for _ in 0..options.epoch {
        for example in &examples[begin..end] {
            let done = processed.load(Ordering::Relaxed) + local;
            let lr = options.lr * (1.0 - done as f32 / total as f32).max(0.0001);
            model
                .update(&example.features, &[example.label], 0, lr, &mut state)
                .with_context(|| format!("update failed in worker thread {id}"))?;

            local += 1;
            if local == 1000 {
                processed.fetch_add(local, Ordering::Relaxed);
                progress.inc(local);
                local = 0;
                if id == 0 {
                    if let Some(loss) = state.loss() {
                        progress.set_message(format!("lr {lr:.4}  loss {loss:.4}"));
                    }
                }
            }
        }
    }
    processed.fetch_add(local, Ordering::Relaxed);
    progress.inc(local);
    Ok(state.loss())
}

fn run(options: Options) -> Result<()> {
    anyhow::ensure!(options.num_threads > 0, "--threads must be at least 1");
    anyhow::ensure!(options.labels > 0, "--labels must be at least 1");
    anyhow::ensure!(
        options.features_per_label > 0,
        "--features-per-label must be at least 1"
    );

    let mut rng = StdRng::seed_from_u64(options.seed);
    let train = generate(&options, options.examples, &mut rng)?;
    let test = generate(&options, options.examples / 4, &mut rng)?;

    let mut label_counts = vec![0u64; options.labels];
    for example in &train {
        label_counts[example.label] += 1;
    }
    // Labels that never appear still need a count to be sampled or coded.
    for count in &mut label_counts {
        *count = (*count).max(1);
    }

    let args = ModelArgs {
        dim: options.dim,
        loss: options.loss,
        neg: options.neg,
        normalize_gradient: true,
        seed: options.seed,
        row_lock_shards: options.lock_shards,
    };
    let input_rows = options.labels * options.features_per_label + options.noise_features;
    let model = Model::from_args(&args, input_rows, &label_counts).context("error building model")?;
    info!(
        "training {} loss on {} examples, {} threads, {} epochs",
        options.loss,
        train.len(),
        options.num_threads,
        options.epoch
    );

    let progress = ProgressBar::new((options.epoch * train.len()) as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .context("invalid progress bar template")?,
    );
    let processed = AtomicU64::new(0);
    let start = Instant::now();

    let losses = thread::scope(|s| {
        let threads = (0..options.num_threads)
            .map(|id| {
                let (model, options, train) = (&model, &options, &train);
                let (processed, progress) = (&processed, &progress);
                s.spawn(move || train_thread(model, options, train, id, processed, progress))
            })
            .collect::<Vec<_>>();
        threads
            .into_iter()
            .map(|t| t.join().map_err(|_| anyhow!("worker thread panicked"))?)
            .collect::<Result<Vec<Option<f32>>>>()
    })?;
    progress.finish_and_clear();

    let losses: Vec<f32> = losses.into_iter().flatten().collect();
    let mean_loss = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
    println!(
        "Trained in {:.2}s, average loss {mean_loss:.4}",
        start.elapsed().as_secs_f64()
    );

    let capacity = options.k.min(options.labels);
    let correct = test
        .par_iter()
        .map_init(
            || (model.new_state(options.seed), Predictions::with_capacity(capacity)),
            |(state, predictions), example| -> fasttext_core::Result<bool> {
                model.predict(&example.features, options.k, options.threshold, predictions, state)?;
                Ok(predictions.best().is_some_and(|p| p.label == example.label))
            },
        )
        .collect::<fasttext_core::Result<Vec<bool>>>()
        .context("error evaluating model")?
        .into_iter()
        .filter(|&hit| hit)
        .count();

    println!("N\t{}", test.len());
    println!("P@1\t{:.3}", correct as f64 / test.len().max(1) as f64);
    Ok(())
}

fn main() {
    env_logger::init();
    let options = Options::parse();

    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
