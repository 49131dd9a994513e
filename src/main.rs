use anyhow::Result;
use clap::Parser;
use digit_classifier::mnist::{self, MnistData};
use digit_classifier::network::Classifier;
use digit_classifier::optimizer::Adam;
use digit_classifier::train::{self, DEFAULT_BATCH_SIZE};
use itertools::Itertools;
use ndarray::Axis;
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
use std::path::PathBuf;

/// Train a feed-forward digit classifier on MNIST and report its held-out
/// loss and accuracy.
#[derive(Parser)]
struct Args {
    /// Directory holding the four gzipped MNIST IDX files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Number of full passes over the training split.
    #[arg(long, default_value_t = 5)]
    epochs: usize,

    /// Mini-batch size for gradient updates.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Adam learning rate.
    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,

    /// Seed for weight initialization, shuffling, and dropout. Random when
    /// omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// After evaluation, render this many held-out images with their
    /// probability vectors.
    #[arg(long, default_value_t = 0)]
    show: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("digit_classifier=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let data = MnistData::load(&args.data_dir)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut model = Classifier::new(&mut rng);
    let mut optimizer = Adam::new(args.learning_rate, &model);

    train::train(
        &mut model,
        &mut optimizer,
        &data.training,
        args.epochs,
        args.batch_size,
        &mut rng,
    )?;

    let (loss, accuracy) = train::evaluate(&model, &data.test);
    tracing::info!(loss, accuracy, "test split evaluated");
    println!("Test loss: {loss:.4}, test accuracy: {accuracy:.4}");

    // Inference demo: render a handful of held-out digits alongside the
    // model's probability distribution over the ten classes.
    for index in 0..args.show.min(data.test.len()) {
        let image = data.test.images.row(index);
        mnist::visualize(image);

        let probabilities = model.predict_proba(image.insert_axis(Axis(0)));
        let probabilities = probabilities.row(0);
        let predicted = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(class, _)| class)
            .expect("probability vector has 10 entries");

        println!(
            "True label: {}  predicted: {predicted}",
            data.test.labels[index]
        );
        println!(
            "Probabilities: [{}]",
            probabilities.iter().map(|p| format!("{p:.3}")).join(", ")
        );
    }

    Ok(())
}
