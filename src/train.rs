use crate::error::Error;
use crate::mnist::Split;
use crate::network::{Classifier, ForwardCache, softmax};
use crate::optimizer::{Adam, Gradients};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_rand::rand::{Rng, seq::SliceRandom};

pub const DEFAULT_BATCH_SIZE: usize = 32;

// Probabilities are floored here before the logarithm so a vanishing softmax
// entry yields a large finite loss instead of infinity. A NaN probability is
// deliberately not floored; it must surface as a non-finite loss.
const PROBABILITY_FLOOR: f64 = 1e-12;

// Evaluation runs the test split through the model in chunks of this many
// rows to keep the intermediate activation matrices small.
const EVAL_CHUNK: usize = 256;

/// Mean training loss and accuracy over one full pass of the training split.
#[derive(Clone, Copy, Debug)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// Fits the model against the training split for the given number of epochs.
/// Each epoch shuffles the example order, partitions it into mini-batches of
/// `batch_size` (the last one may be short), and for each mini-batch runs a
/// training-mode forward pass, computes the mean sparse categorical
/// cross-entropy from the logits, backpropagates, and applies one Adam
/// update. With `epochs == 0` the parameters are never touched.
///
/// A non-finite mini-batch loss aborts the run with `NumericalDivergence`;
/// the parameters are considered corrupted at that point. Asking for at
/// least one epoch over an empty split is a `ShapeMismatch`.
pub fn train<R: Rng + ?Sized>(
    model: &mut Classifier,
    optimizer: &mut Adam,
    training: &Split,
    epochs: usize,
    batch_size: usize,
    rng: &mut R,
) -> Result<Vec<EpochStats>, Error> {
    if epochs > 0 && training.is_empty() {
        return Err(Error::ShapeMismatch("training split is empty".into()));
    }

    let mut history = Vec::with_capacity(epochs);
    let mut indices = (0..training.len()).collect::<Vec<_>>();

    for epoch in 0..epochs {
        indices.shuffle(rng);

        let mut loss_sum = 0.0;
        let mut correct = 0;

        for (batch, batch_indices) in indices.chunks(batch_size).enumerate() {
            // Gather the mini-batch rows in shuffled order. The dataset
            // arrays themselves are never mutated.
            let batch_images = training.images.select(Axis(0), batch_indices);
            let batch_labels = training.labels.select(Axis(0), batch_indices);

            let cache = model.forward_train(batch_images.view(), rng);
            let probabilities = softmax(&cache.logits);
            let loss = cross_entropy(&probabilities, batch_labels.view());

            if !loss.is_finite() {
                return Err(Error::NumericalDivergence { epoch, batch });
            }

            loss_sum += loss * batch_indices.len() as f64;
            correct += count_correct(&cache.logits, batch_labels.view());

            let gradients = backpropagate(
                model,
                batch_images.view(),
                batch_labels.view(),
                &cache,
                probabilities,
            );
            optimizer.step(model, &gradients);
        }

        let stats = EpochStats {
            epoch,
            loss: loss_sum / training.len() as f64,
            accuracy: correct as f64 / training.len() as f64,
        };
        tracing::info!(
            epoch = stats.epoch,
            loss = stats.loss,
            accuracy = stats.accuracy,
            "epoch finished"
        );
        history.push(stats);
    }

    Ok(history)
}

/// Runs the model over the whole test split with dropout disabled and
/// returns (mean loss, accuracy). No parameter mutation occurs.
pub fn evaluate(model: &Classifier, test: &Split) -> (f64, f64) {
    let mut loss_sum = 0.0;
    let mut correct = 0;

    for (images, labels) in test
        .images
        .axis_chunks_iter(Axis(0), EVAL_CHUNK)
        .zip(test.labels.axis_chunks_iter(Axis(0), EVAL_CHUNK))
    {
        let logits = model.logits(images);
        let probabilities = softmax(&logits);
        loss_sum += cross_entropy(&probabilities, labels) * labels.len() as f64;
        correct += count_correct(&logits, labels);
    }

    (
        loss_sum / test.len() as f64,
        correct as f64 / test.len() as f64,
    )
}

// Mean over the batch of -ln(probability assigned to the true label).
fn cross_entropy(probabilities: &Array2<f64>, labels: ArrayView1<u8>) -> f64 {
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| {
            let p = probabilities[[row, label as usize]];
            // A comparison instead of f64::max, so NaN propagates rather
            // than being replaced by the floor.
            let p = if p < PROBABILITY_FLOOR {
                PROBABILITY_FLOOR
            } else {
                p
            };
            -p.ln()
        })
        .sum();
    total / labels.len() as f64
}

// Counts the rows whose highest class score sits at the true label's index.
fn count_correct(logits: &Array2<f64>, labels: ArrayView1<u8>) -> usize {
    logits
        .rows()
        .into_iter()
        .zip(labels.iter())
        .filter(|(scores, label)| {
            scores
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index)
                .expect("every class-score vector has 10 entries")
                == **label as usize
        })
        .count()
}

// Analytic gradients for one mini-batch. With cross-entropy taken directly
// on the logits, the gradient at the logits is (softmax - onehot) / batch;
// from there the two affine layers and the dropout/ReLU masks are walked
// backwards.
fn backpropagate(
    model: &Classifier,
    images: ArrayView2<f64>,
    labels: ArrayView1<u8>,
    cache: &ForwardCache,
    mut probabilities: Array2<f64>,
) -> Gradients {
    let batch = labels.len() as f64;

    for (row, &label) in labels.iter().enumerate() {
        probabilities[[row, label as usize]] -= 1.0;
    }
    probabilities /= batch;
    let d_logits = probabilities;

    let w2 = cache.hidden.t().dot(&d_logits);
    let b2 = d_logits.sum_axis(Axis(0));

    // Through dropout (the mask already carries the 1/keep rescale) and then
    // through ReLU, which passes gradient only where the activation was
    // positive.
    let mut d_hidden = d_logits.dot(&model.w2.t());
    d_hidden *= &cache.mask;
    Zip::from(&mut d_hidden)
        .and(&cache.relu_out)
        .for_each(|d, &activation| {
            if activation <= 0.0 {
                *d = 0.0;
            }
        });

    let w1 = images.t().dot(&d_hidden);
    let b1 = d_hidden.sum_axis(Axis(0));

    Gradients { w1, b1, w2, b2 }
}
