use crate::mnist::{CLASSES, IMAGE_PIXELS};
use ndarray::{Array, Array1, Array2, ArrayView2};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::StandardNormal};

pub const HIDDEN_UNITS: usize = 128;
pub const DROPOUT_RATE: f64 = 0.2;

/// Whether a forward pass is part of training or inference. Dropout is only
/// active in `Train` mode; in `Infer` mode it is the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Infer,
}

/// The fixed-topology digit classifier: a flattened 28x28 image goes through
/// a 784->128 affine layer with ReLU, dropout at rate 0.2, and a 128->10
/// affine layer producing raw class scores (logits).
///
/// The parameters are owned here and mutated only by the trainer; every
/// forward pass takes `&self`.
pub struct Classifier {
    pub(crate) w1: Array2<f64>,
    pub(crate) b1: Array1<f64>,
    pub(crate) w2: Array2<f64>,
    pub(crate) b2: Array1<f64>,
}

// Intermediate values of a training-mode forward pass that backpropagation
// needs again: the post-ReLU activations, the dropout mask (0 where an
// activation was zeroed, 1/keep_rate where it survived), the masked hidden
// activations, and the logits.
pub(crate) struct ForwardCache {
    pub relu_out: Array2<f64>,
    pub mask: Array2<f64>,
    pub hidden: Array2<f64>,
    pub logits: Array2<f64>,
}

impl Classifier {
    /// Initializes weights from a scaled standard normal distribution
    /// (scaled by sqrt(2/fan_in) to suit the ReLU hidden layer) and biases
    /// at zero.
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Classifier {
        let w1: Array2<f64> = Array::random_using((IMAGE_PIXELS, HIDDEN_UNITS), StandardNormal, rng)
            * (2.0 / IMAGE_PIXELS as f64).sqrt();
        let w2: Array2<f64> = Array::random_using((HIDDEN_UNITS, CLASSES), StandardNormal, rng)
            * (2.0 / HIDDEN_UNITS as f64).sqrt();
        Classifier {
            w1,
            b1: Array1::zeros(HIDDEN_UNITS),
            w2,
            b2: Array1::zeros(CLASSES),
        }
    }

    /// Computes one class-score vector (10 logits) per input row. In `Train`
    /// mode a fresh dropout mask is sampled from `rng`; in `Infer` mode the
    /// rng is never touched and the output is deterministic.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        images: ArrayView2<f64>,
        mode: Mode,
        rng: &mut R,
    ) -> Array2<f64> {
        match mode {
            Mode::Train => self.forward_train(images, rng).logits,
            Mode::Infer => self.logits(images),
        }
    }

    // Inference-mode forward pass: dropout disabled.
    pub(crate) fn logits(&self, images: ArrayView2<f64>) -> Array2<f64> {
        let hidden = (images.dot(&self.w1) + &self.b1).mapv_into(|z| z.max(0.0));
        hidden.dot(&self.w2) + &self.b2
    }

    // Training-mode forward pass. Each hidden activation is independently
    // zeroed with probability DROPOUT_RATE and the survivors are scaled by
    // 1/(1 - DROPOUT_RATE) so the expected magnitude is unchanged.
    pub(crate) fn forward_train<R: Rng + ?Sized>(
        &self,
        images: ArrayView2<f64>,
        rng: &mut R,
    ) -> ForwardCache {
        let relu_out = (images.dot(&self.w1) + &self.b1).mapv_into(|z| z.max(0.0));

        let keep_rate = 1.0 - DROPOUT_RATE;
        let mask = Array2::from_shape_fn(relu_out.raw_dim(), |_| {
            if rng.r#gen::<f64>() < keep_rate {
                1.0 / keep_rate
            } else {
                0.0
            }
        });
        let hidden = &relu_out * &mask;

        let logits = hidden.dot(&self.w2) + &self.b2;
        ForwardCache {
            relu_out,
            mask,
            hidden,
            logits,
        }
    }

    /// Runs inference and converts each class-score vector into a
    /// probability distribution. Pure; does not mutate the model.
    pub fn predict_proba(&self, images: ArrayView2<f64>) -> Array2<f64> {
        softmax(&self.logits(images))
    }
}

/// Row-wise stabilized softmax: the row maximum is subtracted before
/// exponentiation so that no exp() can overflow. Every output row consists of
/// values in [0, 1] summing to 1.
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = logits.to_owned();
    for mut row in probabilities.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|e| e / sum);
    }
    probabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn softmax_rows_are_distributions() {
        let logits = array![[3.0, -1.0, 0.5, 8.0, 2.0], [0.0, 0.0, -50.0, 30.0, 1.0]];
        let probabilities = softmax(&logits);
        for row in probabilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn softmax_of_uniform_logits_is_uniform() {
        let logits = Array2::from_elem((1, 10), 4.2);
        let probabilities = softmax(&logits);
        for &p in probabilities.iter() {
            assert!((p - 0.1).abs() < 1e-12);
        }
    }

    #[test]
    fn softmax_survives_huge_logits() {
        // Without max subtraction exp(1000) would overflow to infinity.
        let logits = array![[1000.0, 999.0, 998.0]];
        let probabilities = softmax(&logits);
        assert!(probabilities.iter().all(|p| p.is_finite()));
        assert!((probabilities.row(0).sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn forward_outputs_ten_scores_per_image() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = Classifier::new(&mut rng);
        for batch in [1, 3, 32] {
            let images = Array2::from_elem((batch, IMAGE_PIXELS), 0.5);
            let logits = model.forward(images.view(), Mode::Infer, &mut rng);
            assert_eq!(logits.dim(), (batch, CLASSES));
        }
    }

    #[test]
    fn inference_mode_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = Classifier::new(&mut rng);
        let images = Array2::from_elem((4, IMAGE_PIXELS), 0.3);
        let first = model.forward(images.view(), Mode::Infer, &mut rng);
        let second = model.forward(images.view(), Mode::Infer, &mut rng);
        assert_eq!(first, second);
    }

    #[test]
    fn dropout_mask_zeroes_and_rescales() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = Classifier::new(&mut rng);
        let images = Array2::from_elem((8, IMAGE_PIXELS), 0.3);
        let cache = model.forward_train(images.view(), &mut rng);

        let total = cache.mask.len() as f64;
        let dropped = cache.mask.iter().filter(|&&m| m == 0.0).count() as f64;
        // Every surviving entry carries the exact 1/0.8 rescale, and the
        // dropped fraction is near the configured rate.
        assert!(
            cache
                .mask
                .iter()
                .all(|&m| m == 0.0 || (m - 1.0 / 0.8).abs() < 1e-12)
        );
        assert!((dropped / total - DROPOUT_RATE).abs() < 0.05);
    }

    #[test]
    fn predict_proba_matches_softmax_of_logits() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = Classifier::new(&mut rng);
        let images = Array2::from_elem((2, IMAGE_PIXELS), 0.1);
        let expected = softmax(&model.logits(images.view()));
        assert_eq!(model.predict_proba(images.view()), expected);
    }
}
