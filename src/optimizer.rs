use crate::network::Classifier;
use ndarray::{Array, Array1, Array2, Dimension, Zip};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// Mini-batch-averaged gradients of the loss with respect to every model
/// parameter, in the same shapes as the parameters themselves.
pub struct Gradients {
    pub w1: Array2<f64>,
    pub b1: Array1<f64>,
    pub w2: Array2<f64>,
    pub b2: Array1<f64>,
}

/// Moving averages of the gradient (first moment) and squared gradient
/// (second moment) for one parameter tensor. Both start at zero.
pub struct Moments<D: Dimension> {
    first: Array<f64, D>,
    second: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros_like(parameter: &Array<f64, D>) -> Moments<D> {
        Moments {
            first: Array::zeros(parameter.raw_dim()),
            second: Array::zeros(parameter.raw_dim()),
        }
    }

    /// One Adam update: fold the gradient into both moving averages, correct
    /// for their zero initialization bias, and move the parameter against
    /// the corrected first moment scaled by the corrected second moment.
    fn apply(
        &mut self,
        parameter: &mut Array<f64, D>,
        gradient: &Array<f64, D>,
        learning_rate: f64,
        step: i32,
    ) {
        self.first
            .zip_mut_with(gradient, |m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
        self.second
            .zip_mut_with(gradient, |v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);

        let first_correction = 1.0 - BETA1.powi(step);
        let second_correction = 1.0 - BETA2.powi(step);

        Zip::from(parameter)
            .and(&self.first)
            .and(&self.second)
            .for_each(|p, &m, &v| {
                let m_hat = m / first_correction;
                let v_hat = v / second_correction;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
            });
    }
}

/// Adam optimizer state for the whole classifier: one pair of moment
/// estimates per parameter tensor plus a shared step counter.
pub struct Adam {
    learning_rate: f64,
    step: i32,
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix2>,
    b2: Moments<ndarray::Ix1>,
}

impl Adam {
    pub fn new(learning_rate: f64, model: &Classifier) -> Adam {
        Adam {
            learning_rate,
            step: 0,
            w1: Moments::zeros_like(&model.w1),
            b1: Moments::zeros_like(&model.b1),
            w2: Moments::zeros_like(&model.w2),
            b2: Moments::zeros_like(&model.b2),
        }
    }

    /// Applies one gradient update to every parameter of the model. Each
    /// call strictly depends on the parameter state left by the previous
    /// one.
    pub fn step(&mut self, model: &mut Classifier, gradients: &Gradients) {
        self.step += 1;
        self.w1
            .apply(&mut model.w1, &gradients.w1, self.learning_rate, self.step);
        self.b1
            .apply(&mut model.b1, &gradients.b1, self.learning_rate, self.step);
        self.w2
            .apply(&mut model.w2, &gradients.w2, self.learning_rate, self.step);
        self.b2
            .apply(&mut model.b2, &gradients.b2, self.learning_rate, self.step);
    }
}
