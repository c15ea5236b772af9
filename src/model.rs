use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum ModelError {
    EmptyTrainingSet,
    SingleClass,
    ColumnMismatch { expected: usize, got: usize },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelError::EmptyTrainingSet => write!(f, "empty training set"),
            ModelError::SingleClass => write!(f, "training labels contain a single class"),
            ModelError::ColumnMismatch { expected, got } => {
                write!(f, "feature column mismatch: expected {}, got {}", expected, got)
            }
        }
    }
}

impl Error for ModelError {}

/// A fitted binary classifier. `predict` returns the label for one feature
/// row together with the probability of the positive class.
pub trait FittedModel: Send + Sync {
    fn predict(&self, row: &[f64]) -> (u8, f64);
}

/// Pluggable classification capability. Fitting with fewer than two label
/// classes is an error; callers are expected to pre-check and fall back.
pub trait Classifier: Send + Sync {
    fn fit(
        &self,
        features: &[Vec<f64>],
        labels: &[u8],
    ) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// Batch-gradient logistic regression. Weights start at zero and the
/// epoch count and learning rate are fixed, so a fit on identical window
/// data is bit-identical across runs.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
        }
    }
}

struct LogisticFit {
    weights: Vec<f64>,
    bias: f64,
    col_means: Vec<f64>,
    col_stds: Vec<f64>,
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

impl LogisticFit {
    fn standardized(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.col_means.iter().zip(self.col_stds.iter()))
            .map(|(v, (m, s))| if *s < 1e-12 { 0.0 } else { (v - m) / s })
            .collect()
    }
}

impl FittedModel for LogisticFit {
    fn predict(&self, row: &[f64]) -> (u8, f64) {
        let z = self.standardized(row);
        let score = self.bias
            + z.iter()
                .zip(self.weights.iter())
                .map(|(v, w)| v * w)
                .sum::<f64>();
        let p = sigmoid(score);
        (u8::from(p >= 0.5), p)
    }
}

impl Classifier for LogisticRegression {
    fn fit(
        &self,
        features: &[Vec<f64>],
        labels: &[u8],
    ) -> Result<Box<dyn FittedModel>, ModelError> {
        if features.is_empty() || labels.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let positives = labels.iter().filter(|&&l| l == 1).count();
        if positives == 0 || positives == labels.len() {
            return Err(ModelError::SingleClass);
        }
        let cols = features[0].len();
        for row in features {
            if row.len() != cols {
                return Err(ModelError::ColumnMismatch {
                    expected: cols,
                    got: row.len(),
                });
            }
        }

        let n = features.len() as f64;
        let mut col_means = vec![0.0; cols];
        let mut col_stds = vec![0.0; cols];
        for c in 0..cols {
            let mean = features.iter().map(|r| r[c]).sum::<f64>() / n;
            let var = features.iter().map(|r| (r[c] - mean).powi(2)).sum::<f64>() / n;
            col_means[c] = mean;
            col_stds[c] = var.sqrt();
        }
        let standardized: Vec<Vec<f64>> = features
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(c, v)| {
                        if col_stds[c] < 1e-12 {
                            0.0
                        } else {
                            (v - col_means[c]) / col_stds[c]
                        }
                    })
                    .collect()
            })
            .collect();

        let mut weights = vec![0.0; cols];
        let mut bias = 0.0;
        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; cols];
            let mut grad_b = 0.0;
            for (row, &label) in standardized.iter().zip(labels.iter()) {
                let score = bias
                    + row
                        .iter()
                        .zip(weights.iter())
                        .map(|(v, w)| v * w)
                        .sum::<f64>();
                let err = sigmoid(score) - f64::from(label);
                for c in 0..cols {
                    grad_w[c] += err * row[c];
                }
                grad_b += err;
            }
            for c in 0..cols {
                weights[c] -= self.learning_rate * grad_w[c] / n;
            }
            bias -= self.learning_rate * grad_b / n;
        }

        Ok(Box::new(LogisticFit {
            weights,
            bias,
            col_means,
            col_stds,
        }))
    }
}
