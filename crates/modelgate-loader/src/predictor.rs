//! Predictor trait and the two predictor variants

use crate::descriptor::InputSchema;
use crate::estimator::Estimator;
use modelgate_core::{Error, FeatureRow, Label, Result};

/// Anything that turns feature rows into predictions
pub trait Predictor: Send + Sync {
    /// Predict one label per row
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<Label>>;

    /// Short description of the underlying model
    fn name(&self) -> &str;

    /// How the predictor was loaded
    fn kind(&self) -> PredictorKind;
}

/// Predictor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    /// Self-describing bundle with its own input schema
    Structured,
    /// Bare deserialized estimator
    Raw,
}

impl PredictorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorKind::Structured => "structured",
            PredictorKind::Raw => "raw",
        }
    }
}

/// Predictor loaded from a model bundle descriptor
#[derive(Debug)]
pub struct StructuredPredictor {
    estimator: Estimator,
    schema: Option<InputSchema>,
}

impl StructuredPredictor {
    /// Create a structured predictor
    ///
    /// Without a column schema, rows are shaped like a raw predictor's.
    pub fn new(estimator: Estimator, schema: Option<InputSchema>) -> Self {
        Self { estimator, schema }
    }

    /// Input schema from the descriptor signature
    pub fn schema(&self) -> Option<&InputSchema> {
        self.schema.as_ref()
    }
}

impl Predictor for StructuredPredictor {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<Label>> {
        let shaped = match &self.schema {
            Some(schema) => rows
                .iter()
                .map(|row| schema.shape_row(row))
                .collect::<Result<Vec<_>>>()?,
            None => shape_rows(&self.estimator, rows)?,
        };
        self.estimator.predict(&shaped)
    }

    fn name(&self) -> &str {
        self.estimator.kind_name()
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Structured
    }
}

/// Bare estimator wrapped to expose the predictor interface
#[derive(Debug)]
pub struct RawPredictor {
    estimator: Estimator,
}

impl RawPredictor {
    pub fn new(estimator: Estimator) -> Self {
        Self { estimator }
    }

    /// The wrapped estimator
    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }
}

impl Predictor for RawPredictor {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<Label>> {
        let shaped = shape_rows(&self.estimator, rows)?;
        self.estimator.predict(&shaped)
    }

    fn name(&self) -> &str {
        self.estimator.kind_name()
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Raw
    }
}

/// Order rows by the estimator's feature names, or keep payload order
fn shape_rows(estimator: &Estimator, rows: &[FeatureRow]) -> Result<Vec<Vec<f64>>> {
    rows.iter()
        .map(|row| match &estimator.feature_names {
            Some(names) => names
                .iter()
                .map(|name| {
                    let value = row.get(name).ok_or_else(|| {
                        Error::invalid_input(format!("missing required feature '{}'", name))
                    })?;
                    numeric(name, value)
                })
                .collect(),
            None => row.iter().map(|(name, value)| numeric(name, value)).collect(),
        })
        .collect()
}

fn numeric(name: &str, value: &serde_json::Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        Error::invalid_input(format!("feature '{}' must be a number, got {}", name, value))
    })
}
