//! Structured model bundles
//!
//! A structured bundle is a directory holding an `MLmodel` descriptor next to
//! the serialized model. The descriptor names the model file through its
//! flavors and may carry a signature whose input schema fixes column order
//! and types.

use crate::fetcher::safe_join;
use crate::format::{ModelFile, SerializedFormat};
use modelgate_core::{Error, FeatureRow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of the bundle descriptor
pub const DESCRIPTOR_FILE: &str = "MLmodel";

/// Parsed `MLmodel` descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub artifact_path: Option<String>,

    #[serde(default)]
    pub run_id: Option<String>,

    #[serde(default)]
    pub model_uuid: Option<String>,

    #[serde(default)]
    pub mlflow_version: Option<String>,

    /// Flavor name to flavor-specific settings
    #[serde(default)]
    pub flavors: HashMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub signature: Option<Signature>,
}

/// Model signature; schemas are JSON documents embedded as strings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub inputs: Option<String>,

    #[serde(default)]
    pub outputs: Option<String>,
}

impl ModelDescriptor {
    /// Read the descriptor in `dir`, if there is one
    pub fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Self::parse(&contents).map(Some)
    }

    /// Parse descriptor YAML
    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::load(format!("Invalid {} descriptor: {}", DESCRIPTOR_FILE, e)))
    }

    fn flavor_str(&self, flavor: &str, key: &str) -> Option<&str> {
        self.flavors.get(flavor)?.get(key)?.as_str()
    }

    /// Locate the serialized model file inside the bundle at `dir`
    pub fn model_file(&self, dir: &Path) -> Result<ModelFile> {
        let relative = self
            .flavor_str("python_function", "model_path")
            .or_else(|| self.flavor_str("sklearn", "pickled_model"))
            .ok_or_else(|| {
                Error::unsupported_format(format!(
                    "{} in {} names no model file",
                    DESCRIPTOR_FILE,
                    dir.display()
                ))
            })?;
        let path: PathBuf = safe_join(dir, relative).map_err(|_| {
            Error::load(format!(
                "model path '{}' in {} leaves the bundle",
                relative, DESCRIPTOR_FILE
            ))
        })?;

        if !path.is_file() {
            return Err(Error::unsupported_format(format!(
                "model file {} named by {} is missing",
                path.display(),
                DESCRIPTOR_FILE
            )));
        }

        if let Some(file) = ModelFile::detect(&path) {
            return Ok(file);
        }

        // Fall back to the flavor's declared serialization
        match self.flavor_str("sklearn", "serialization_format") {
            Some("pickle") | Some("cloudpickle") => Ok(ModelFile {
                path,
                format: SerializedFormat::Pickle,
                gzipped: false,
            }),
            other => Err(Error::unsupported_format(format!(
                "cannot determine serialization of {} (declared: {})",
                path.display(),
                other.unwrap_or("none")
            ))),
        }
    }

    /// Column-based input schema from the signature
    ///
    /// Tensor-based signatures (columns without names) yield `None`.
    pub fn input_schema(&self) -> Result<Option<InputSchema>> {
        let Some(inputs) = self.signature.as_ref().and_then(|s| s.inputs.as_deref()) else {
            return Ok(None);
        };

        let columns: Vec<ColumnSpec> = serde_json::from_str(inputs)
            .map_err(|e| Error::load(format!("Invalid signature inputs: {}", e)))?;
        if columns.is_empty() || columns.iter().any(|c| c.name.is_none()) {
            return Ok(None);
        }
        if let Some(column) = columns.iter().find(|c| c.column_type().is_none()) {
            return Err(Error::unsupported_format(format!(
                "input column {:?} has non-numeric type '{}'",
                column.name.as_deref().unwrap_or_default(),
                column.type_name
            )));
        }

        Ok(Some(InputSchema { columns }))
    }
}

/// Logical column types that can feed a numeric estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Double,
    Float,
    Long,
    Integer,
    Boolean,
}

/// One column of a signature's input schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ColumnSpec {
    /// Create a required column
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            type_name: type_name.into(),
            required: true,
        }
    }

    /// Mark the column optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Numeric type of the column, `None` for types an estimator cannot take
    pub fn column_type(&self) -> Option<ColumnType> {
        match self.type_name.as_str() {
            "double" => Some(ColumnType::Double),
            "float" => Some(ColumnType::Float),
            "long" => Some(ColumnType::Long),
            "integer" => Some(ColumnType::Integer),
            "boolean" => Some(ColumnType::Boolean),
            _ => None,
        }
    }
}

/// Ordered, typed input columns a structured model expects
#[derive(Debug, Clone)]
pub struct InputSchema {
    columns: Vec<ColumnSpec>,
}

impl InputSchema {
    /// Build a schema from column specs
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Column names in model order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter_map(|c| c.name.as_deref())
    }

    /// Shape a feature row into model column order
    ///
    /// Extra features are ignored. Missing optional columns become NaN.
    pub fn shape_row(&self, row: &FeatureRow) -> Result<Vec<f64>> {
        self.columns
            .iter()
            .map(|column| {
                let name = column.name.as_deref().unwrap_or_default();
                match row.get(name) {
                    Some(value) => coerce(name, column.column_type(), value),
                    None if column.required => Err(Error::invalid_input(format!(
                        "missing required feature '{}'",
                        name
                    ))),
                    None => Ok(f64::NAN),
                }
            })
            .collect()
    }
}

fn coerce(name: &str, column_type: Option<ColumnType>, value: &serde_json::Value) -> Result<f64> {
    let mismatch = |expected: &str| {
        Error::invalid_input(format!(
            "feature '{}' must be {}, got {}",
            name, expected, value
        ))
    };

    match column_type {
        Some(ColumnType::Double) | Some(ColumnType::Float) => {
            value.as_f64().ok_or_else(|| mismatch("a number"))
        }
        Some(ColumnType::Long) | Some(ColumnType::Integer) => value
            .as_i64()
            .map(|v| v as f64)
            .or_else(|| value.as_f64().filter(|v| v.fract() == 0.0))
            .ok_or_else(|| mismatch("an integer")),
        Some(ColumnType::Boolean) => value
            .as_bool()
            .map(|b| if b { 1.0 } else { 0.0 })
            .ok_or_else(|| mismatch("a boolean")),
        None => Err(mismatch("numeric")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const IRIS_DESCRIPTOR: &str = r#"
artifact_path: model
flavors:
  python_function:
    env:
      conda: conda.yaml
    loader_module: mlflow.sklearn
    model_path: model.pkl
    predict_fn: predict
    python_version: 3.10.12
  sklearn:
    code: null
    pickled_model: model.pkl
    serialization_format: cloudpickle
    sklearn_version: 1.3.0
mlflow_version: 2.8.0
model_uuid: 6a1b2c
run_id: 0f9e8d
signature:
  inputs: '[{"type": "double", "name": "sepal length (cm)", "required": true}, {"type":
    "double", "name": "sepal width (cm)", "required": true}, {"type": "double", "name":
    "petal length (cm)", "required": true}, {"type": "double", "name": "petal width (cm)",
    "required": true}]'
  outputs: '[{"type": "tensor", "tensor-spec": {"dtype": "int64", "shape": [-1]}}]'
"#;

    fn row(value: serde_json::Value) -> FeatureRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_descriptor_and_schema() {
        let descriptor = ModelDescriptor::parse(IRIS_DESCRIPTOR).unwrap();
        assert_eq!(descriptor.artifact_path.as_deref(), Some("model"));
        assert_eq!(descriptor.run_id.as_deref(), Some("0f9e8d"));

        let schema = descriptor.input_schema().unwrap().unwrap();
        let names: Vec<_> = schema.names().collect();
        assert_eq!(
            names,
            vec![
                "sepal length (cm)",
                "sepal width (cm)",
                "petal length (cm)",
                "petal width (cm)"
            ]
        );
    }

    #[test]
    fn test_model_file_from_flavors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.pkl"), b"").unwrap();

        let descriptor = ModelDescriptor::parse(IRIS_DESCRIPTOR).unwrap();
        let file = descriptor.model_file(dir.path()).unwrap();
        assert_eq!(file.path, dir.path().join("model.pkl"));
        assert_eq!(file.format, SerializedFormat::Pickle);
    }

    #[test]
    fn test_model_file_falls_back_to_declared_serialization() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("estimator"), b"").unwrap();

        let descriptor = ModelDescriptor::parse(
            "flavors:\n  sklearn:\n    pickled_model: estimator\n    serialization_format: pickle\n",
        )
        .unwrap();
        let file = descriptor.model_file(dir.path()).unwrap();
        assert_eq!(file.path, dir.path().join("estimator"));
    }

    #[test]
    fn test_model_file_missing_or_unnamed() {
        let dir = tempfile::tempdir().unwrap();

        let descriptor = ModelDescriptor::parse(IRIS_DESCRIPTOR).unwrap();
        assert!(matches!(
            descriptor.model_file(dir.path()),
            Err(Error::UnsupportedFormat(_))
        ));

        let bare = ModelDescriptor::parse("flavors: {}\n").unwrap();
        assert!(matches!(
            bare.model_file(dir.path()),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_model_file_must_stay_inside_bundle() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("bundle");
        std::fs::create_dir(&bundle).unwrap();
        std::fs::write(root.path().join("escape.pkl"), b"").unwrap();

        for path in ["../escape.pkl", "/etc/passwd", "nested/../../escape.pkl"] {
            let descriptor = ModelDescriptor::parse(&format!(
                "flavors:\n  python_function:\n    model_path: {}\n",
                path
            ))
            .unwrap();
            let result = descriptor.model_file(&bundle);
            assert!(matches!(result, Err(Error::Load(_))), "{}", path);
        }
    }

    #[test]
    fn test_read_from_without_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelDescriptor::read_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_tensor_signature_has_no_column_schema() {
        let descriptor = ModelDescriptor::parse(
            r#"
signature:
  inputs: '[{"type": "tensor", "tensor-spec": {"dtype": "float64", "shape": [-1, 4]}}]'
"#,
        )
        .unwrap();
        assert!(descriptor.input_schema().unwrap().is_none());
    }

    #[test]
    fn test_string_column_is_unsupported() {
        let descriptor = ModelDescriptor::parse(
            r#"
signature:
  inputs: '[{"type": "string", "name": "species"}]'
"#,
        )
        .unwrap();
        assert!(matches!(
            descriptor.input_schema(),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_shape_row_orders_and_ignores_extras() {
        let schema = InputSchema::new(vec![
            ColumnSpec::new("b", "double"),
            ColumnSpec::new("a", "long"),
            ColumnSpec::new("flag", "boolean"),
        ]);

        let shaped = schema
            .shape_row(&row(json!({"a": 3, "flag": true, "b": 0.5, "extra": "ignored"})))
            .unwrap();
        assert_eq!(shaped, vec![0.5, 3.0, 1.0]);
    }

    #[test]
    fn test_shape_row_rejects_bad_input() {
        let schema = InputSchema::new(vec![
            ColumnSpec::new("a", "double"),
            ColumnSpec::new("n", "integer"),
        ]);

        let missing = schema.shape_row(&row(json!({"n": 1})));
        assert!(matches!(missing, Err(Error::InvalidInput(_))));

        let text = schema.shape_row(&row(json!({"a": "wide", "n": 1})));
        assert!(matches!(text, Err(Error::InvalidInput(_))));

        let fractional = schema.shape_row(&row(json!({"a": 1.0, "n": 1.5})));
        assert!(matches!(fractional, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_optional_column_becomes_nan() {
        let schema = InputSchema::new(vec![ColumnSpec::new("a", "double").optional()]);
        let shaped = schema.shape_row(&FeatureRow::new()).unwrap();
        assert!(shaped[0].is_nan());
    }
}
