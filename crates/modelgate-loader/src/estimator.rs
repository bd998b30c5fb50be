//! Deserialized statistical models
//!
//! Estimators are plain data: the tree arrays and coefficient vectors a
//! scikit-learn style model exposes, serialized as nested dicts and lists.
//! Trees use the array layout (`children_left`, `children_right`, `feature`,
//! `threshold`, `value`) where a child index of `-1` marks a leaf and
//! traversal goes left when `x[feature] <= threshold`.

use modelgate_core::{Error, Label, Result};
use serde::{Deserialize, Serialize};

/// Sentinel child index marking a leaf
const LEAF: i64 = -1;

/// A binary decision tree in array layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Per-node output: class counts/fractions, or a single regression value
    pub value: Vec<Vec<f64>>,
}

impl Tree {
    fn node_count(&self) -> usize {
        self.children_left.len()
    }

    fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] == LEAF
    }

    /// Highest feature index any split reads, plus one
    fn required_width(&self) -> usize {
        (0..self.node_count())
            .filter(|&node| !self.is_leaf(node))
            .map(|node| self.feature[node] as usize + 1)
            .max()
            .unwrap_or(0)
    }

    fn validate(&self, output_width: usize) -> Result<()> {
        let n = self.node_count();
        if n == 0 {
            return Err(Error::load("tree has no nodes"));
        }
        if [
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
            self.value.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err(Error::load("tree arrays have mismatched lengths"));
        }

        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF || right == LEAF {
                if left != right {
                    return Err(Error::load(format!("node {} has exactly one child", node)));
                }
                if self.value[node].len() != output_width {
                    return Err(Error::load(format!(
                        "leaf {} has {} outputs, expected {}",
                        node,
                        self.value[node].len(),
                        output_width
                    )));
                }
                continue;
            }
            // Children always follow their parent, so traversal terminates
            let in_range = |child: i64| child > node as i64 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(Error::load(format!("node {} has out-of-order children", node)));
            }
            if self.feature[node] < 0 {
                return Err(Error::load(format!("node {} splits on a negative feature", node)));
            }
        }
        Ok(())
    }

    /// Output vector of the leaf `row` falls into
    fn leaf_value(&self, row: &[f64]) -> &[f64] {
        let mut node = 0usize;
        while !self.is_leaf(node) {
            let x = row[self.feature[node] as usize];
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        &self.value[node]
    }
}

/// Model family and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "estimator", rename_all = "snake_case")]
pub enum EstimatorKind {
    DecisionTreeClassifier { classes: Vec<Label>, tree: Tree },
    DecisionTreeRegressor { tree: Tree },
    RandomForestClassifier { classes: Vec<Label>, estimators: Vec<Tree> },
    RandomForestRegressor { estimators: Vec<Tree> },
    LogisticRegression { classes: Vec<Label>, coef: Vec<Vec<f64>>, intercept: Vec<f64> },
    LinearRegression { coef: Vec<f64>, intercept: f64 },
}

/// A deserialized estimator with its own inference method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimator {
    /// Column names seen at fit time, in training order
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,

    #[serde(flatten)]
    pub kind: EstimatorKind,
}

impl Estimator {
    /// Wrap a model without recorded feature names
    pub fn new(kind: EstimatorKind) -> Self {
        Self {
            feature_names: None,
            kind,
        }
    }

    /// Attach training-time feature names
    pub fn with_feature_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Short name of the model family
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EstimatorKind::DecisionTreeClassifier { .. } => "decision_tree_classifier",
            EstimatorKind::DecisionTreeRegressor { .. } => "decision_tree_regressor",
            EstimatorKind::RandomForestClassifier { .. } => "random_forest_classifier",
            EstimatorKind::RandomForestRegressor { .. } => "random_forest_regressor",
            EstimatorKind::LogisticRegression { .. } => "logistic_regression",
            EstimatorKind::LinearRegression { .. } => "linear_regression",
        }
    }

    /// Minimum number of columns an input row must have
    pub fn required_width(&self) -> usize {
        let named_width = self.feature_names.as_ref().map_or(0, Vec::len);
        self.model_width().max(named_width)
    }

    /// Number of columns the model parameters read
    fn model_width(&self) -> usize {
        match &self.kind {
            EstimatorKind::DecisionTreeClassifier { tree, .. }
            | EstimatorKind::DecisionTreeRegressor { tree } => tree.required_width(),
            EstimatorKind::RandomForestClassifier { estimators, .. }
            | EstimatorKind::RandomForestRegressor { estimators } => estimators
                .iter()
                .map(Tree::required_width)
                .max()
                .unwrap_or(0),
            EstimatorKind::LogisticRegression { coef, .. } => coef.first().map_or(0, Vec::len),
            EstimatorKind::LinearRegression { coef, .. } => coef.len(),
        }
    }

    /// Check internal consistency after deserialization
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            EstimatorKind::DecisionTreeClassifier { classes, tree } => {
                non_empty_classes(classes)?;
                tree.validate(classes.len())?;
            }
            EstimatorKind::DecisionTreeRegressor { tree } => tree.validate(1)?,
            EstimatorKind::RandomForestClassifier { classes, estimators } => {
                non_empty_classes(classes)?;
                if estimators.is_empty() {
                    return Err(Error::load("random forest has no trees"));
                }
                for tree in estimators {
                    tree.validate(classes.len())?;
                }
            }
            EstimatorKind::RandomForestRegressor { estimators } => {
                if estimators.is_empty() {
                    return Err(Error::load("random forest has no trees"));
                }
                for tree in estimators {
                    tree.validate(1)?;
                }
            }
            EstimatorKind::LogisticRegression {
                classes,
                coef,
                intercept,
            } => {
                non_empty_classes(classes)?;
                // One row scores the positive class of a binary model,
                // otherwise there is one row per class
                let consistent = if coef.len() == 1 {
                    classes.len() == 2
                } else {
                    coef.len() == classes.len() && classes.len() >= 2
                };
                if !consistent {
                    return Err(Error::load(format!(
                        "{} coefficient rows for {} classes",
                        coef.len(),
                        classes.len()
                    )));
                }
                if intercept.len() != coef.len() {
                    return Err(Error::load("intercept length differs from coefficient rows"));
                }
                let width = coef.first().map_or(0, Vec::len);
                if coef.iter().any(|row| row.len() != width) {
                    return Err(Error::load("ragged coefficient matrix"));
                }
            }
            EstimatorKind::LinearRegression { .. } => {}
        }

        if let Some(names) = &self.feature_names {
            if names.len() < self.model_width() {
                return Err(Error::load(format!(
                    "{} feature names for a model reading {} columns",
                    names.len(),
                    self.model_width()
                )));
            }
        }
        Ok(())
    }

    /// Predict one label per row
    ///
    /// Rows must already be ordered to match the training columns.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Label>> {
        let width = self.required_width();
        if let Some(short) = rows.iter().find(|row| row.len() < width) {
            return Err(Error::invalid_input(format!(
                "row has {} features, model expects {}",
                short.len(),
                width
            )));
        }

        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    fn predict_row(&self, row: &[f64]) -> Result<Label> {
        let label = match &self.kind {
            EstimatorKind::DecisionTreeClassifier { classes, tree } => {
                class_at(classes, argmax(tree.leaf_value(row)))?
            }
            EstimatorKind::DecisionTreeRegressor { tree } => Label::Float(first(tree.leaf_value(row))?),
            EstimatorKind::RandomForestClassifier {
                classes,
                estimators,
            } => {
                // Average of per-tree class distributions
                let mut proba = vec![0.0; classes.len()];
                for tree in estimators {
                    let leaf = tree.leaf_value(row);
                    let total: f64 = leaf.iter().sum();
                    for (p, v) in proba.iter_mut().zip(leaf) {
                        *p += if total > 0.0 { v / total } else { 0.0 };
                    }
                }
                class_at(classes, argmax(&proba))?
            }
            EstimatorKind::RandomForestRegressor { estimators } => {
                let mut sum = 0.0;
                for tree in estimators {
                    sum += first(tree.leaf_value(row))?;
                }
                Label::Float(sum / estimators.len().max(1) as f64)
            }
            EstimatorKind::LogisticRegression {
                classes,
                coef,
                intercept,
            } => {
                let scores: Vec<f64> = coef
                    .iter()
                    .zip(intercept)
                    .map(|(weights, bias)| dot(weights, row) + bias)
                    .collect();
                match scores.as_slice() {
                    [score] => class_at(classes, usize::from(*score > 0.0))?,
                    _ => class_at(classes, argmax(&scores))?,
                }
            }
            EstimatorKind::LinearRegression { coef, intercept } => {
                Label::Float(dot(coef, row) + intercept)
            }
        };
        Ok(label)
    }
}

fn class_at(classes: &[Label], index: usize) -> Result<Label> {
    classes.get(index).cloned().ok_or_else(|| {
        Error::internal(format!(
            "model selected class {} of {}",
            index,
            classes.len()
        ))
    })
}

fn first(values: &[f64]) -> Result<f64> {
    values
        .first()
        .copied()
        .ok_or_else(|| Error::internal("regression leaf has no value"))
}

fn non_empty_classes(classes: &[Label]) -> Result<()> {
    if classes.is_empty() {
        return Err(Error::load("classifier has no classes"));
    }
    Ok(())
}

fn dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(row).map(|(w, x)| w * x).sum()
}

/// Index of the first maximum
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// petal length <= 2.45 -> setosa, else petal width <= 1.75 -> versicolor, else virginica
    fn iris_tree() -> Tree {
        Tree {
            children_left: vec![1, -1, 3, -1, -1],
            children_right: vec![2, -1, 4, -1, -1],
            feature: vec![2, -2, 3, -2, -2],
            threshold: vec![2.45, -2.0, 1.75, -2.0, -2.0],
            value: vec![
                vec![50.0, 50.0, 50.0],
                vec![50.0, 0.0, 0.0],
                vec![0.0, 50.0, 50.0],
                vec![0.0, 49.0, 5.0],
                vec![0.0, 1.0, 45.0],
            ],
        }
    }

    fn iris_classes() -> Vec<Label> {
        vec![Label::Int(0), Label::Int(1), Label::Int(2)]
    }

    #[test]
    fn test_decision_tree_classifier() {
        let model = Estimator::new(EstimatorKind::DecisionTreeClassifier {
            classes: iris_classes(),
            tree: iris_tree(),
        });
        model.validate().unwrap();

        let rows = vec![
            vec![5.1, 3.5, 1.4, 0.2],
            vec![6.0, 2.9, 4.5, 1.5],
            vec![6.7, 3.0, 5.2, 2.3],
        ];
        let labels = model.predict(&rows).unwrap();
        assert_eq!(labels, vec![Label::Int(0), Label::Int(1), Label::Int(2)]);
    }

    #[test]
    fn test_random_forest_averages_distributions() {
        // Second tree always votes class 2 with low confidence
        let stump = Tree {
            children_left: vec![-1],
            children_right: vec![-1],
            feature: vec![-2],
            threshold: vec![-2.0],
            value: vec![vec![0.3, 0.3, 0.4]],
        };
        let model = Estimator::new(EstimatorKind::RandomForestClassifier {
            classes: iris_classes(),
            estimators: vec![iris_tree(), stump],
        });
        model.validate().unwrap();

        // (1.0 + 0.3) / 2 for class 0 beats 0.4 / 2 for class 2
        let labels = model.predict(&[vec![5.1, 3.5, 1.4, 0.2]]).unwrap();
        assert_eq!(labels, vec![Label::Int(0)]);
    }

    #[test]
    fn test_logistic_regression_binary_and_multiclass() {
        let binary = Estimator::new(EstimatorKind::LogisticRegression {
            classes: vec![Label::from("no"), Label::from("yes")],
            coef: vec![vec![1.0, -1.0]],
            intercept: vec![0.0],
        });
        binary.validate().unwrap();
        assert_eq!(
            binary.predict(&[vec![2.0, 1.0], vec![1.0, 2.0]]).unwrap(),
            vec![Label::from("yes"), Label::from("no")]
        );

        let multi = Estimator::new(EstimatorKind::LogisticRegression {
            classes: iris_classes(),
            coef: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
            intercept: vec![0.0, 0.0, 0.0],
        });
        multi.validate().unwrap();
        assert_eq!(multi.predict(&[vec![0.2, 3.0]]).unwrap(), vec![Label::Int(1)]);
    }

    #[test]
    fn test_logistic_regression_class_count_must_match() {
        let single_class = Estimator::new(EstimatorKind::LogisticRegression {
            classes: vec![Label::Int(7)],
            coef: vec![vec![1.0]],
            intercept: vec![0.0],
        });
        assert!(matches!(single_class.validate(), Err(Error::Load(_))));

        let three_rows_two_classes = Estimator::new(EstimatorKind::LogisticRegression {
            classes: vec![Label::Int(0), Label::Int(1)],
            coef: vec![vec![1.0], vec![0.0], vec![-1.0]],
            intercept: vec![0.0, 0.0, 0.0],
        });
        assert!(three_rows_two_classes.validate().is_err());
    }

    #[test]
    fn test_unvalidated_model_errors_instead_of_panicking() {
        let model = Estimator::new(EstimatorKind::LogisticRegression {
            classes: vec![Label::Int(7)],
            coef: vec![vec![1.0]],
            intercept: vec![0.0],
        });
        let err = model.predict(&[vec![2.0]]).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_regressors() {
        let linear = Estimator::new(EstimatorKind::LinearRegression {
            coef: vec![2.0, 0.5],
            intercept: 1.0,
        });
        assert_eq!(linear.predict(&[vec![1.0, 2.0]]).unwrap(), vec![Label::Float(4.0)]);

        let leaf = |v: f64| Tree {
            children_left: vec![-1],
            children_right: vec![-1],
            feature: vec![-2],
            threshold: vec![-2.0],
            value: vec![vec![v]],
        };
        let forest = Estimator::new(EstimatorKind::RandomForestRegressor {
            estimators: vec![leaf(1.0), leaf(3.0)],
        });
        forest.validate().unwrap();
        assert_eq!(forest.predict(&[vec![]]).unwrap(), vec![Label::Float(2.0)]);
    }

    #[test]
    fn test_short_row_is_invalid_input() {
        let model = Estimator::new(EstimatorKind::DecisionTreeClassifier {
            classes: iris_classes(),
            tree: iris_tree(),
        });
        assert_eq!(model.required_width(), 4);
        let err = model.predict(&[vec![5.1, 3.5]]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_validate_rejects_cyclic_tree() {
        let mut tree = iris_tree();
        tree.children_left[2] = 0;
        let model = Estimator::new(EstimatorKind::DecisionTreeClassifier {
            classes: iris_classes(),
            tree,
        });
        assert!(matches!(model.validate(), Err(Error::Load(_))));
    }

    #[test]
    fn test_validate_rejects_leaf_width_mismatch() {
        let model = Estimator::new(EstimatorKind::DecisionTreeClassifier {
            classes: vec![Label::Int(0), Label::Int(1)],
            tree: iris_tree(),
        });
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_estimator_json_shape() {
        let json = r#"{
            "estimator": "linear_regression",
            "feature_names": ["x0", "x1"],
            "coef": [1, 2],
            "intercept": 0.5
        }"#;
        let model: Estimator = serde_json::from_str(json).unwrap();
        assert_eq!(model.kind_name(), "linear_regression");
        assert_eq!(model.feature_names.as_deref().unwrap().len(), 2);
        model.validate().unwrap();
    }
}
