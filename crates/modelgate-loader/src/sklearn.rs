//! scikit-learn estimators pickled as Python objects
//!
//! `joblib.dump` and `mlflow.sklearn.log_model` both pickle the fitted
//! estimator itself. Each estimator is rebuilt from its class and its
//! `__dict__`; fitted trees are `sklearn.tree._tree.Tree` objects whose
//! state holds a structured `nodes` array and a `values` array of shape
//! `(node_count, n_outputs, max_n_classes)`.

use crate::estimator::{Estimator, EstimatorKind, Tree};
use crate::pickle::numpy::Scalar;
use crate::pickle::{NdArray, Pickle, Ref};
use modelgate_core::{Error, Label, Result};

/// Convert the estimator object at `obj`
pub fn decode(p: &Pickle, obj: Ref) -> Result<Estimator> {
    let (module, class) = p
        .class_of(obj)
        .ok_or_else(|| Error::unsupported_format("pickle does not hold an estimator object"))?;
    if module != "sklearn" && !module.starts_with("sklearn.") {
        return Err(Error::unsupported_format(format!(
            "{}.{} is not a scikit-learn estimator",
            module, class
        )));
    }

    let kind = match class {
        "DecisionTreeClassifier" | "ExtraTreeClassifier" => {
            single_output(p, obj)?;
            EstimatorKind::DecisionTreeClassifier {
                classes: classes(p, obj)?,
                tree: tree(p, field(p, obj, "tree_")?)?,
            }
        }
        "DecisionTreeRegressor" | "ExtraTreeRegressor" => {
            single_output(p, obj)?;
            EstimatorKind::DecisionTreeRegressor {
                tree: tree(p, field(p, obj, "tree_")?)?,
            }
        }
        "RandomForestClassifier" | "ExtraTreesClassifier" => {
            single_output(p, obj)?;
            EstimatorKind::RandomForestClassifier {
                // Member trees are fit on encoded labels, so only the forest's
                // classes_ carries the real ones
                classes: classes(p, obj)?,
                estimators: forest(p, obj)?,
            }
        }
        "RandomForestRegressor" | "ExtraTreesRegressor" => {
            single_output(p, obj)?;
            EstimatorKind::RandomForestRegressor {
                estimators: forest(p, obj)?,
            }
        }
        "LogisticRegression" => {
            let coef = array(p, obj, "coef_")?;
            let [rows, width] = coef.shape[..] else {
                return Err(Error::load("coef_ is not a matrix"));
            };
            let values = coef.to_f64(p)?;
            EstimatorKind::LogisticRegression {
                classes: classes(p, obj)?,
                coef: chunk_rows(&values, rows, width),
                intercept: array(p, obj, "intercept_")?.to_f64(p)?,
            }
        }
        "LinearRegression" => {
            let coef = array(p, obj, "coef_")?;
            if coef.shape.len() > 1 && coef.shape[0] != 1 {
                return Err(Error::unsupported_format(
                    "multi-output LinearRegression is not supported",
                ));
            }
            EstimatorKind::LinearRegression {
                coef: coef.to_f64(p)?,
                intercept: number(p, field(p, obj, "intercept_")?)?,
            }
        }
        other => {
            return Err(Error::unsupported_format(format!(
                "scikit-learn estimator {} is not supported",
                other
            )))
        }
    };

    let mut estimator = Estimator::new(kind);
    if let Some(names) = p.attr(obj, "feature_names_in_") {
        let names = NdArray::from_pickle(p, names)?
            .scalars(p)?
            .into_iter()
            .map(|s| match s {
                Scalar::Text(name) => Ok(name),
                _ => Err(Error::load("feature_names_in_ holds a non-string")),
            })
            .collect::<Result<Vec<_>>>()?;
        estimator = estimator.with_feature_names(names);
    }
    Ok(estimator)
}

fn field(p: &Pickle, obj: Ref, key: &str) -> Result<Ref> {
    p.attr(obj, key).ok_or_else(|| {
        let class = p.class_of(obj).map_or("object", |(_, name)| name);
        Error::load(format!("{} has no {}; was it fitted?", class, key))
    })
}

fn array(p: &Pickle, obj: Ref, key: &str) -> Result<NdArray> {
    NdArray::from_pickle(p, field(p, obj, key)?)
}

fn single_output(p: &Pickle, obj: Ref) -> Result<()> {
    match p.attr(obj, "n_outputs_").and_then(|n| p.as_int(n)) {
        Some(n) if n != 1 => Err(Error::unsupported_format(format!(
            "multi-output estimators are not supported ({} outputs)",
            n
        ))),
        _ => Ok(()),
    }
}

fn classes(p: &Pickle, obj: Ref) -> Result<Vec<Label>> {
    let classes = field(p, obj, "classes_")?;
    if p.items(classes).is_some() {
        // Multi-output classifiers keep one classes_ array per output
        return Err(Error::unsupported_format(
            "multi-output classifiers are not supported",
        ));
    }
    NdArray::from_pickle(p, classes)?
        .scalars(p)?
        .into_iter()
        .map(|s| {
            Ok(match s {
                Scalar::Bool(v) => Label::Int(i64::from(v)),
                Scalar::Int(v) => Label::Int(v),
                Scalar::Float(v) => Label::Float(v),
                Scalar::Text(v) => Label::Text(v),
            })
        })
        .collect()
}

/// Python float or 0-d array
fn number(p: &Pickle, r: Ref) -> Result<f64> {
    if let Some(v) = p.as_float(r) {
        return Ok(v);
    }
    match NdArray::from_pickle(p, r)?.to_f64(p)?.as_slice() {
        [v] => Ok(*v),
        _ => Err(Error::unsupported_format(
            "multi-output LinearRegression is not supported",
        )),
    }
}

fn forest(p: &Pickle, obj: Ref) -> Result<Vec<Tree>> {
    let members = field(p, obj, "estimators_")?;
    let members = p
        .items(members)
        .ok_or_else(|| Error::load("estimators_ is not a list"))?;
    members
        .iter()
        .map(|member| tree(p, field(p, *member, "tree_")?))
        .collect()
}

fn tree(p: &Pickle, r: Ref) -> Result<Tree> {
    match p.class_of(r) {
        Some(("sklearn.tree._tree", "Tree")) => {}
        _ => return Err(Error::load("tree_ is not a fitted sklearn Tree")),
    }

    // Tree(n_features, n_classes, n_outputs)
    let n_outputs = p
        .args(r)
        .and_then(|args| args.get(2))
        .and_then(|n| p.as_int(*n))
        .ok_or_else(|| Error::load("tree is missing n_outputs"))?;
    if n_outputs != 1 {
        return Err(Error::unsupported_format(format!(
            "multi-output trees are not supported ({} outputs)",
            n_outputs
        )));
    }

    let state = p
        .state(r)
        .ok_or_else(|| Error::load("tree has no state"))?;
    let nodes = p
        .dict_get(state, "nodes")
        .ok_or_else(|| Error::load("tree state has no nodes"))?;
    let values = p
        .dict_get(state, "values")
        .ok_or_else(|| Error::load("tree state has no values"))?;
    let nodes = NdArray::from_pickle(p, nodes)?;
    let values = NdArray::from_pickle(p, values)?;

    let node_count = nodes.len();
    let width = match values.shape[..] {
        [n, 1, k] if n == node_count => k,
        _ => {
            return Err(Error::load(format!(
                "tree values shape {:?} does not match {} nodes",
                values.shape, node_count
            )))
        }
    };

    Ok(Tree {
        children_left: nodes.column("left_child")?.to_i64(p)?,
        children_right: nodes.column("right_child")?.to_i64(p)?,
        feature: nodes.column("feature")?.to_i64(p)?,
        threshold: nodes.column("threshold")?.to_f64(p)?,
        value: chunk_rows(&values.to_f64(p)?, node_count, width),
    })
}

fn chunk_rows(values: &[f64], rows: usize, width: usize) -> Vec<Vec<f64>> {
    if width == 0 {
        return vec![Vec::new(); rows];
    }
    values.chunks(width).map(<[f64]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::decode_estimator;

    const FOREST_CLOUDPICKLE: &[u8] = include_bytes!("../tests/fixtures/iris_forest_cloudpickle.pkl");
    const FOREST_JOBLIB: &[u8] = include_bytes!("../tests/fixtures/iris_forest.joblib");

    fn iris_rows() -> Vec<Vec<f64>> {
        vec![
            vec![5.1, 3.5, 1.4, 0.2],
            vec![6.0, 2.9, 4.5, 1.5],
            vec![6.7, 3.0, 5.2, 2.3],
        ]
    }

    #[test]
    fn test_random_forest_from_protocol_5_pickle() {
        let model = decode_estimator(FOREST_CLOUDPICKLE).unwrap();

        assert_eq!(model.kind_name(), "random_forest_classifier");
        assert_eq!(
            model.feature_names.as_deref(),
            Some(
                &[
                    "sepal length (cm)".to_string(),
                    "sepal width (cm)".to_string(),
                    "petal length (cm)".to_string(),
                    "petal width (cm)".to_string(),
                ][..]
            )
        );
        let EstimatorKind::RandomForestClassifier { classes, estimators } = &model.kind else {
            panic!("unexpected kind {}", model.kind_name());
        };
        // Forest labels, not the float labels each member tree was fit on
        assert_eq!(classes, &vec![Label::Int(0), Label::Int(1), Label::Int(2)]);
        assert_eq!(estimators.len(), 3);
        assert_eq!(estimators[0].children_left, vec![1, -1, 3, -1, -1]);
        assert_eq!(estimators[0].feature, vec![2, -2, 3, -2, -2]);
        assert_eq!(estimators[0].threshold[0], 2.45);
        assert_eq!(estimators[0].value[1], vec![1.0, 0.0, 0.0]);

        let labels = model.predict(&iris_rows()).unwrap();
        assert_eq!(labels, vec![Label::Int(0), Label::Int(1), Label::Int(2)]);
    }

    #[test]
    fn test_member_decision_tree_keeps_its_own_labels() {
        let pickle = Pickle::parse(FOREST_CLOUDPICKLE).unwrap();
        let members = pickle.attr(pickle.root(), "estimators_").unwrap();
        let first = pickle.items(members).unwrap()[0];

        let model = decode(&pickle, first).unwrap();
        model.validate().unwrap();
        assert_eq!(model.kind_name(), "decision_tree_classifier");
        assert_eq!(model.feature_names, None);
        assert_eq!(
            model.predict(&iris_rows()).unwrap(),
            vec![Label::Float(0.0), Label::Float(1.0), Label::Float(2.0)]
        );
    }

    #[test]
    fn test_joblib_inline_arrays_match_pickled_arrays() {
        let joblib = decode_estimator(FOREST_JOBLIB).unwrap();
        let cloudpickle = decode_estimator(FOREST_CLOUDPICKLE).unwrap();
        assert_eq!(joblib, cloudpickle);
    }

    #[test]
    fn test_logistic_regression_from_protocol_2_pickle() {
        let model = decode_estimator(include_bytes!("../tests/fixtures/logistic_protocol2.pkl")).unwrap();

        assert_eq!(model.feature_names, None);
        let labels = model.predict(&[vec![3.0, 1.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(labels, vec![Label::from("yes"), Label::from("no")]);
    }

    #[test]
    fn test_linear_regression_with_numpy_scalar_intercept() {
        let model = decode_estimator(include_bytes!("../tests/fixtures/linear_regression.pkl")).unwrap();

        assert_eq!(
            model.kind,
            EstimatorKind::LinearRegression {
                coef: vec![2.0, -1.0],
                intercept: 0.5
            }
        );
        assert_eq!(model.feature_names, Some(vec!["rooms".to_string(), "age".to_string()]));
        assert_eq!(model.predict(&[vec![1.0, 1.0]]).unwrap(), vec![Label::Float(1.5)]);
    }

    #[test]
    fn test_other_estimators_are_unsupported() {
        let err = decode_estimator(include_bytes!("../tests/fixtures/svc.pkl")).unwrap_err();
        assert!(matches!(&err, Error::UnsupportedFormat(msg) if msg.contains("SVC")), "{}", err);

        // datetime.date(2024, 1, 1)
        let date = b"\x80\x02cdatetime\ndate\nq\x00c_codecs\nencode\nq\x01X\x05\x00\x00\x00\x07\xc3\xa8\x01\x01q\x02X\x06\x00\x00\x00latin1q\x03\x86q\x04Rq\x05\x85q\x06Rq\x07.";
        let err = decode_estimator(date).unwrap_err();
        assert!(matches!(&err, Error::UnsupportedFormat(msg) if msg.contains("datetime.date")), "{}", err);
    }

    #[test]
    fn test_truncated_estimator_pickle_is_load_error() {
        let truncated = &FOREST_CLOUDPICKLE[..FOREST_CLOUDPICKLE.len() / 2];
        assert!(matches!(decode_estimator(truncated), Err(Error::Load(_))));
    }
}
