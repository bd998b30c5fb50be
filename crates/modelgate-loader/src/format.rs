//! Serialized model file formats
//!
//! Raw model files are recognized by extension: `.pkl`/`.pickle` (pickle)
//! and `.joblib` (a pickle that joblib may have zlib- or gzip-compressed),
//! each optionally followed by `.gz`.

use crate::estimator::Estimator;
use crate::pickle::{Pickle, Value};
use crate::sklearn;
use flate2::read::{GzDecoder, ZlibDecoder};
use modelgate_core::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Serialization of a raw model file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializedFormat {
    /// Python pickle
    Pickle,
    /// joblib dump (pickle, possibly compressed)
    Joblib,
}

impl SerializedFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pkl" | "pickle" => Some(Self::Pickle),
            "joblib" => Some(Self::Joblib),
            _ => None,
        }
    }
}

/// A recognized model file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
    pub path: PathBuf,
    pub format: SerializedFormat,
    /// File carries an extra `.gz` suffix
    pub gzipped: bool,
}

impl ModelFile {
    /// Recognize a model file by its name
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let (stem, gzipped) = match name.strip_suffix(".gz") {
            Some(stem) => (stem, true),
            None => (name.as_str(), false),
        };
        let ext = Path::new(stem).extension()?.to_str()?;

        SerializedFormat::from_extension(ext).map(|format| Self {
            path: path.to_path_buf(),
            format,
            gzipped,
        })
    }

    /// Read, decompress and deserialize the estimator (blocking)
    pub fn read_estimator(&self) -> Result<Estimator> {
        let raw = std::fs::read(&self.path)?;

        let mut bytes = if self.gzipped {
            gunzip(&raw).map_err(|e| self.load_error(e))?
        } else {
            raw
        };

        if self.format == SerializedFormat::Joblib {
            bytes = decompress_joblib(bytes).map_err(|e| self.load_error(e))?;
        }

        decode_estimator(&bytes).map_err(|e| match e {
            Error::UnsupportedFormat(msg) => {
                Error::unsupported_format(format!("{}: {}", self.path.display(), msg))
            }
            Error::Load(msg) => self.load_error(msg),
            other => self.load_error(other),
        })
    }

    fn load_error(&self, e: impl std::fmt::Display) -> Error {
        Error::load(format!("Failed to load {}: {}", self.path.display(), e))
    }
}

/// Deserialize and validate an estimator from pickle bytes
///
/// Pickled scikit-learn objects are read from their reconstructed state.
/// A pickled dict is read as the plain-data [`Estimator`] layout.
pub fn decode_estimator(bytes: &[u8]) -> Result<Estimator> {
    let pickle = Pickle::parse(bytes)?;
    let estimator = match pickle.get(pickle.root()) {
        Value::Object { .. } => sklearn::decode(&pickle, pickle.root())?,
        Value::Dict(_) => serde_pickle::from_slice(bytes, serde_pickle::DeOptions::new())
            .map_err(|e| Error::load(format!("unpickling failed: {}", e)))?,
        _ => {
            return Err(Error::unsupported_format(
                "pickle holds neither an estimator object nor an estimator dict",
            ))
        }
    };
    estimator.validate()?;
    Ok(estimator)
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// joblib writes either a bare pickle or a compressed one
fn decompress_joblib(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    match bytes.as_slice() {
        [0x1f, 0x8b, ..] => gunzip(&bytes),
        [0x78, 0x01 | 0x5e | 0x9c | 0xda, ..] => {
            let mut out = Vec::new();
            ZlibDecoder::new(bytes.as_slice()).read_to_end(&mut out)?;
            Ok(out)
        }
        _ => Ok(bytes),
    }
}

/// Find the first recognized model file under `root`
///
/// `root` may itself be a model file. Directories are walked recursively
/// in lexicographic order so the choice is stable across filesystems.
pub fn find_model_file(root: &Path) -> Result<Option<ModelFile>> {
    if root.is_file() {
        return Ok(ModelFile::detect(root));
    }
    if !root.exists() {
        return Err(Error::not_found(format!("{} does not exist", root.display())));
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::load(format!("Failed to scan {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(found) = ModelFile::detect(entry.path()) {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorKind;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn linear() -> Estimator {
        Estimator::new(EstimatorKind::LinearRegression {
            coef: vec![1.0, 2.0],
            intercept: 0.0,
        })
        .with_feature_names(["a", "b"])
    }

    fn pickled(model: &Estimator) -> Vec<u8> {
        serde_pickle::to_vec(model, serde_pickle::SerOptions::new()).unwrap()
    }

    #[test]
    fn test_detect_by_extension() {
        let cases = [
            ("model.pkl", Some((SerializedFormat::Pickle, false))),
            ("model.pickle", Some((SerializedFormat::Pickle, false))),
            ("model.joblib", Some((SerializedFormat::Joblib, false))),
            ("model.pkl.gz", Some((SerializedFormat::Pickle, true))),
            ("MODEL.JOBLIB.GZ", Some((SerializedFormat::Joblib, true))),
            ("MLmodel", None),
            ("conda.yaml", None),
            ("model.tgz", None),
            ("archive.gz", None),
        ];

        for (name, expected) in cases {
            let detected = ModelFile::detect(Path::new(name)).map(|f| (f.format, f.gzipped));
            assert_eq!(detected, expected, "{}", name);
        }
    }

    #[test]
    fn test_read_pickle_and_compressed_variants() {
        let dir = tempfile::tempdir().unwrap();
        let model = linear();
        let bytes = pickled(&model);

        let plain = dir.path().join("model.pkl");
        std::fs::write(&plain, &bytes).unwrap();

        let gz = dir.path().join("model.pkl.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        std::fs::write(&gz, encoder.finish().unwrap()).unwrap();

        let zlib = dir.path().join("model.joblib");
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        std::fs::write(&zlib, encoder.finish().unwrap()).unwrap();

        for path in [plain, gz, zlib] {
            let file = ModelFile::detect(&path).unwrap();
            assert_eq!(file.read_estimator().unwrap(), model, "{}", path.display());
        }
    }

    #[test]
    fn test_corrupt_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pkl");
        std::fs::write(&path, b"definitely not a pickle").unwrap();

        let err = ModelFile::detect(&path).unwrap().read_estimator().unwrap_err();
        assert!(matches!(err, Error::Load(_)));
    }

    #[test]
    fn test_find_model_file_is_lexicographic_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("MLmodel.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b/nested/model.pkl"), b"").unwrap();
        std::fs::write(dir.path().join("a/z.joblib"), b"").unwrap();

        let found = find_model_file(dir.path()).unwrap().unwrap();
        assert_eq!(found.path, dir.path().join("a/z.joblib"));
    }

    #[test]
    fn test_find_model_file_accepts_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pkl");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(find_model_file(&path).unwrap().unwrap().path, path);
        assert!(matches!(
            find_model_file(&dir.path().join("missing")),
            Err(Error::NotFound(_))
        ));
    }
}
