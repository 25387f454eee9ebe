use facematch_core::{Metric, ModelPaths};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:5000";
const DEFAULT_REFERENCE_DIR: &str = "reference_images";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}

/// Optional TOML overlay; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    model_dir: Option<PathBuf>,
    reference_dir: Option<PathBuf>,
    metric: Option<Metric>,
    threshold: Option<f32>,
    max_upload_bytes: Option<usize>,
    intra_threads: Option<usize>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to (default: 0.0.0.0:5000).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory scanned once at startup for reference images.
    pub reference_dir: PathBuf,
    /// Embedding comparison metric.
    pub metric: Metric,
    /// Match threshold, interpreted according to `metric`.
    pub threshold: f32,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load from `FACEMATCH_*` environment variables, layered over the TOML
    /// file named by `FACEMATCH_CONFIG` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match lookup("FACEMATCH_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let bind_str = lookup("FACEMATCH_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str.clone()))?;

        let metric = parsed(&lookup, "FACEMATCH_METRIC")
            .or(file.metric)
            .unwrap_or(Metric::Cosine);

        Ok(Self {
            bind,
            model_dir: lookup("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(facematch_core::default_model_dir),
            reference_dir: lookup("FACEMATCH_REFERENCE_DIR")
                .map(PathBuf::from)
                .or(file.reference_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REFERENCE_DIR)),
            metric,
            threshold: parsed(&lookup, "FACEMATCH_THRESHOLD")
                .or(file.threshold)
                .unwrap_or_else(|| metric.default_threshold()),
            max_upload_bytes: parsed(&lookup, "FACEMATCH_MAX_UPLOAD_BYTES")
                .or(file.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            intra_threads: parsed(&lookup, "FACEMATCH_INTRA_THREADS")
                .or(file.intra_threads)
                .unwrap_or(DEFAULT_INTRA_THREADS),
        })
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse an environment value, ignoring (with a warning) values that do not parse.
fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind, "0.0.0.0:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.reference_dir, PathBuf::from("reference_images"));
        assert_eq!(config.metric, Metric::Cosine);
        assert!((config.threshold - 0.40).abs() < 1e-6);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.model_dir.ends_with("facematch/models"));
    }

    #[test]
    fn test_euclidean_metric_uses_its_own_default_threshold() {
        let config = Config::from_lookup(lookup_from(&[("FACEMATCH_METRIC", "euclidean")])).unwrap();
        assert_eq!(config.metric, Metric::Euclidean);
        assert!((config.threshold - 1.10).abs() < 1e-6);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("FACEMATCH_THRESHOLD", "high"),
            ("FACEMATCH_METRIC", "hamming"),
        ]))
        .unwrap();
        assert_eq!(config.metric, Metric::Cosine);
        assert!((config.threshold - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_bind_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("FACEMATCH_BIND", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));
    }

    #[test]
    fn test_file_values_are_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(
            &path,
            "bind = \"127.0.0.1:8080\"\nreference_dir = \"/srv/faces\"\nmetric = \"euclidean\"\nthreshold = 0.9\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config = Config::from_lookup(lookup_from(&[
            ("FACEMATCH_CONFIG", path_str.as_str()),
            ("FACEMATCH_THRESHOLD", "0.7"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.reference_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.metric, Metric::Euclidean);
        assert!((config.threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(&path, "port = 1\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let err = Config::from_lookup(lookup_from(&[("FACEMATCH_CONFIG", path_str.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
