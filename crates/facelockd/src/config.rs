use facelock_core::RecognitionConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MATCH_TIMEOUT_SECS: u64 = 10;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding the enrolled face/frame/image PNGs.
    pub blob_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Seconds without an accepted match before the timeout alert fires.
    pub match_timeout_secs: u64,
    pub nose_ratio: f32,
    pub eye_distance_ratio: f32,
    /// Whether to load the auxiliary liveness model.
    pub liveness_enabled: bool,
    /// Program spawned with the alert name as its only argument.
    pub alert_command: Option<String>,
}

impl Config {
    /// Load configuration from `FACELOCK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facelock");

        let defaults = RecognitionConfig::default();

        Self {
            model_dir: env_path("FACELOCK_MODEL_DIR").unwrap_or_else(|| data_dir.join("models")),
            db_path: env_path("FACELOCK_DB_PATH").unwrap_or_else(|| data_dir.join("faces.db")),
            blob_dir: env_path("FACELOCK_BLOB_DIR").unwrap_or_else(|| data_dir.join("faces")),
            similarity_threshold: env_f32("FACELOCK_SIMILARITY_THRESHOLD", defaults.threshold),
            match_timeout_secs: env_timeout_secs("FACELOCK_MATCH_TIMEOUT_SECS"),
            nose_ratio: env_f32("FACELOCK_NOSE_RATIO", defaults.nose_ratio),
            eye_distance_ratio: env_f32("FACELOCK_EYE_DISTANCE_RATIO", defaults.eye_distance_ratio),
            liveness_enabled: std::env::var("FACELOCK_LIVENESS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
            alert_command: std::env::var("FACELOCK_ALERT_COMMAND")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Path to the FaceNet embedding model.
    pub fn facenet_model_path(&self) -> String {
        self.model_dir
            .join("facenet_512.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the MobileNet liveness model.
    pub fn mobilenet_model_path(&self) -> String {
        self.model_dir
            .join("mobile_net.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            threshold: self.similarity_threshold,
            nose_ratio: self.nose_ratio,
            eye_distance_ratio: self.eye_distance_ratio,
        }
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.match_timeout_secs)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// A zero timeout would fire the watchdog continuously, so it falls back to the default.
fn env_timeout_secs(key: &str) -> u64 {
    match env_u64(key, DEFAULT_MATCH_TIMEOUT_SECS) {
        0 => {
            tracing::warn!(key, default = DEFAULT_MATCH_TIMEOUT_SECS, "zero timeout ignored");
            DEFAULT_MATCH_TIMEOUT_SECS
        }
        secs => secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parsing_falls_back_on_garbage() {
        std::env::set_var("FACELOCK_TEST_BAD_F32", "not-a-number");
        assert_eq!(env_f32("FACELOCK_TEST_BAD_F32", 0.8), 0.8);
        std::env::set_var("FACELOCK_TEST_GOOD_U64", "42");
        assert_eq!(env_u64("FACELOCK_TEST_GOOD_U64", 10), 42);
        assert_eq!(env_u64("FACELOCK_TEST_UNSET_U64", 10), 10);
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        std::env::set_var("FACELOCK_TEST_ZERO_TIMEOUT", "0");
        assert_eq!(env_timeout_secs("FACELOCK_TEST_ZERO_TIMEOUT"), DEFAULT_MATCH_TIMEOUT_SECS);
        std::env::set_var("FACELOCK_TEST_SHORT_TIMEOUT", "3");
        assert_eq!(env_timeout_secs("FACELOCK_TEST_SHORT_TIMEOUT"), 3);
        assert_eq!(env_timeout_secs("FACELOCK_TEST_UNSET_TIMEOUT"), DEFAULT_MATCH_TIMEOUT_SECS);
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            db_path: PathBuf::from("/db"),
            blob_dir: PathBuf::from("/blobs"),
            similarity_threshold: 0.7,
            match_timeout_secs: 3,
            nose_ratio: 0.4,
            eye_distance_ratio: 0.3,
            liveness_enabled: false,
            alert_command: None,
        };
        assert_eq!(config.facenet_model_path(), "/models/facenet_512.onnx");
        assert_eq!(config.mobilenet_model_path(), "/models/mobile_net.onnx");
        assert_eq!(config.recognition().threshold, 0.7);
        assert_eq!(config.match_timeout(), Duration::from_secs(3));
    }
}
