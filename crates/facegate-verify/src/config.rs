use facegate_camera::CaptureConstraints;
use std::path::PathBuf;
use std::time::Duration;

/// Verification configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Capture resolution hints.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Base URL of the reference-image catalog service.
    pub catalog_url: String,
    /// Timeout in seconds for catalog HTTP requests.
    pub http_timeout_secs: u64,
    /// Maximum embedding distance still considered a match.
    pub match_threshold: f32,
    /// Shots per verification attempt; also bounds the capture buffer.
    pub shots_per_verify: usize,
    /// Face-presence poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Strict AND across the burst when true; majority vote otherwise.
    pub require_all_shots: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: facegate_vision::default_model_dir(),
            catalog_url: "http://localhost:8080".to_string(),
            http_timeout_secs: 10,
            match_threshold: facegate_vision::DEFAULT_MATCH_THRESHOLD,
            shots_per_verify: 3,
            poll_interval_ms: 300,
            require_all_shots: true,
        }
    }
}

impl VerifyConfig {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or(defaults.camera_device),
            capture_width: env_u32("FACEGATE_CAPTURE_WIDTH", defaults.capture_width),
            capture_height: env_u32("FACEGATE_CAPTURE_HEIGHT", defaults.capture_height),
            model_dir: std::env::var("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            catalog_url: std::env::var("FACEGATE_CATALOG_URL").unwrap_or(defaults.catalog_url),
            http_timeout_secs: env_u64("FACEGATE_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            match_threshold: env_f32("FACEGATE_MATCH_THRESHOLD", defaults.match_threshold),
            shots_per_verify: env_usize("FACEGATE_SHOTS_PER_VERIFY", defaults.shots_per_verify),
            poll_interval_ms: env_u64("FACEGATE_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            require_all_shots: std::env::var("FACEGATE_REQUIRE_ALL_SHOTS")
                .map(|v| v != "0")
                .unwrap_or(defaults.require_all_shots),
        }
    }

    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            device: self.camera_device.clone(),
            width: self.capture_width,
            height: self.capture_height,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
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

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
