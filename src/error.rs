use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Invalid ball profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Homography error: {0}")]
    Homography(String),

    #[error("Trajectory point out of order: frame {got} after frame {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
