use std::env;
use std::path::PathBuf;

/// Process-wide configuration, built once at startup and passed by
/// parameter into every component that needs it.
///
/// Values are taken from the environment (with `.env` support via dotenvy,
/// loaded in `main`). Missing variables are not rejected up front: an empty
/// `base_url` simply makes the first login navigation fail, which is where
/// the operator sees the problem.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub segment_path: String,
    pub auth_username: String,
    pub auth_password: String,
    pub export_root: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("BASE_URL").unwrap_or_default(),
            segment_path: env::var("SEGMENT_PATH").unwrap_or_default(),
            auth_username: env::var("AUTH_USERNAME").unwrap_or_default(),
            auth_password: env::var("AUTH_PASSWORD").unwrap_or_default(),
            export_root: env::var("EXPORT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("export")),
        }
    }

    /// URL of the player-list view.
    pub fn player_list_url(&self) -> String {
        format!("{}/{}", self.base_url, self.segment_path)
    }

    /// URL of the reports landing view.
    pub fn report_url(&self) -> String {
        format!("{}/Report", self.base_url)
    }
}
