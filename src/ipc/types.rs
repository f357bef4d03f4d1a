use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
        }
    }
}

/// Borrowed view handed to handler bodies once a workspace is open.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub workspace: &'a std::path::Path,
    pub config: &'a Config,
}
