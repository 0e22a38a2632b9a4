use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

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
    /// Active teacher for ownership filtering and recorded_by stamps.
    /// Auth itself lives outside the daemon; this is the whole session.
    pub teacher_id: Option<i64>,
}
