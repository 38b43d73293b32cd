
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

/// A cloned repository and where it lives on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub url: String,
    pub local_path: String,
    pub cloned_at: NaiveDateTime,
}

impl Repository {
    #[inline]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.local_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRepository {
    pub url: String,
    pub local_path: String,
}
