//! Shared, read-only state handed to every handler.

use crate::{
    config::AppConfig,
    services::{auth_service::Credentials, storage_service::StorageService},
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    pub storage: StorageService,
    pub credentials: Arc<Credentials>,
    pub access_prefix: Arc<str>,
}

impl AppState {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            storage: StorageService::new(cfg.upload_dir.clone()),
            credentials: Arc::new(Credentials::new(&cfg.username, &cfg.password)),
            access_prefix: Arc::from(cfg.access_prefix.as_str()),
        }
    }
}
