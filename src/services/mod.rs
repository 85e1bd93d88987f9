pub mod auth_service;
pub mod storage_service;
