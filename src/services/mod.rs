// Bookmark sync services
// Services talk to the outside world: crypto, accounts, token and storage servers, settings.

pub mod account_provider;
pub mod cluster_manager;
pub mod crypto_service;
pub mod identity_manager;
pub mod settings_engine;
pub mod storage_client;
pub mod sync_engine;
pub mod token_client;
