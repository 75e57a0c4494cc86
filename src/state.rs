use std::sync::Arc;

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::reservation::ReservationService;
use crate::services::store::SqliteStore;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub reservations: ReservationService,
}

impl AppState {
    pub fn new(config: AppConfig, conn: Connection) -> Self {
        let store = Arc::new(SqliteStore::new(conn));
        let reservations = ReservationService::new(
            store.clone(),
            store.clone(),
            config.store_timeout(),
            config.max_window(),
        );
        Self {
            config,
            store,
            reservations,
        }
    }
}
