use std::sync::Arc;

use chat_core::{DeliveryService, HubHandle};
use sqlx::PgPool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub delivery: Arc<DeliveryService>,
    pub hub: HubHandle,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, delivery: Arc<DeliveryService>, hub: HubHandle, config: Arc<Config>) -> Self {
        Self {
            pool,
            delivery,
            hub,
            config,
        }
    }
}
