use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use partledger_infra::store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use partledger_infra::{LedgerService, PurchaseOrderWorkflow, RetryPolicy};

use crate::config::Settings;

/// Services shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: LedgerService,
    pub orders: PurchaseOrderWorkflow,
}

impl AppServices {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self {
            ledger: LedgerService::new(store.clone(), retry),
            orders: PurchaseOrderWorkflow::new(store, retry),
        }
    }
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let retry = RetryPolicy::new(settings.ledger_max_retries);

    let store: Arc<dyn LedgerStore> = if settings.use_persistent_stores {
        let url = settings
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.db_max_connections)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        let store = PostgresLedgerStore::new(pool);
        store
            .apply_schema()
            .await
            .context("failed to apply ledger schema")?;
        info!(max_connections = settings.db_max_connections, "using Postgres ledger store");
        Arc::new(store)
    } else {
        warn!("USE_PERSISTENT_STORES not set; ledger state is kept in memory only");
        Arc::new(InMemoryLedgerStore::new())
    };

    Ok(AppServices::new(store, retry))
}
