use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::OrderInput;
use crate::error::{require_user_id, TaxError};
use crate::pipeline::Event;

/// Broker adapter that yields raw order payloads for a user
pub trait OrderSource {
    /// Short identifier of the broker or export, used in logs
    fn name(&self) -> &str;

    fn fetch_orders(&self, user_id: &str) -> Result<Vec<OrderInput>>;
}

/// Orders exported to a JSON file: an array of order payload objects
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("json")
            .to_string();
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OrderSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_orders(&self, _user_id: &str) -> Result<Vec<OrderInput>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read order export {:?}", self.path))?;

        let orders: Vec<OrderInput> = serde_json::from_str(&content).map_err(|e| {
            TaxError::Parse(format!("invalid order export {:?}: {}", self.path, e))
        })?;
        Ok(orders)
    }
}

/// Pull orders from `source` and wrap them in a `NewOrders` event.
///
/// The request is validated before the source is touched.
pub fn sync_orders(source: &dyn OrderSource, user_id: &str) -> Result<Event> {
    require_user_id(user_id)?;
    if source.name().trim().is_empty() {
        return Err(TaxError::InvalidRequest("order source must not be empty".to_string()).into());
    }

    let orders = source
        .fetch_orders(user_id)
        .with_context(|| format!("Failed to fetch orders from {}", source.name()))?;

    info!(
        "Fetched {} orders from {} for {}",
        orders.len(),
        source.name(),
        user_id
    );

    Ok(Event::NewOrders {
        user_id: user_id.to_string(),
        orders,
    })
}
