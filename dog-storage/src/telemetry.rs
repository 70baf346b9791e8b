use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{StorageError, StorageResult};

/// Install a global subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info,dog_storage=debug`. With `json` set, events are written
/// as one JSON object per line.
pub fn init_tracing(json: bool) -> StorageResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dog_storage=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| StorageError::configuration(format!("tracing already initialized: {}", e)))?;

    info!(json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_reported() {
        let _ = init_tracing(false);
        assert!(matches!(
            init_tracing(true).unwrap_err(),
            StorageError::Configuration { .. }
        ));
    }
}
