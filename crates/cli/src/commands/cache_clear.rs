use crate::commands::CommandResult;
use vaxel_core::config::{AppConfig, LoadOptions};
use vaxel_db::repositories::{ComboCacheRepository, SqlComboCacheRepository};
use vaxel_db::{connect_with_settings, migrations};

/// Clears the persisted combo cache table. In-memory layers live inside a
/// running server process and are cleared through its admin endpoint.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "cache-clear",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "cache-clear",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let cleared = SqlComboCacheRepository::new(pool.clone())
            .clear()
            .await
            .map_err(|error| ("cache_clear", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<u64, (&'static str, String, u8)>(cleared)
    });

    match result {
        Ok(cleared) => CommandResult::success(
            "cache-clear",
            format!("cleared {cleared} persisted combo cache entries"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("cache-clear", error_class, message, exit_code)
        }
    }
}
