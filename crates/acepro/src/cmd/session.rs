use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acepro_dispatch::{dispatcher, DispatchConfig};
use acepro_engine::{EngineConfig, JsonFileStore, MemoryStore, SaveMode, Store, TokioScheduler, Unit};
use acepro_transport::{Connector, SerialConnector};
use tracing::debug;

use crate::exit::{config_error, dispatch_error, io_error, store_error, transport_error, CliResult};

/// Resolved connection settings for one unit.
#[derive(Debug)]
pub struct Target {
    pub port: Option<PathBuf>,
    pub baud: u32,
    pub unit: usize,
    pub timeout: Duration,
    pub config: EngineConfig,
    pub state: Option<PathBuf>,
}

impl Target {
    fn connector(&self) -> SerialConnector {
        match &self.port {
            Some(path) => SerialConnector::with_path(path, self.baud),
            None => SerialConnector::discover(self.unit, self.baud),
        }
    }

    fn store(&self) -> CliResult<Arc<dyn Store>> {
        match &self.state {
            Some(path) => {
                let store = JsonFileStore::open(path, SaveMode::Immediate)
                    .map_err(|err| store_error("failed opening state file", err))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

/// Connect to the target unit, run `op` against it, then shut the link down.
pub fn with_unit<T, F, Fut>(target: &Target, op: F) -> CliResult<T>
where
    F: FnOnce(Arc<Unit>) -> Fut,
    Fut: Future<Output = CliResult<T>>,
{
    let unit_config = target
        .config
        .unit_config(target.unit)
        .map_err(|err| config_error("invalid unit config", err))?;
    let store = target.store()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    runtime.block_on(async {
        let mut connector = target.connector();
        let described = connector.describe();

        // The dispatcher retries forever; a port that cannot be opened at all fails here.
        connector
            .connect()
            .map_err(|err| transport_error(&format!("cannot open {described}"), err))?;

        let (dispatcher, handle, _events) = dispatcher(connector, DispatchConfig::default());
        let task = tokio::spawn(dispatcher.run());

        if let Err(err) = handle.wait_connected(target.timeout).await {
            handle.shutdown();
            let _ = task.await;
            return Err(dispatch_error(&format!("connect to {described} failed"), err));
        }
        debug!(target = %described, unit = target.unit, "session open");

        let unit = Arc::new(Unit::new(
            target.unit,
            unit_config,
            target.config.retry.clone(),
            handle.clone(),
            store,
            Arc::new(TokioScheduler::new()),
        ));

        let result = op(unit).await;

        handle.shutdown();
        let _ = task.await;
        result
    })
}
