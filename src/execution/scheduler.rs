use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::ExchangeClient;
use crate::config::BotConfig;
use crate::execution::SymbolWorker;
use crate::journal::TradeJournal;

/// Starts one worker task per configured symbol
pub struct Scheduler {
    config: Arc<BotConfig>,
    exchange: Arc<dyn ExchangeClient>,
    journal: Arc<dyn TradeJournal>,
}

/// Running workers and the switch that stops them
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(
        config: Arc<BotConfig>,
        exchange: Arc<dyn ExchangeClient>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        Self {
            config,
            exchange,
            journal,
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, rx) = watch::channel(false);

        let workers = self
            .config
            .symbols
            .iter()
            .map(|symbol| {
                let worker = SymbolWorker::new(
                    symbol.clone(),
                    self.config.clone(),
                    self.exchange.clone(),
                    self.journal.clone(),
                );
                (symbol.clone(), tokio::spawn(worker.run(rx.clone())))
            })
            .collect::<Vec<_>>();

        tracing::info!("Spawned {} symbol workers", workers.len());

        SchedulerHandle { shutdown, workers }
    }
}

impl SchedulerHandle {
    pub fn symbols(&self) -> Vec<&str> {
        self.workers.iter().map(|(s, _)| s.as_str()).collect()
    }

    /// Signal every worker and wait for them to finish their current iteration
    pub async fn shutdown(self) {
        // Receivers outlive the send only if a worker already exited
        let _ = self.shutdown.send(true);

        for (symbol, handle) in self.workers {
            if let Err(e) = handle.await {
                tracing::error!("Worker {} ended abnormally: {}", symbol, e);
            }
        }
    }
}
