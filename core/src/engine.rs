use crate::analyzer::{AnalysisTick, AnomalyAnalyzer};
use crate::config::Config;
use crate::rca::{Incident, RcaEngine};
use crate::store::{create_store, TelemetryStore};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task;

/// Ties the store, analyzer and RCA engine into the periodic tick that keeps
/// the system self-updating. Generalizes the teacher's background-loop
/// engine: same start/stop/running-flag shape, different per-tick job.
pub struct AiopsEngine {
    store: Arc<dyn TelemetryStore>,
    analyzer: Arc<AnomalyAnalyzer>,
    rca: Arc<RcaEngine>,
    tick_interval_ms: u64,
    running: Arc<RwLock<bool>>,
    /// Held for the duration of one tick so a manual `/aiops/analyze` call
    /// and the scheduler's own tick never run concurrently.
    tick_lock: Arc<Mutex<()>>,
}

impl AiopsEngine {
    pub async fn new(config: Config) -> Result<Self> {
        let store = create_store(&config.storage).await?;
        let analyzer = Arc::new(AnomalyAnalyzer::new(Arc::clone(&store), config.analyzer));
        let rca = Arc::new(RcaEngine::new(Arc::clone(&store), config.rca));

        Ok(Self {
            store,
            analyzer,
            rca,
            tick_interval_ms: config.engine.tick_interval_ms,
            running: Arc::new(RwLock::new(false)),
            tick_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn store(&self) -> Arc<dyn TelemetryStore> {
        Arc::clone(&self.store)
    }

    pub fn analyzer(&self) -> Arc<AnomalyAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    pub fn rca(&self) -> Arc<RcaEngine> {
        Arc::clone(&self.rca)
    }

    /// Starts the background scheduler loop. Idempotent: calling it while
    /// already running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        let analyzer = Arc::clone(&self.analyzer);
        let rca = Arc::clone(&self.rca);
        let tick_interval_ms = self.tick_interval_ms;
        let running = Arc::clone(&self.running);
        let tick_lock = Arc::clone(&self.tick_lock);

        task::spawn(async move {
            Self::run_loop(analyzer, rca, tick_interval_ms, running, tick_lock).await;
        });

        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Runs analyzer + RCA exactly once, serialized against the background
    /// loop via the shared tick lock. Used by the manual `/aiops/analyze`
    /// endpoint, which needs both the raw analysis and the incidents it
    /// produced.
    pub async fn run_tick_now(&self) -> Result<(AnalysisTick, Vec<Incident>)> {
        let _guard = self.tick_lock.lock().await;
        Self::tick(&self.analyzer, &self.rca).await
    }

    async fn tick(analyzer: &AnomalyAnalyzer, rca: &RcaEngine) -> Result<(AnalysisTick, Vec<Incident>)> {
        let analysis = analyzer.run_analysis().await?;
        let incidents = rca.correlate(analysis.anomalies.clone()).await?;
        Ok((analysis, incidents))
    }

    async fn run_loop(
        analyzer: Arc<AnomalyAnalyzer>,
        rca: Arc<RcaEngine>,
        tick_interval_ms: u64,
        running: Arc<RwLock<bool>>,
        tick_lock: Arc<Mutex<()>>,
    ) {
        loop {
            {
                let is_running = running.read().await;
                if !*is_running {
                    break;
                }
            }

            {
                let _guard = tick_lock.lock().await;
                match Self::tick(&analyzer, &rca).await {
                    Ok((_, incidents)) if !incidents.is_empty() => {
                        tracing::info!(count = incidents.len(), "analysis tick produced incidents");
                    }
                    Ok(_) => {
                        tracing::debug!("analysis tick completed, no incidents");
                    }
                    Err(e) => {
                        tracing::error!("analysis tick failed: {}", e);
                    }
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(tick_interval_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_start_stop() {
        let engine = AiopsEngine::new(Config::default()).await.unwrap();
        assert!(engine.start().await.is_ok());
        engine.stop().await;
    }

    #[tokio::test]
    async fn manual_tick_runs_without_scheduler() {
        let engine = AiopsEngine::new(Config::default()).await.unwrap();
        let (analysis, incidents) = engine.run_tick_now().await.unwrap();
        assert!(analysis.anomalies.is_empty());
        assert!(incidents.is_empty());
    }
}
