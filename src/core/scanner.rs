use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    core::{
        client::ChainQueryClient,
        error::{ScanError, ScanResult},
        fetcher::BatchFetcher,
        merger,
        planner::{HeightPlanner, TickPlan},
        scan_config::ScanConfig,
        scheduler::{PeriodicScheduler, SchedulerHandle, TickHandler},
        sink::DataSink,
        types::{
            ChainStatus, FetchResult, LoopCursor, ScanMode, ScanPayload, ScanPhase, ScanStatus,
            ScanType,
        },
    },
    utils::metrics::{NoopScanMetrics, ScanMetrics},
};

/// Phase controller: missing-height backfill, gap backfill up to the LIB,
/// then the polling loop.
///
/// Only one phase step or tick runs at a time, and the cursor is advanced
/// only after the sink has accepted a batch. Any failure moves the scanner
/// to [`ScanPhase::Error`], ends the scheduler, destroys the sink and is
/// returned from [`start`](Self::start); recovery is an explicit
/// [`restart`](Self::restart).
pub struct Scanner<C: ?Sized, S> {
    engine: ScanEngine<C, S>,
    scheduler: PeriodicScheduler,
}

impl<C, S> Scanner<C, S>
where
    C: ChainQueryClient + ?Sized + 'static,
    S: DataSink + 'static,
{
    pub fn new(client: Arc<C>, sink: S, config: ScanConfig) -> Self {
        let scheduler = PeriodicScheduler::new(config.interval());
        let metrics: Arc<dyn ScanMetrics> = Arc::new(NoopScanMetrics::new());
        let engine = ScanEngine::new(client, sink, config, metrics, scheduler.handle());
        Self { engine, scheduler }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ScanMetrics>) -> Self {
        self.engine.set_metrics(metrics);
        self
    }

    pub fn scan_phase(&self) -> ScanPhase {
        self.engine.phase
    }

    /// Receiver that observes every phase change and cursor update.
    pub fn status_watcher(&self) -> watch::Receiver<ScanStatus> {
        self.engine.status.subscribe()
    }

    /// Handle of the current run's scheduler. `restart` installs a new one.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn cursor(&self) -> &LoopCursor {
        &self.engine.cursor
    }

    pub fn config(&self) -> &ScanConfig {
        &self.engine.config
    }

    pub fn sink(&self) -> &S {
        &self.engine.sink
    }

    /// Runs the pipeline until the scheduler is ended (`Ok`) or a step fails.
    pub async fn start(&mut self) -> ScanResult<()> {
        if self.engine.phase != ScanPhase::Init {
            return Err(ScanError::invariant(format!(
                "start() requires the init phase, scanner is in {}",
                self.engine.phase
            )));
        }

        info!(
            mode = self.engine.config.scan_mode().as_str(),
            start_height = self.engine.config.start_height(),
            missing = self.engine.config.missing_height_list().len(),
            interval_ms = self.engine.config.interval_millis(),
            "🚀 Starting scanner"
        );

        match self.run_pipeline().await {
            Ok(()) => {
                info!(
                    phase = %self.engine.phase,
                    current_queries = ?self.engine.cursor.current_queries,
                    "👋 Scanner stopped gracefully"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    /// Drops all run state, installs `sink` and `config`, and starts again
    /// from [`ScanPhase::Init`].
    pub async fn restart(&mut self, sink: S, config: ScanConfig) -> ScanResult<()> {
        info!(previous_phase = %self.engine.phase, "🔁 Restarting scanner");
        self.scheduler = PeriodicScheduler::new(config.interval());
        self.engine.reset(sink, config, self.scheduler.handle());
        self.start().await
    }

    async fn run_pipeline(&mut self) -> ScanResult<()> {
        self.engine.sink.init().await.map_err(ScanError::Sink)?;
        info!("✅ Data sink initialized");

        self.engine.transition(ScanPhase::Missing)?;
        self.engine.scan_missing().await?;
        if self.scheduler.is_ended() {
            return Ok(());
        }

        self.engine.transition(ScanPhase::Gap)?;
        self.engine.scan_gap().await?;
        if self.scheduler.is_ended() {
            return Ok(());
        }

        self.engine.transition(ScanPhase::Loop)?;
        info!(
            interval_ms = self.engine.config.interval_millis(),
            skip_threshold = self.engine.planner.skip_threshold(),
            "🔄 Entering polling loop"
        );
        self.scheduler.run(&mut self.engine).await
    }

    async fn fail(&mut self, err: &ScanError) {
        error!(
            phase = %self.engine.phase,
            kind = err.kind(),
            error = %err,
            "❌ Scan failed, stopping scanner"
        );
        self.engine.enter_error();
        self.scheduler.end_timer();
        if let Err(e) = self.engine.sink.destroy().await {
            warn!(error = %e, "⚠️ Data sink destroy failed");
        }
    }
}

/// Run state of one scan: collaborators, cursor and phase.
struct ScanEngine<C: ?Sized, S> {
    client: Arc<C>,
    sink: S,
    config: ScanConfig,
    fetcher: BatchFetcher<C>,
    planner: HeightPlanner,
    cursor: LoopCursor,
    phase: ScanPhase,
    status: watch::Sender<ScanStatus>,
    metrics: Arc<dyn ScanMetrics>,
    shutdown: SchedulerHandle,
}

impl<C, S> ScanEngine<C, S>
where
    C: ChainQueryClient + ?Sized,
    S: DataSink,
{
    fn new(
        client: Arc<C>,
        sink: S,
        config: ScanConfig,
        metrics: Arc<dyn ScanMetrics>,
        shutdown: SchedulerHandle,
    ) -> Self {
        let cursor = LoopCursor::new(config.start_height());
        let (status, _) = watch::channel(ScanStatus::from_cursor(ScanPhase::Init, &cursor));
        Self {
            fetcher: BatchFetcher::new(
                Arc::clone(&client),
                config.concurrent_query_limit(),
                Arc::clone(&metrics),
            ),
            planner: HeightPlanner::new(&config),
            client,
            sink,
            config,
            cursor,
            phase: ScanPhase::Init,
            status,
            metrics,
            shutdown,
        }
    }

    fn set_metrics(&mut self, metrics: Arc<dyn ScanMetrics>) {
        self.fetcher = BatchFetcher::new(
            Arc::clone(&self.client),
            self.config.concurrent_query_limit(),
            Arc::clone(&metrics),
        );
        self.metrics = metrics;
    }

    fn reset(&mut self, sink: S, config: ScanConfig, shutdown: SchedulerHandle) {
        self.fetcher = BatchFetcher::new(
            Arc::clone(&self.client),
            config.concurrent_query_limit(),
            Arc::clone(&self.metrics),
        );
        self.planner = HeightPlanner::new(&config);
        self.cursor = LoopCursor::new(config.start_height());
        self.sink = sink;
        self.config = config;
        self.shutdown = shutdown;
        self.phase = ScanPhase::Init;
        self.metrics.record_phase(ScanPhase::Init);
        self.publish();
    }

    fn transition(&mut self, next: ScanPhase) -> ScanResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ScanError::invalid_transition(self.phase, next));
        }
        if self.phase != next {
            info!(from = %self.phase, to = %next, "🔀 Scan phase changed");
            self.phase = next;
            self.metrics.record_phase(next);
            self.publish();
        }
        Ok(())
    }

    fn enter_error(&mut self) {
        self.phase = ScanPhase::Error;
        self.metrics.record_phase(ScanPhase::Error);
        self.publish();
    }

    fn publish(&self) {
        self.status
            .send_replace(ScanStatus::from_cursor(self.phase, &self.cursor));
    }

    async fn chain_status(&self) -> ScanResult<ChainStatus> {
        let status = self
            .client
            .chain_status()
            .await
            .map_err(ScanError::Chain)?;
        debug!(
            best = status.best_height,
            lib = status.lib_height,
            "⛓️ Chain status"
        );
        Ok(status)
    }

    async fn insert(&self, result: &FetchResult) -> ScanResult<()> {
        let started = Instant::now();
        self.sink.insert(result).await.map_err(ScanError::Sink)?;
        self.metrics
            .record_insert(result.scan_type, started.elapsed(), result.block_count());
        Ok(())
    }

    /// Inserts the configured missing heights chunk by chunk, in list order.
    async fn scan_missing(&self) -> ScanResult<()> {
        let heights = self.config.missing_height_list();
        if heights.is_empty() {
            debug!("No missing heights configured");
            return Ok(());
        }

        let chunk_size = self.config.max_insert_batch();
        info!(
            count = heights.len(),
            chunks = heights.len().div_ceil(chunk_size),
            "🧩 Backfilling missing heights"
        );

        for (index, chunk) in heights.chunks(chunk_size).enumerate() {
            if self.shutdown.is_ended() {
                info!("🛑 Shutdown requested, stopping missing-height backfill");
                return Ok(());
            }

            let result = self
                .fetcher
                .fetch(
                    chunk,
                    self.config.scan_mode(),
                    self.config.listeners(),
                    ScanType::Missing,
                )
                .await?;
            self.insert(&result).await?;

            info!(
                chunk = index + 1,
                heights = chunk.len(),
                blocks = result.block_count(),
                "✅ Missing heights inserted"
            );
        }

        Ok(())
    }

    /// Inserts `[start_height, lib]` in `max_insert_batch` ranges. The LIB is
    /// re-read after every chunk so the bound follows the chain.
    async fn scan_gap(&mut self) -> ScanResult<()> {
        let start = self.config.start_height();
        let chunk_size = self.config.max_insert_batch() as u64;

        let mut status = self.chain_status().await?;
        if status.lib_height <= start {
            info!(
                lib = status.lib_height,
                start_height = start,
                "⏭️ LIB not above start height, no gap to backfill"
            );
            return Ok(());
        }

        info!(
            from = start,
            lib = status.lib_height,
            best = status.best_height,
            "📚 Backfilling gap up to LIB"
        );

        let mut from = start;
        while from <= status.lib_height {
            if self.shutdown.is_ended() {
                info!(
                    current_queries = ?self.cursor.current_queries,
                    "🛑 Shutdown requested, stopping gap backfill"
                );
                return Ok(());
            }

            let to = from
                .saturating_add(chunk_size - 1)
                .min(status.lib_height);
            let heights: Vec<u64> = (from..=to).collect();

            let result = self
                .fetcher
                .fetch(
                    &heights,
                    self.config.scan_mode(),
                    self.config.listeners(),
                    ScanType::Gap,
                )
                .await?
                .with_chain_status(&status)
                .with_queried(from..=to);
            self.insert(&result).await?;

            self.cursor.advance_to(to);
            self.metrics.record_cursor(to, status.best_height);
            self.publish();
            info!(
                from,
                to,
                lib = status.lib_height,
                "✅ Gap chunk inserted"
            );

            from = to + 1;
            status = self.chain_status().await?;
        }

        self.cursor.last_best_height = Some(status.best_height);
        self.publish();
        info!(
            current_queries = ?self.cursor.current_queries,
            last_best_height = status.best_height,
            "🏁 Gap backfill complete"
        );

        Ok(())
    }

    fn watch_unconfirmed_window(&self, status: &ChainStatus) {
        let window = status.best_height.saturating_sub(status.lib_height);
        self.metrics.record_unconfirmed_window(window);
        if window > self.config.unconfirmed_block_buffer() {
            warn!(
                window,
                buffer = self.config.unconfirmed_block_buffer(),
                "⚠️ Unconfirmed window exceeds the configured buffer"
            );
        }
    }

    /// One polling cycle: plan, fetch, merge, insert, advance.
    async fn scan_loop_tick(&mut self) -> ScanResult<()> {
        let status = self.chain_status().await?;
        self.watch_unconfirmed_window(&status);

        let lib = status.lib_height.min(status.best_height);
        let result = match self.planner.plan(&status, &self.cursor) {
            TickPlan::Skip(reason) => {
                debug!(
                    ?reason,
                    best = status.best_height,
                    last_best = ?self.cursor.last_best_height,
                    "⏭️ Loop tick skipped"
                );
                self.metrics.record_tick_skipped();
                return Ok(());
            }
            TickPlan::All { finalized, fresh } => {
                let heights: Vec<u64> = finalized.iter().chain(fresh.iter()).copied().collect();
                let batch = self.fetcher.fetch_all(&heights).await?;

                let last_best = self.cursor.last_best_height.unwrap_or(lib);
                let previous = self.cursor.last_loop_result.take();
                let merged = merger::merge(
                    batch,
                    finalized.len(),
                    fresh.len(),
                    lib,
                    last_best,
                    previous,
                )?;
                if !merger::is_strictly_ascending(&merged) {
                    return Err(ScanError::invariant(format!(
                        "merged loop result is not ascending: {:?}",
                        merged.heights()
                    )));
                }
                FetchResult::new(ScanType::Loop, ScanPayload::All(merged)).with_chain_status(&status)
            }
            TickPlan::Listener { heights } => {
                let result = self
                    .fetcher
                    .fetch(
                        &heights,
                        ScanMode::Listener,
                        self.config.listeners(),
                        ScanType::Loop,
                    )
                    .await?
                    .with_chain_status(&status);
                match (heights.first(), heights.last()) {
                    (Some(&first), Some(&last)) => result.with_queried(first..=last),
                    _ => result,
                }
            }
        };

        self.insert(&result).await?;

        let blocks = result.block_count();
        self.cursor.advance_to(lib);
        self.cursor.last_best_height = Some(status.best_height);
        if let ScanPayload::All(batch) = result.payload {
            self.cursor.last_loop_result = Some(batch);
        }
        let current = self.cursor.current_queries.unwrap_or(lib);
        self.metrics.record_cursor(current, status.best_height);
        self.publish();

        info!(
            blocks,
            current_queries = current,
            best = status.best_height,
            lib = status.lib_height,
            "✅ Loop tick inserted"
        );
        Ok(())
    }
}

#[async_trait]
impl<C, S> TickHandler for ScanEngine<C, S>
where
    C: ChainQueryClient + ?Sized + 'static,
    S: DataSink + 'static,
{
    async fn on_tick(&mut self) -> ScanResult<()> {
        self.transition(ScanPhase::Loop)?;
        self.scan_loop_tick().await
    }
}
