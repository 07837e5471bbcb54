//! Tick loop.

use crate::config::{Config, ReportConfig, SchedulerConfig};
use crate::error::RunnerError;
use petrel_core::{CancelSignal, NamedToken, Net, NetDefinition, NetError, NetLayout, TickSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

/// Reads a net definition, choosing YAML or JSON by file extension.
pub fn load_definition(path: impl AsRef<Path>) -> Result<NetDefinition, RunnerError> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).map_err(|e| RunnerError::Io(path.to_path_buf(), e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "net".to_string());

    let definition = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => NetDefinition::from_yaml_str(name, &content)?,
        _ => NetDefinition::from_json_str(name, &content)?,
    };
    Ok(definition)
}

/// Totals of a run plus the final marking.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub committed: u64,
    pub cancelled: u64,
    pub idle: u64,
    /// Whether shutdown cut the run short.
    pub interrupted: bool,
    /// Committed counts keyed by place name, then token name.
    pub marking: BTreeMap<String, BTreeMap<String, i64>>,
}

impl RunReport {
    fn record(&mut self, summary: &TickSummary) {
        self.ticks += 1;
        self.committed += summary.committed as u64;
        self.cancelled += summary.cancelled as u64;
        self.idle += summary.idle as u64;
    }
}

/// Drives a net tick by tick until the round limit or shutdown.
pub struct Runner {
    net: Arc<Net<NamedToken>>,
    layout: NetLayout,
    scheduler: SchedulerConfig,
    report: ReportConfig,
    cancel: CancelSignal,
    notify: Notify,
}

impl Runner {
    /// Creates a runner for an already built net.
    pub fn new(net: Arc<Net<NamedToken>>, layout: NetLayout, config: &Config) -> Self {
        Self {
            net,
            layout,
            scheduler: config.scheduler.clone(),
            report: config.report.clone(),
            cancel: CancelSignal::new(),
            notify: Notify::new(),
        }
    }

    /// Builds a fresh net from `definition` and wraps it in a runner.
    pub fn from_definition(definition: &NetDefinition, config: &Config) -> Result<Self, RunnerError> {
        let net = Net::with_config(&config.scheduler.net_config())?;
        let layout = definition.build_into(&net)?;
        Ok(Self::new(Arc::new(net), layout, config))
    }

    pub fn net(&self) -> &Arc<Net<NamedToken>> {
        &self.net
    }

    pub fn layout(&self) -> &NetLayout {
        &self.layout
    }

    /// Runs rounds until `max_ticks` is reached or [`shutdown`](Runner::shutdown)
    /// is called.
    ///
    /// A round cancelled by shutdown ends the run normally; any other round
    /// failure aborts it.
    pub async fn run(&self) -> Result<RunReport, RunnerError> {
        let mut report = RunReport::default();
        let max_ticks = self.scheduler.max_ticks;
        let interval = self.scheduler.tick_interval();

        tracing::info!(
            "Runner started ({} places, {} transitions, parallel={}, max_ticks={})",
            self.net.place_count(),
            self.net.transition_count(),
            self.scheduler.parallel,
            max_ticks
        );

        loop {
            if max_ticks > 0 && report.ticks >= max_ticks {
                break;
            }
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let result = if self.scheduler.parallel {
                self.net.tick_async(self.cancel.clone()).await
            } else {
                self.net.tick()
            };

            match result {
                Ok(summary) => report.record(&summary),
                Err(NetError::Cancelled { completed, total }) => {
                    tracing::info!(
                        "Round {} cancelled by shutdown ({} of {} transitions ran)",
                        report.ticks + 1,
                        completed,
                        total
                    );
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    tracing::error!("Round {} failed: {}", report.ticks + 1, e);
                    return Err(e.into());
                }
            }

            let every = self.report.log_every_ticks;
            if every > 0 && report.ticks % every == 0 {
                tracing::info!(
                    "After {} ticks: committed={} cancelled={} idle={}",
                    report.ticks,
                    report.committed,
                    report.cancelled,
                    report.idle
                );
            }

            match interval {
                Some(pause) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        report.marking = self.layout.marking();
        tracing::info!(
            "Runner stopped after {} ticks: committed={} cancelled={} idle={}",
            report.ticks,
            report.committed,
            report.cancelled,
            report.idle
        );
        Ok(report)
    }

    /// Signals the runner to stop. An in-flight parallel round is cancelled
    /// before its remaining transitions run.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.notify.notify_one();
    }
}
