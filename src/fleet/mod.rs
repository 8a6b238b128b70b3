//! # Fleet
//!
//! Drives many ADS sessions against one control plane, each posing as a
//! different proxy. Every session measures how long it takes to receive its
//! first cluster and listener pushes, reconnects with backoff when the stream
//! closes, and runs until the fleet is cancelled.

pub mod backoff;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

pub use backoff::Backoff;

use crate::adsc_span;
use crate::config::AdscConfig;
use crate::errors::{AdscError, Result};
use crate::xds::{self, AdsSession, Event, ResourceType, ResponseSnapshot};

/// How long a session waits for its close event before checking again
const CLOSE_POLL: Duration = Duration::from_secs(60);

/// Summary of a fleet run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetReport {
    pub sessions: usize,
    /// Sessions that connected at least once
    pub started: usize,
    /// Sessions that received CDS and LDS within the convergence timeout
    pub converged: usize,
    /// Sessions that gave up on a non-retryable error
    pub failed: usize,
    pub reconnects: u64,
    pub min_convergence: Option<Duration>,
    pub avg_convergence: Option<Duration>,
    pub max_convergence: Option<Duration>,
    /// Whether all stored snapshots are identical; `None` unless responses are stored
    pub consistent: Option<bool>,
}

impl FleetReport {
    fn from_outcomes(sessions: usize, outcomes: &[SessionOutcome]) -> Self {
        let latencies: Vec<Duration> = outcomes.iter().filter_map(|o| o.convergence).collect();
        let avg_convergence = match latencies.len() {
            0 => None,
            count => Some(latencies.iter().sum::<Duration>() / count as u32),
        };

        let snapshots: Vec<&ResponseSnapshot> = outcomes
            .iter()
            .filter_map(|o| o.snapshot.as_ref())
            .collect();
        let consistent = snapshots.split_first().map(|(first, rest)| {
            rest.iter().all(|other| {
                let diff = first.diff(other);
                if !diff.is_empty() {
                    debug!(differences = ?diff, "Session snapshots differ");
                }
                diff.is_empty()
            })
        });

        Self {
            sessions,
            started: outcomes.iter().filter(|o| o.started).count(),
            converged: latencies.len(),
            failed: outcomes.iter().filter(|o| o.error.is_some()).count(),
            reconnects: outcomes.iter().map(|o| o.reconnects).sum(),
            min_convergence: latencies.iter().min().copied(),
            avg_convergence,
            max_convergence: latencies.iter().max().copied(),
            consistent,
        }
    }

    pub fn log(&self) {
        info!(
            sessions = self.sessions,
            started = self.started,
            converged = self.converged,
            failed = self.failed,
            reconnects = self.reconnects,
            min_convergence_ms = self.min_convergence.map(|d| d.as_millis() as u64),
            avg_convergence_ms = self.avg_convergence.map(|d| d.as_millis() as u64),
            max_convergence_ms = self.max_convergence.map(|d| d.as_millis() as u64),
            consistent = ?self.consistent,
            "Fleet run finished"
        );
    }
}

/// What one session slot observed over the run
#[derive(Debug, Default)]
struct SessionOutcome {
    started: bool,
    reconnects: u64,
    convergence: Option<Duration>,
    error: Option<String>,
    snapshot: Option<ResponseSnapshot>,
}

/// A set of sessions sharing one configuration
#[derive(Debug)]
pub struct Fleet {
    config: Arc<AdscConfig>,
    cancel: CancellationToken,
}

impl Fleet {
    pub fn new(config: AdscConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the fleet when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration for session `index`: workload `<workload>-<index>` and
    /// the base IP offset by `index`.
    pub fn session_config(&self, index: usize) -> Result<AdscConfig> {
        let mut config = (*self.config).clone();
        config.identity.workload = format!("{}-{}", self.config.identity.workload, index);
        config.identity.ip = offset_ip(&self.config.identity.ip, index)?.to_string();
        Ok(config)
    }

    /// Run every session until the cancellation token fires.
    pub async fn run(&self) -> Result<FleetReport> {
        let sessions = self.config.fleet.sessions;
        info!(
            sessions,
            address = %self.config.address,
            delta = self.config.delta,
            "Starting fleet"
        );

        let mut tasks = JoinSet::new();
        for index in 0..sessions {
            let config = self.session_config(index)?;
            let cancel = self.cancel.clone();
            let span = adsc_span!("fleet_session", config.identity.workload, index);
            tasks.spawn(run_session(config, cancel).instrument(span));
        }

        let mut outcomes = Vec::with_capacity(sessions);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "Fleet session task failed");
                    outcomes.push(SessionOutcome {
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }

        Ok(FleetReport::from_outcomes(sessions, &outcomes))
    }
}

async fn run_session(config: AdscConfig, cancel: CancellationToken) -> SessionOutcome {
    let mut outcome = SessionOutcome::default();
    let mut backoff = Backoff::from_config(&config.fleet);
    let convergence_timeout = config.fleet.convergence_timeout();

    while !cancel.is_cancelled() {
        let started = Instant::now();
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = xds::connect(&config) => result,
        };
        let session = match connected {
            Ok(session) => session,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Connect failed, backing off");
                if !backoff.wait(&cancel).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Connect failed permanently");
                outcome.error = Some(e.to_string());
                break;
            }
        };

        backoff.reset();
        if outcome.started {
            outcome.reconnects += 1;
        }
        outcome.started = true;

        let converged = tokio::select! {
            _ = cancel.cancelled() => None,
            result = await_convergence(session.as_ref(), convergence_timeout) => Some(result),
        };
        match converged {
            Some(Ok(())) => {
                let elapsed = started.elapsed();
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Session converged");
                outcome.convergence.get_or_insert(elapsed);
            }
            Some(Err(e)) => warn!(error = %e, "Session did not converge"),
            None => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if config.store_responses {
                    outcome.snapshot = Some(session.responses());
                }
                session.close();
                break;
            }
            _ = wait_for_close(session.as_ref()) => {
                info!("Session closed, reconnecting");
                if !backoff.wait(&cancel).await {
                    break;
                }
            }
        }
    }

    outcome
}

/// Wait for the first CDS push and then the first LDS push.
async fn await_convergence(session: &dyn AdsSession, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    for kind in [ResourceType::Cluster, ResourceType::Listener] {
        let remaining = deadline.saturating_duration_since(Instant::now());
        session.wait(Some(Event::Update(kind)), remaining).await?;
    }
    Ok(())
}

async fn wait_for_close(session: &dyn AdsSession) {
    loop {
        match session.wait(Some(Event::Close), CLOSE_POLL).await {
            Err(AdscError::Timeout { .. }) => continue,
            _ => return,
        }
    }
}

fn offset_ip(base: &str, offset: usize) -> Result<IpAddr> {
    let invalid = || {
        AdscError::validation_field(
            format!("Cannot offset IP '{}' by {}", base, offset),
            "ip",
        )
    };
    let ip: IpAddr = base.parse().map_err(|_| invalid())?;
    match ip {
        IpAddr::V4(v4) => u32::from(v4)
            .checked_add(u32::try_from(offset).map_err(|_| invalid())?)
            .map(|n| IpAddr::V4(n.into()))
            .ok_or_else(invalid),
        IpAddr::V6(v6) => u128::from(v6)
            .checked_add(offset as u128)
            .map(|n| IpAddr::V6(n.into()))
            .ok_or_else(invalid),
    }
}
