//! # Agent executor
//!
//! Runs one round on the agent side: fetch the account's sequence number
//! once, then for each of the `count` operations read the sensor, build the
//! operation with the next local sequence number and dispatch it without
//! waiting for it to settle. Emission is paced relative to the start of each
//! read.
//!
//! Outcomes settle in any order. Each dispatch task records its terminal
//! outcome on the round's [`OperationCounter`], and the round completes once
//! every task handle has been joined, which is also the moment the counter
//! reaches zero.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::SensorFailurePolicy;
use crate::ledger::{Ledger, OperationTemplate, TxRequest};
use crate::operation_counter::{OperationCounter, Outcome, Tally};
use crate::protocol::AgentMessage;
use crate::round::{RoundId, RoundResult, RoundSpec};
use crate::sensor::SensorSource;

/// Everything one round produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub round: RoundId,
    pub result: RoundResult,
    /// Sequence numbers handed to dispatched operations, in issuance order.
    pub sequence_numbers: Vec<u64>,
    pub tally: Tally,
}

pub struct AgentExecutor {
    sensor: Arc<dyn SensorSource>,
    template: OperationTemplate,
    sensor_failure_policy: SensorFailurePolicy,
}

impl AgentExecutor {
    pub fn new(
        sensor: Arc<dyn SensorSource>,
        template: OperationTemplate,
        sensor_failure_policy: SensorFailurePolicy,
    ) -> Self {
        Self {
            sensor,
            template,
            sensor_failure_policy,
        }
    }

    pub fn account(&self) -> &str {
        &self.template.from
    }

    /// Runs `spec` against `ledger` and returns once every dispatched
    /// operation has settled. Per-operation failures are streamed to
    /// `diagnostics` as `err` frames.
    #[tracing::instrument(skip(self, spec, ledger, diagnostics), fields(count = spec.count()))]
    pub async fn run_round(
        &self,
        round: RoundId,
        spec: &RoundSpec,
        ledger: Arc<dyn Ledger>,
        diagnostics: mpsc::UnboundedSender<AgentMessage>,
    ) -> RoundOutcome {
        let started = Instant::now();

        let base = match ledger.sequence_number(self.account()).await {
            Ok(base) => base,
            Err(e) => {
                error!("{}", e);
                let _ = diagnostics.send(AgentMessage::err(Some(round), e.to_string()));
                return RoundOutcome {
                    round,
                    result: RoundResult::new(0, started.elapsed()),
                    sequence_numbers: Vec::new(),
                    tally: Tally {
                        outstanding: 0,
                        completed: 0,
                        failed: spec.count(),
                    },
                };
            }
        };
        debug!("Round {} starts at sequence {}", round, base);

        let count = spec.count();
        let interval = spec.interval();
        let counter = Arc::new(OperationCounter::new(count));
        let mut next_sequence = base;
        let mut sequence_numbers = Vec::with_capacity(count as usize);
        let mut handles: Vec<JoinHandle<Outcome>> = Vec::with_capacity(count as usize);

        for i in 0..count {
            let read_started = Instant::now();
            let reading = match self.sensor.read().await {
                Ok(reading) => reading,
                Err(e) => {
                    error!("Sensor read {} of round {} failed: {}", i, round, e);
                    let _ = diagnostics.send(AgentMessage::err(Some(round), e.to_string()));
                    match self.sensor_failure_policy {
                        SensorFailurePolicy::Abort => {
                            warn!("Aborting round {} after {} dispatches", round, i);
                            counter.record_many(Outcome::Failed, count - i);
                            break;
                        }
                        SensorFailurePolicy::Skip => {
                            counter.record(Outcome::Failed);
                            if i + 1 < count {
                                pace(read_started, interval).await;
                            }
                            continue;
                        }
                    }
                }
            };
            info!(
                "temp: {} time: {}",
                reading.value,
                reading.taken_at.format("%Y-%m-%d %H:%M:%S")
            );

            let sequence = next_sequence;
            next_sequence += 1;
            sequence_numbers.push(sequence);
            let request = self.template.build(sequence, &reading);
            handles.push(tokio::spawn(dispatch(
                round,
                request,
                ledger.clone(),
                counter.clone(),
                diagnostics.clone(),
            )));

            if i + 1 < count {
                pace(read_started, interval).await;
            }
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Dispatch task of round {} failed: {}", round, e);
                counter.record(Outcome::Failed);
            }
        }

        let tally = counter.snapshot();
        debug_assert_eq!(tally.outstanding, 0);
        RoundOutcome {
            round,
            result: RoundResult::new(tally.completed, started.elapsed()),
            sequence_numbers,
            tally,
        }
    }
}

/// Waits until `interval` after `read_started`, or for the whole `interval`
/// when that instant is not representable.
async fn pace(read_started: Instant, interval: Duration) {
    match read_started.checked_add(interval) {
        Some(deadline) => sleep_until(deadline).await,
        None => sleep(interval).await,
    }
}

async fn dispatch(
    round: RoundId,
    request: TxRequest,
    ledger: Arc<dyn Ledger>,
    counter: Arc<OperationCounter>,
    diagnostics: mpsc::UnboundedSender<AgentMessage>,
) -> Outcome {
    let outcome = match ledger.sign(&request).await {
        Ok(signed) => match ledger.submit(&signed).await {
            Ok(receipt) => {
                debug!(
                    "Operation {} included: {} (block {:?})",
                    request.nonce, receipt.transaction_hash, receipt.block_number
                );
                Outcome::Succeeded
            }
            Err(e) => {
                error!("{}", e);
                let _ = diagnostics.send(AgentMessage::err(Some(round), e.to_string()));
                Outcome::Failed
            }
        },
        Err(e) => {
            error!("{}", e);
            let _ = diagnostics.send(AgentMessage::err(Some(round), e.to_string()));
            Outcome::Failed
        }
    };

    match counter.record(outcome) {
        Some(tally) => info!(
            "Task completed: {} of {} operations succeeded",
            tally.completed,
            counter.assigned()
        ),
        None => debug!("{} operations outstanding", counter.outstanding()),
    }
    outcome
}
