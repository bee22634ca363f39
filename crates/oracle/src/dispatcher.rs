//! Dispatcher: one raw `Incoming` log in, at most one response transaction out.
//!
//! Per event: parse → registry lookup → resolve → encode → submit. [Dispatcher::run] handles
//! each event in its own task, started in delivery order, so a slow data source or a pending
//! submission never holds up intake of the next event.
//!
//! Failure handling:
//! - malformed event: logged, dropped.
//! - endpoint not in the registry: dropped with a debug log (other oracles share the stream).
//! - resolver failure: per [ResolverErrorPolicy]; by default logged and left unanswered.
//! - submission failure: logged, not retried.

use crate::abi::decode_incoming_log;
use crate::encoder::encode;
use crate::query::QueryRecord;
use crate::registry::{ResolverEntry, ResolverRegistry};
use crate::resolver::ResolverError;
use crate::submitter::{Response, SubmissionError, SubmissionResult, Submitter};
use alloy::primitives::B256;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// What to write on-chain when a resolver fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverErrorPolicy {
    /// Leave the query unanswered.
    #[default]
    Drop,
    /// Answer with this text instead.
    Respond(String),
}

#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub on_resolver_error: ResolverErrorPolicy,
    /// Deadline per resolver call. None waits indefinitely.
    pub resolver_timeout: Option<Duration>,
    /// Max concurrent resolver calls. None is unbounded; `Some(0)` behaves as 1.
    pub max_in_flight: Option<usize>,
}

/// Result of a dispatch that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Answered {
        query_id: B256,
        result: SubmissionResult,
    },
    /// Resolver failed and the error text was written instead ([ResolverErrorPolicy::Respond]).
    AnsweredWithError {
        query_id: B256,
        result: SubmissionResult,
        reason: String,
    },
    /// Endpoint not served by this oracle.
    Ignored { endpoint: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed Incoming event: {0:#}")]
    Parse(anyhow::Error),
    #[error("query {query_id}: resolver failed: {source}")]
    Resolver {
        query_id: String,
        source: ResolverError,
    },
    #[error("query {query_id}: submission failed: {source}")]
    Submission {
        query_id: String,
        source: SubmissionError,
    },
}

/// Counts of dispatch results over one [Dispatcher::run].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub answered: usize,
    pub ignored: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    registry: Arc<ResolverRegistry>,
    submitter: Arc<dyn Submitter>,
    config: DispatchConfig,
    limiter: Option<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ResolverRegistry>,
        submitter: Arc<dyn Submitter>,
        config: DispatchConfig,
    ) -> Self {
        let limiter = config.max_in_flight.map(|n| Semaphore::new(n.max(1)));
        Self {
            registry,
            submitter,
            config,
            limiter,
        }
    }

    /// Handle one raw log. Every failure is logged here as well as returned.
    pub async fn handle(&self, raw: &Value) -> Result<DispatchOutcome, DispatchError> {
        let result = self.dispatch(raw).await;
        if let Err(e) = &result {
            match e {
                DispatchError::Parse(_) => tracing::warn!(reason = %e, "dropping event"),
                DispatchError::Resolver { query_id, source } => {
                    tracing::warn!(%query_id, reason = %source, "resolver failed, query left unanswered")
                }
                DispatchError::Submission { query_id, source } => {
                    tracing::error!(%query_id, reason = %source, "response submission failed")
                }
            }
        }
        result
    }

    async fn dispatch(&self, raw: &Value) -> Result<DispatchOutcome, DispatchError> {
        let query = decode_incoming_log(raw).map_err(DispatchError::Parse)?;
        let query_id = query.short_id();
        let entry = match self.registry.lookup(&query.endpoint) {
            Ok(entry) => entry,
            Err(_) => {
                tracing::debug!(%query_id, endpoint = %query.endpoint, "no resolver for endpoint");
                return Ok(DispatchOutcome::Ignored {
                    endpoint: query.endpoint,
                });
            }
        };
        tracing::info!(
            %query_id,
            endpoint = %query.endpoint,
            subscriber = %query.subscriber,
            origin = query.origin(),
            query = %query.query,
            params = ?query.endpoint_params,
            "received query"
        );

        let (answer, failure) = match self.resolve(entry, &query).await {
            Ok(answer) => (answer, None),
            Err(source) => match &self.config.on_resolver_error {
                ResolverErrorPolicy::Drop => {
                    return Err(DispatchError::Resolver { query_id, source });
                }
                ResolverErrorPolicy::Respond(text) => {
                    tracing::warn!(%query_id, reason = %source, "resolver failed, responding with error text");
                    (text.clone(), Some(source.to_string()))
                }
            },
        };
        if answer.is_empty() {
            tracing::warn!(%query_id, "empty answer, responding with no words");
        }

        let response = Response {
            query_id: query.query_id,
            params: encode(&answer),
        };
        let result = self
            .submitter
            .respond(&response)
            .await
            .map_err(|source| DispatchError::Submission {
                query_id: query_id.clone(),
                source,
            })?;
        tracing::info!(
            %query_id,
            subscriber = %query.subscriber,
            tx_hash = %result.transaction_hash,
            words = response.params.len(),
            dynamic = Response::DYNAMIC,
            "responded"
        );
        Ok(match failure {
            None => DispatchOutcome::Answered {
                query_id: query.query_id,
                result,
            },
            Some(reason) => DispatchOutcome::AnsweredWithError {
                query_id: query.query_id,
                result,
                reason,
            },
        })
    }

    async fn resolve(&self, entry: &ResolverEntry, query: &QueryRecord) -> Result<String, ResolverError> {
        // Held for the resolver call only; waiting here never blocks intake.
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| ResolverError::Other(e.to_string()))?,
            ),
            None => None,
        };
        let call = entry.resolver().resolve(query);
        match self.config.resolver_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ResolverError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Dispatch every event from `events` until the channel closes, then wait for in-flight
    /// dispatches to finish.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Value>) -> RunSummary {
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();
        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(raw) => {
                        let dispatcher = Arc::clone(&self);
                        tasks.spawn(async move { dispatcher.handle(&raw).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    summary.record(joined);
                }
            }
        }
        while let Some(joined) = tasks.join_next().await {
            summary.record(joined);
        }
        tracing::info!(
            answered = summary.answered,
            ignored = summary.ignored,
            failed = summary.failed,
            "event stream closed"
        );
        summary
    }
}

impl RunSummary {
    fn record(
        &mut self,
        joined: Result<Result<DispatchOutcome, DispatchError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(DispatchOutcome::Ignored { .. })) => self.ignored += 1,
            Ok(Ok(_)) => self.answered += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                tracing::error!(reason = %e, "dispatch task panicked");
                self.failed += 1;
            }
        }
    }
}
