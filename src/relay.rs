//! Per-message dispatch pipeline for the MQTT relay.
//!
//! Every inbound publish runs through [`Dispatcher::handle`] exactly once:
//! decode, route-filter, normalize, trace, encode, publish. The dispatcher
//! carries no state between messages, so concurrent dispatches need no
//! coordination. Every failure here is terminal to its own message only —
//! it is logged and the message dropped, never surfaced to the session.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::codec::{self, Callback, ResultEnvelope};
use crate::dns;
use crate::trace::Tracer;

/// Suffix appended to the inbound topic for results.
pub const RESULT_SUFFIX: &str = "result";

/// Outbound seam to the broker. Implemented by the session manager; tests
/// substitute a recording stub.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// The task dispatch engine.
pub struct Dispatcher {
    tracer: Tracer,
}

impl Dispatcher {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    /// Handle one inbound message. Never returns an error: a bad task must
    /// not be able to stop the subscription.
    pub async fn handle(
        &self,
        payload: &[u8],
        client_id: &str,
        topic: &str,
        publisher: &dyn ResultPublisher,
    ) {
        if payload.is_empty() {
            warn!(client_id, topic, "dropping empty payload");
            return;
        }

        let task = match codec::decode_task(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, topic, "dropping undecodable payload");
                debug!(payload = %String::from_utf8_lossy(payload), "offending payload");
                return;
            }
        };

        // Shared topic namespace: tasks for other workers are noise, not
        // errors.
        if task.region != client_id {
            debug!(region = %task.region, client_id, "task addressed to another worker");
            return;
        }

        let result_topic = format!("{topic}/{RESULT_SUFFIX}");

        let source_ip = match dns::resolve_target(&task.target).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(target = %task.target, error = %e, "resolution failed, using target verbatim");
                task.target.clone()
            }
        };

        let (synthetic, trace_params) = dns::apply_dot_fallback(&source_ip, &task.params);
        info!(region = %task.region, target = %task.target, synthetic, "handling trace task");
        debug!(source = %task.source_name, params = ?trace_params, "trace parameters");

        let result = match self.tracer.run(&task.target, &trace_params).await {
            Ok(output) => output,
            Err(e) => {
                warn!(target = %task.target, error = %e, "trace failed");
                let partial = e.partial_output();
                if partial.is_empty() {
                    match codec::encode_error(&e.to_string()) {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        Err(enc) => {
                            warn!(error = %enc, "dropping task, error body unencodable");
                            return;
                        }
                    }
                } else {
                    partial.to_string()
                }
            }
        };

        let envelope = ResultEnvelope {
            result,
            callback: Callback {
                region: task.region.clone(),
                target: task.target.clone(),
                source_ip,
                source_id: task.source_id,
                source_name: task.source_name,
            },
        };

        let bytes = match codec::encode_envelope(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable envelope");
                return;
            }
        };

        // Best effort: a failed publish is logged and forgotten.
        match publisher.publish(&result_topic, bytes).await {
            Ok(()) => info!(region = %task.region, topic = %result_topic, "published result"),
            Err(e) => warn!(topic = %result_topic, error = %e, "publish failed"),
        }
    }
}
