//! Action correlator: a single-writer actor over the in-flight action map
//!
//! Session tasks never touch the map; they send commands. That keeps the
//! at-most-one-entry invariant local to one task and avoids any lock
//! ordering between the registry and the correlator. All entry deadlines
//! share one timer wheel ([`DelayQueue`]) instead of a sleep task per entry.
//!
//! Forwards to an originator are non-blocking enqueues from the actor
//! thread, so a request's ack can never be reordered after its result. Only
//! the orchestrator→game-client relay waits out the configured send budget,
//! in a spawned task that reports failure back as a command.

use crate::bridge::registry::SessionRegistry;
use crate::bridge::session::{EnqueueError, SessionHandle};
use crate::estop;
use crate::metrics::BridgeMetrics;
use gamebridge_common::config::TimeoutsConfig;
use gamebridge_common::wall_unix_ms;
use gamebridge_protocol::{
    ActionAck, ActionRequest, ActionResult, ActionStatus, ErrorFrame, Payload, Role,
};
use kanal::{bounded_async, AsyncReceiver, AsyncSender};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command mailbox depth. Commands are small and handled quickly; this only
/// bounds bursts.
const COMMAND_DEPTH: usize = 256;

/// Recently-terminal request ids kept for duplicate suppression.
const RECENT_CAPACITY: usize = 1024;
const RECENT_HORIZON: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) enum Command {
    Relay {
        originator: Uuid,
        request: ActionRequest,
    },
    AckObserved {
        from: Uuid,
        ack: ActionAck,
    },
    ResultObserved {
        from: Uuid,
        result: ActionResult,
    },
    ErrorObserved {
        frame: ErrorFrame,
    },
    RelayFailed {
        request_id: String,
        congested: bool,
    },
    SessionClosed {
        session_id: Uuid,
    },
}

/// Cloneable command side of the correlator actor.
#[derive(Clone)]
pub(crate) struct CorrelatorHandle {
    tx: AsyncSender<Command>,
}

impl CorrelatorHandle {
    async fn send(&self, command: Command) {
        // An error here means the actor is gone, which only happens at
        // process teardown.
        let _ = self.tx.send(command).await;
    }

    pub async fn relay(&self, originator: Uuid, request: ActionRequest) {
        self.send(Command::Relay {
            originator,
            request,
        })
        .await;
    }

    pub async fn ack_observed(&self, from: Uuid, ack: ActionAck) {
        self.send(Command::AckObserved { from, ack }).await;
    }

    pub async fn result_observed(&self, from: Uuid, result: ActionResult) {
        self.send(Command::ResultObserved { from, result }).await;
    }

    pub async fn error_observed(&self, frame: ErrorFrame) {
        self.send(Command::ErrorObserved { frame }).await;
    }

    pub async fn session_closed(&self, session_id: Uuid) {
        self.send(Command::SessionClosed { session_id }).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingAck,
    AwaitingResult,
}

/// The correlator's record of one in-flight action. Terminal entries are
/// removed, never kept.
struct ActionEntry {
    /// None for bridge-synthesized requests (emergency stop)
    originator: Option<Uuid>,
    target: Uuid,
    target_agent_id: String,
    phase: Phase,
    stop_all: bool,
    timer: delay_queue::Key,
}

/// Bounded set of recently-terminal request ids with a time horizon, so
/// retries from buggy clients are cleanly rejected.
struct RecentRequests {
    capacity: usize,
    horizon: Duration,
    map: HashMap<String, Instant>,
    order: VecDeque<(Instant, String)>,
}

impl RecentRequests {
    fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity,
            horizon,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, request_id: String) {
        self.prune();
        if self.map.len() >= self.capacity {
            if let Some((_, oldest)) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        let now = Instant::now();
        self.map.insert(request_id.clone(), now);
        self.order.push_back((now, request_id));
    }

    fn contains(&self, request_id: &str) -> bool {
        self.map
            .get(request_id)
            .is_some_and(|t| t.elapsed() < self.horizon)
    }

    fn prune(&mut self) {
        while let Some((inserted, _)) = self.order.front() {
            if inserted.elapsed() < self.horizon {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.map.remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }
}

struct Correlator {
    tx: AsyncSender<Command>,
    rx: AsyncReceiver<Command>,
    registry: SessionRegistry,
    metrics: Arc<BridgeMetrics>,
    timeouts: TimeoutsConfig,
    entries: HashMap<String, ActionEntry>,
    timers: DelayQueue<String>,
    recent: RecentRequests,
}

/// Start the correlator actor.
pub(crate) fn spawn(
    registry: SessionRegistry,
    metrics: Arc<BridgeMetrics>,
    timeouts: TimeoutsConfig,
) -> CorrelatorHandle {
    let (tx, rx) = bounded_async(COMMAND_DEPTH);
    let actor = Correlator {
        tx: tx.clone(),
        rx,
        registry,
        metrics,
        timeouts,
        entries: HashMap::new(),
        timers: DelayQueue::new(),
        recent: RecentRequests::new(RECENT_CAPACITY, RECENT_HORIZON),
    };
    tokio::spawn(run(actor));
    CorrelatorHandle { tx }
}

async fn next_expired(timers: &mut DelayQueue<String>) -> Option<delay_queue::Expired<String>> {
    futures::future::poll_fn(|cx| timers.poll_expired(cx)).await
}

async fn run(mut actor: Correlator) {
    loop {
        let has_timers = !actor.timers.is_empty();
        tokio::select! {
            command = actor.rx.recv() => match command {
                Ok(command) => actor.handle(command),
                Err(_) => break,
            },
            Some(expired) = next_expired(&mut actor.timers), if has_timers => {
                actor.on_deadline(expired.into_inner());
            }
        }
    }
    debug!("correlator stopped");
}

impl Correlator {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Relay {
                originator,
                request,
            } => self.on_relay(originator, request),
            Command::AckObserved { from, ack } => self.on_ack(from, ack),
            Command::ResultObserved { from, result } => self.on_result(from, result),
            Command::ErrorObserved { frame } => self.on_error(frame),
            Command::RelayFailed {
                request_id,
                congested,
            } => self.on_relay_failed(&request_id, congested),
            Command::SessionClosed { session_id } => self.on_session_closed(session_id),
        }
    }

    fn on_relay(&mut self, originator: Uuid, request: ActionRequest) {
        let request_id = request.request_id.clone();

        if self.entries.contains_key(&request_id) || self.recent.contains(&request_id) {
            debug!(request_id = %request_id, "duplicate action request");
            BridgeMetrics::incr(&self.metrics.actions_rejected);
            self.reject(originator, &request_id, "duplicate");
            return;
        }

        let target = if request.target_agent_id.is_empty() {
            self.registry.unique_game_client()
        } else {
            self.registry.find(Role::GameClient, &request.target_agent_id)
        };
        let Some(target) = target else {
            debug!(
                request_id = %request_id,
                target = %request.target_agent_id,
                "no unique target for action"
            );
            BridgeMetrics::incr(&self.metrics.actions_rejected);
            self.reject(originator, &request_id, "no unique target");
            return;
        };

        BridgeMetrics::incr(&self.metrics.actions_relayed);
        self.open_entry(Some(originator), request, &target);
    }

    /// Insert an entry, arm its deadline, and hand the request to the
    /// target's queue.
    fn open_entry(
        &mut self,
        originator: Option<Uuid>,
        request: ActionRequest,
        target: &SessionHandle,
    ) {
        let request_id = request.request_id.clone();
        let now = wall_unix_ms();
        let cap = now + self.timeouts.action_default_ttl_ms;
        let deadline = if request.expires_at_unix_ms == 0 {
            cap
        } else {
            request.expires_at_unix_ms.min(cap)
        };
        let delay = Duration::from_millis(deadline.saturating_sub(now));
        let timer = self.timers.insert(request_id.clone(), delay);

        self.entries.insert(
            request_id,
            ActionEntry {
                originator,
                target: target.session_id(),
                target_agent_id: target.agent_id().to_string(),
                phase: Phase::AwaitingAck,
                stop_all: request.body.is_stop_all(),
                timer,
            },
        );
        self.dispatch(target.clone(), request);
    }

    /// Enqueue toward the target with the action send budget, off the actor
    /// thread. Failure comes back as a command so terminalization happens
    /// under the single writer.
    fn dispatch(&self, target: SessionHandle, request: ActionRequest) {
        let command_tx = self.tx.clone();
        let budget = Duration::from_millis(self.timeouts.send_action_ms);
        let request_id = request.request_id.clone();
        tokio::spawn(async move {
            let outcome = target
                .send_ordered(Payload::ActionRequest(Box::new(request)), budget)
                .await;
            let congested = match outcome {
                Ok(()) => return,
                Err(EnqueueError::Congested) => true,
                Err(EnqueueError::Closed) => false,
            };
            let _ = command_tx
                .send(Command::RelayFailed {
                    request_id,
                    congested,
                })
                .await;
        });
    }

    fn on_ack(&mut self, from: Uuid, ack: ActionAck) {
        let originator = {
            let Some(entry) = self.entries.get_mut(&ack.request_id) else {
                debug!(request_id = %ack.request_id, "ack for unknown or finished action");
                return;
            };
            if entry.target != from {
                warn!(
                    request_id = %ack.request_id,
                    "ack from a session that is not the action target"
                );
                return;
            }
            if ack.accepted && entry.phase == Phase::AwaitingAck {
                entry.phase = Phase::AwaitingResult;
            }
            // The deadline stays armed either way; only a terminal result
            // clears it.
            entry.originator
        };
        if let Some(originator) = originator {
            self.forward(originator, Payload::ActionAck(ack));
        }
    }

    fn on_result(&mut self, from: Uuid, result: ActionResult) {
        match self.entries.get(&result.request_id) {
            None => {
                debug!(request_id = %result.request_id, "result for unknown or finished action");
                return;
            }
            Some(entry) if entry.target != from => {
                warn!(
                    request_id = %result.request_id,
                    "result from a session that is not the action target"
                );
                return;
            }
            Some(_) => {}
        }

        // Terminal: destroy the entry, disarm the deadline, remember the id.
        #[allow(clippy::unwrap_used)]
        let entry = self.entries.remove(&result.request_id).unwrap();
        self.timers.remove(&entry.timer);
        self.recent.insert(result.request_id.clone());
        BridgeMetrics::incr(&self.metrics.actions_completed);

        match entry.originator {
            Some(originator) => self.forward(originator, Payload::ActionResult(result)),
            None => info!(
                request_id = %result.request_id,
                status = ?result.status,
                "emergency stop finished"
            ),
        }
    }

    fn on_error(&mut self, frame: ErrorFrame) {
        let Some(request_id) = frame.request_id.as_deref() else {
            return;
        };
        let Some(entry) = self.entries.get(request_id) else {
            debug!(request_id = %request_id, "correlated error for unknown action");
            return;
        };
        if let Some(originator) = entry.originator {
            self.forward(originator, Payload::Error(frame));
        }
    }

    fn on_relay_failed(&mut self, request_id: &str, congested: bool) {
        // The deadline may have fired while the enqueue was pending.
        let Some(entry) = self.entries.remove(request_id) else {
            return;
        };
        self.timers.remove(&entry.timer);
        self.recent.insert(request_id.to_string());
        BridgeMetrics::incr(&self.metrics.actions_rejected);

        let reason = if congested {
            "relay congested"
        } else {
            "target unroutable"
        };
        match entry.originator {
            Some(originator) => self.reject(originator, request_id, reason),
            None => warn!(
                request_id = %request_id,
                reason,
                "emergency stop could not be relayed"
            ),
        }
    }

    fn on_session_closed(&mut self, session_id: Uuid) {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.originator == Some(session_id))
            .map(|(id, _)| id.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }
        info!(
            session_id = %session_id,
            count = doomed.len(),
            "destroying in-flight actions; originator disconnected"
        );
        for request_id in doomed {
            if let Some(entry) = self.entries.remove(&request_id) {
                self.timers.remove(&entry.timer);
                self.recent.insert(request_id);
            }
        }
        // Entries *targeting* the closed session run out their deadlines,
        // which is the timeout path the originator was promised.
    }

    fn on_deadline(&mut self, request_id: String) {
        let Some(entry) = self.entries.remove(&request_id) else {
            return;
        };
        self.recent.insert(request_id.clone());
        BridgeMetrics::incr(&self.metrics.actions_timed_out);
        warn!(
            request_id = %request_id,
            target = %entry.target_agent_id,
            "action deadline exceeded"
        );

        if let Some(originator) = entry.originator {
            self.forward(
                originator,
                Payload::ActionResult(ActionResult {
                    request_id: request_id.clone(),
                    status: ActionStatus::Timeout,
                    detail: "ack/result deadline exceeded".to_string(),
                }),
            );
        }

        // A timed-out STOP_ALL must not spawn another one.
        if !entry.stop_all {
            self.emergency_stop(&entry.target_agent_id);
        }
    }

    fn emergency_stop(&mut self, target_agent_id: &str) {
        let Some(target) = self.registry.find(Role::GameClient, target_agent_id) else {
            warn!(
                target = %target_agent_id,
                "emergency stop target no longer connected"
            );
            return;
        };
        let request = estop::stop_all_request(target_agent_id);
        info!(
            request_id = %request.request_id,
            target = %target_agent_id,
            "issuing emergency stop"
        );
        BridgeMetrics::incr(&self.metrics.emergency_stops);
        self.open_entry(None, request, &target);
    }

    /// Answer a request that never opened (or no longer has) a live entry:
    /// a refused ack followed by a terminal rejection, in that order, through
    /// the originator's ordered queue.
    fn reject(&self, originator: Uuid, request_id: &str, reason: &str) {
        self.forward(
            originator,
            Payload::ActionAck(ActionAck {
                request_id: request_id.to_string(),
                accepted: false,
                reason: reason.to_string(),
            }),
        );
        self.forward(
            originator,
            Payload::ActionResult(ActionResult {
                request_id: request_id.to_string(),
                status: ActionStatus::Rejected,
                detail: reason.to_string(),
            }),
        );
    }

    /// Non-blocking enqueue toward an originator. Dropping on congestion is
    /// the telemetry-style policy: the orchestrator's queue being full means
    /// it is not consuming; stalling the correlator would not help it.
    fn forward(&self, session_id: Uuid, payload: Payload) {
        let Some(handle) = self.registry.get(&session_id) else {
            debug!(session_id = %session_id, "forward target gone");
            return;
        };
        match handle.try_send_ordered(payload) {
            Ok(()) => {}
            Err(EnqueueError::Congested) => warn!(
                session_id = %session_id,
                "originator queue congested, dropping relay payload"
            ),
            Err(EnqueueError::Closed) => {
                debug!(session_id = %session_id, "originator queue closed");
            }
        }
    }
}
