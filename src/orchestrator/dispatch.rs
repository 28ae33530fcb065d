//! Event fan-out: one task per inbound event, drained on shutdown.

use crate::messaging::SlackEvent;
use crate::orchestrator::MentionHandler;

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// How the in-flight events fared when dispatch stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events whose handling finished during the drain.
    pub drained: usize,
    /// Events still running when the grace period ran out.
    pub aborted: usize,
}

/// Handle events until `shutdown` resolves or the event stream closes, then
/// wait up to `grace` for in-flight events before aborting them.
pub async fn dispatch_events(
    handler: MentionHandler,
    mut events: mpsc::Receiver<SlackEvent>,
    shutdown: impl Future<Output = ()>,
    grace: Duration,
) -> DrainReport {
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("slack event stream closed");
                    break;
                };
                let handler = handler.clone();
                tasks.spawn(async move { handle_event(&handler, event).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_joined(joined),
            () = &mut shutdown => {
                tracing::info!(in_flight = tasks.len(), "shutting down");
                break;
            }
        }
    }

    let mut report = DrainReport::default();
    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            report.drained += 1;
            log_joined(joined);
        }
    };

    if tokio::time::timeout(grace, drain).await.is_err() {
        report.aborted = tasks.len();
        tracing::warn!(
            aborted = report.aborted,
            grace_secs = grace.as_secs_f64(),
            "shutdown grace expired, aborting in-flight events"
        );
        tasks.shutdown().await;
    }

    report
}

async fn handle_event(handler: &MentionHandler, event: SlackEvent) {
    let outcome = match &event {
        SlackEvent::Mention(mention) => handler.handle_mention(mention).await,
        SlackEvent::ThreadMessage(message) => handler.record_thread_message(message).await,
    };
    if let Err(error) = outcome {
        tracing::error!(%error, "failed to handle slack event");
    }
}

fn log_joined(joined: Result<(), JoinError>) {
    if let Err(error) = joined {
        if error.is_panic() {
            tracing::error!(%error, "slack event task panicked");
        }
    }
}
