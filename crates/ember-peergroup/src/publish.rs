//! Background delivery of controller addresses to the publisher.
//!
//! The reconciler hands each pass's [`PublishInfo`] to a `watch` channel and
//! moves on. This task delivers the newest value, retrying failures with
//! backoff. A value that arrives while a retry is pending replaces the stale
//! one, so only the latest address set is ever re-sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::ports::{PublishInfo, Publisher};
use crate::reconciler::wait_for_stop;

/// Spawns the delivery task.
///
/// The task ends when `stop` fires or when every sender of `updates` is gone.
pub(crate) fn spawn(
    publisher: Arc<dyn Publisher>,
    updates: watch::Receiver<Option<PublishInfo>>,
    stop: watch::Receiver<bool>,
    initial_retry: Duration,
    max_retry: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(publisher, updates, stop, Backoff::new(initial_retry, max_retry)).await;
    })
}

async fn run(
    publisher: Arc<dyn Publisher>,
    mut updates: watch::Receiver<Option<PublishInfo>>,
    mut stop: watch::Receiver<bool>,
    mut backoff: Backoff,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => return,
            changed = updates.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let mut pending = updates.borrow_and_update().clone();
        backoff.reset();

        while let Some(info) = pending.take() {
            match publisher.publish(&info).await {
                Ok(()) => {
                    debug!(servers = info.servers.len(), "published controller addresses");
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(retry_in = ?delay, "cannot publish controller addresses: {e}");
                    tokio::select! {
                        biased;
                        _ = wait_for_stop(&mut stop) => return,
                        changed = updates.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            debug!("newer address set superseded pending publish");
                            pending = updates.borrow_and_update().clone();
                            backoff.reset();
                        }
                        _ = tokio::time::sleep(delay) => {
                            pending = Some(info);
                        }
                    }
                }
            }
        }
    }
}
