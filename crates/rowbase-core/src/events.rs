//! Row change notifications.
//!
//! After a successful create, update or delete the row store submits a
//! [`RowEvent`] with `try_send`. A full or closed channel drops the event
//! with a warning; the write it describes has already committed.

use std::future::Future;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ids::{EntityId, RowId, TenantId};

/// What happened to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Created,
    Updated,
    Deleted,
}

/// A committed row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEvent {
    pub entity: String,
    pub entity_id: EntityId,
    pub row_id: RowId,
    pub tenant_id: Option<TenantId>,
    pub action: RowAction,
}

/// Event channel sender.
pub type EventSender = mpsc::Sender<RowEvent>;

/// Event channel receiver.
pub type EventReceiver = mpsc::Receiver<RowEvent>;

/// Sending half held by the row store.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<EventSender>,
}

impl EventSink {
    /// A bounded channel with the given buffer size.
    pub fn channel(buffer_size: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Submit an event without waiting.
    pub fn notify(&self, event: RowEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(event) {
            let event = match &err {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            warn!(
                entity = %event.entity,
                row = %event.row_id,
                action = ?event.action,
                error = %err,
                "dropping row event"
            );
        }
    }
}

/// Consumer of row events, such as a webhook dispatcher.
pub trait RowEventHandler: Send + Sync + 'static {
    fn handle(&self, event: &RowEvent) -> impl Future<Output = Result<(), String>> + Send;
}

/// Deliver events to a handler until the channel closes.
///
/// Handler failures are logged and never reach the writer.
pub fn spawn_dispatcher<H: RowEventHandler>(mut rx: EventReceiver, handler: H) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("row event dispatcher started");
        while let Some(event) = rx.recv().await {
            debug!(entity = %event.entity, row = %event.row_id, action = ?event.action, "dispatching row event");
            if let Err(reason) = handler.handle(&event).await {
                warn!(entity = %event.entity, row = %event.row_id, %reason, "row event handler failed");
            }
        }
        info!("row event dispatcher stopped (channel closed)");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn event(action: RowAction) -> RowEvent {
        RowEvent {
            entity: "Invoice".into(),
            entity_id: EntityId::new(),
            row_id: RowId::new(),
            tenant_id: None,
            action,
        }
    }

    struct Recorder(Arc<Mutex<Vec<RowAction>>>);

    impl RowEventHandler for Recorder {
        async fn handle(&self, event: &RowEvent) -> Result<(), String> {
            self.0.lock().await.push(event.action);
            if event.action == RowAction::Deleted {
                Err("endpoint unreachable".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_dispatcher_survives_handler_failures() {
        let (sink, rx) = EventSink::channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = spawn_dispatcher(rx, Recorder(Arc::clone(&seen)));

        sink.notify(event(RowAction::Deleted));
        sink.notify(event(RowAction::Created));
        drop(sink);
        task.await.unwrap();

        assert_eq!(*seen.lock().await, vec![RowAction::Deleted, RowAction::Created]);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.notify(event(RowAction::Created));
        sink.notify(event(RowAction::Updated));
        assert_eq!(rx.recv().await.unwrap().action, RowAction::Created);
        assert!(rx.try_recv().is_err());
        EventSink::disabled().notify(event(RowAction::Created));
    }
}
