//! Bounded FIFO queues connecting the webhook intake, the adapter, and
//! the logic worker.
//!
//! The HTTP layer enqueues without blocking (`try_send`; a full queue
//! turns into a 503), everything downstream blocks, so backpressure from
//! a slow logic worker propagates through the adapter all the way to the
//! HTTP response.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use hoff_core::Event;

use crate::webhook::HostEvent;

/// Queue capacity used when the configuration does not specify one.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Items on the webhook intake queue. `None` is the stop sentinel: it
/// drains through the adapter into the logic worker, which exits cleanly.
pub type WebhookItem = Option<HostEvent>;

/// Items on the main logic queue, with the same `None` sentinel.
pub type LogicItem = Option<Event>;

pub type WebhookSender = SyncSender<WebhookItem>;
pub type WebhookReceiver = Receiver<WebhookItem>;
pub type LogicSender = SyncSender<LogicItem>;
pub type LogicReceiver = Receiver<LogicItem>;

pub fn webhook_queue(capacity: usize) -> (WebhookSender, WebhookReceiver) {
    sync_channel(capacity)
}

pub fn logic_queue(capacity: usize) -> (LogicSender, LogicReceiver) {
    sync_channel(capacity)
}
