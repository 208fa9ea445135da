use std::ffi::OsString;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream};

use crate::dispatch::Dispatcher;
use crate::events::ChangeEvent;
use crate::sub::{EventSink, Subscription};

const CHANNEL_CAPACITY: usize = 32;

/// [`EventSink`] that forwards change events into a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ChangeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing_impl::warn!(
                    path = %event.path.display(),
                    "consumer queue full, dropping change event"
                );
            }
            // The consumer went away; the subscription is mid-teardown.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Stream of change events for one subscription.
///
/// Dropping the stream cancels the subscription.
pub struct MonitorStream {
    events: ReceiverStream<ChangeEvent>,
    sub: Arc<Subscription>,
    dispatcher: Dispatcher,
}

impl MonitorStream {
    pub fn subscription(&self) -> &Arc<Subscription> {
        &self.sub
    }

    /// Cancel explicitly rather than by drop.
    pub fn cancel(self) {}
}

impl Stream for MonitorStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for MonitorStream {
    fn drop(&mut self) {
        self.dispatcher.cancel(&self.sub);
    }
}

impl Dispatcher {
    /// Monitor the contents of a directory.
    pub fn monitor_directory(&self, path: impl Into<PathBuf>) -> MonitorStream {
        let (sink, rx) = ChannelSink::new(CHANNEL_CAPACITY);
        let sub = Subscription::directory(path, Box::new(sink));

        self.add(sub.clone());

        MonitorStream {
            events: ReceiverStream::new(rx),
            sub,
            dispatcher: self.clone(),
        }
    }

    /// Monitor a single entry within a directory.
    pub fn monitor_file(
        &self,
        path: impl Into<PathBuf>,
        leaf_name: impl Into<OsString>,
    ) -> MonitorStream {
        let (sink, rx) = ChannelSink::new(CHANNEL_CAPACITY);
        let sub = Subscription::file(path, leaf_name, Box::new(sink));

        self.add(sub.clone());

        MonitorStream {
            events: ReceiverStream::new(rx),
            sub,
            dispatcher: self.clone(),
        }
    }
}
