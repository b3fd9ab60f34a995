//! Backlog reconciliation.
//!
//! Stateless glue between the queue and the transport: when the broker is
//! reachable, drain buffered records to the data topic in FIFO order,
//! stopping at the first failure so nothing is delivered out of order and
//! no gap opens in the backlog. Calling it with an empty queue is a no-op.

use async_trait::async_trait;
use log::{info, warn};

use crate::storage::{BufferQueue, RecordPublisher};
use crate::transport::Transport;

pub struct Reconciler {
    topic: String,
    batch: usize,
}

struct TransportPublisher<'a> {
    transport: &'a mut dyn Transport,
    topic: &'a str,
}

#[async_trait]
impl RecordPublisher for TransportPublisher<'_> {
    async fn publish_record(&mut self, record: &str) -> bool {
        self.transport.publish(self.topic, record, false).await
    }
}

impl Reconciler {
    pub fn new(topic: String, batch: usize) -> Self {
        Reconciler { topic, batch }
    }

    /// Attempt one bounded flush pass. Returns how many records the
    /// broker accepted (and were therefore removed from the queue).
    pub async fn drain(&self, queue: &mut BufferQueue, transport: &mut dyn Transport) -> usize {
        let backlog = queue.count();
        if backlog == 0 {
            return 0;
        }
        info!("flushing backlog: {} buffered records", backlog);
        let mut publisher = TransportPublisher {
            transport,
            topic: &self.topic,
        };
        let flushed = queue.drain_while(&mut publisher, self.batch).await;
        if flushed > 0 {
            info!("flushed {} records, {} remaining", flushed, queue.count());
        } else {
            warn!("backlog flush made no progress ({} buffered)", backlog);
        }
        flushed
    }
}
