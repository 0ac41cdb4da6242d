//! In-process task queue: one `mpsc` channel per task kind, fed to a pool of
//! handler workers (spec §9 design note — "in-process channels or an
//! external broker both satisfy it"). Grounded on the teacher's
//! `Executor`/`order_rx: Receiver<Order>` pattern
//! (`application/agents/executor.rs`).

use crate::domain::ports::{ArmPayload, DisarmPayload, OrderTaskQueue};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// The task payload handed to a pool worker. Keeping arm/disarm as one enum
/// (rather than two channels) lets a single worker pool drain both kinds in
/// delivery order — at-least-once, never ordered across bots (spec §5).
#[derive(Debug, Clone)]
pub enum OrderTask {
    Arm(ArmPayload),
    Disarm(DisarmPayload),
}

pub struct InProcessTaskQueue {
    tx: Sender<OrderTask>,
}

impl InProcessTaskQueue {
    /// `capacity` bounds in-flight tasks; a full channel applies backpressure
    /// to the signal poller rather than dropping work.
    pub fn new(capacity: usize) -> (Self, Receiver<OrderTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OrderTaskQueue for InProcessTaskQueue {
    async fn enqueue_arm(&self, payload: ArmPayload) -> Result<()> {
        self.tx.send(OrderTask::Arm(payload)).await.map_err(|_| anyhow::anyhow!("task queue closed"))
    }

    async fn enqueue_disarm(&self, payload: DisarmPayload) -> Result<()> {
        self.tx.send(OrderTask::Disarm(payload)).await.map_err(|_| anyhow::anyhow!("task queue closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn enqueued_arm_is_received_in_order() {
        let (queue, mut rx) = InProcessTaskQueue::new(8);
        queue
            .enqueue_arm(ArmPayload {
                bot_id: "b1".into(),
                signal_id: "100".into(),
                sym: "BTCUSDT".into(),
                side: Side::Long,
                trigger: dec!(100),
                stop: dec!(95),
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            OrderTask::Arm(p) => assert_eq!(p.bot_id, "b1"),
            OrderTask::Disarm(_) => panic!("expected arm"),
        }
    }
}
