//! One poller per `(sym, tf)` consumer group (spec §4.F): reads the signal
//! stream with a named consumer, fans each signal out to every eligible bot
//! subscribed to that symbol, and acks only once every eligible bot's task
//! has been accepted by the queue. Loop/backoff shape grounded on
//! `application::calculator::Calculator::run`.

use crate::domain::errors::CalcError;
use crate::domain::ports::{ArmPayload, DisarmPayload, OrderTaskQueue, StateStore, StreamBroker};
use crate::domain::types::{BotStatus, Signal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const BATCH_SIZE: usize = 50;
const GROUP: &str = "signal-poller";

pub struct SignalPoller {
    sym: String,
    tf: String,
    consumer: String,
    signal_stream: String,
    broker: Arc<dyn StreamBroker>,
    store: Arc<dyn StateStore>,
    queue: Arc<dyn OrderTaskQueue>,
}

impl SignalPoller {
    pub fn new(
        sym: impl Into<String>,
        tf: impl Into<String>,
        consumer: impl Into<String>,
        broker: Arc<dyn StreamBroker>,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn OrderTaskQueue>,
    ) -> Self {
        let sym = sym.into();
        let tf = tf.into();
        let signal_stream = crate::domain::keys::signal_stream(&sym, &tf);
        Self { sym, tf, consumer: consumer.into(), signal_stream, broker, store, queue }
    }

    pub async fn run(self) -> Result<(), CalcError> {
        self.broker
            .xgroup_create(&self.signal_stream, GROUP)
            .await
            .map_err(|e| CalcError::BrokerUnavailable { reason: e.to_string() })?;

        let mut backoff = Duration::from_millis(200);
        loop {
            let batch = self.broker.xreadgroup(&self.signal_stream, GROUP, &self.consumer, ">", BATCH_SIZE).await;

            let entries = match batch {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(sym = %self.sym, tf = %self.tf, error = %e, "signal poller read failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    continue;
                }
            };
            backoff = Duration::from_millis(200);

            if entries.is_empty() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            for entry in entries {
                let Some(signal) = crate::infrastructure::broker::codec::decode_signal(&entry.fields) else {
                    warn!(sym = %self.sym, tf = %self.tf, id = %entry.id, "unparseable signal entry, acking to skip");
                    let _ = self.broker.xack(&self.signal_stream, GROUP, &entry.id).await;
                    continue;
                };

                if let Err(e) = self.dispatch(&signal, &entry.id).await {
                    warn!(sym = %self.sym, tf = %self.tf, id = %entry.id, error = %e, "dispatch failed, leaving unacked for redelivery");
                    continue;
                }

                let _ = self.broker.xack(&self.signal_stream, GROUP, &entry.id).await;
            }
        }
    }

    async fn dispatch(&self, signal: &Signal, signal_id: &str) -> anyhow::Result<()> {
        let bot_ids = self.store.bots_for_symbol(&self.sym).await?;

        for bot_id in bot_ids {
            let Some(cfg) = self.store.read_bot_config(&bot_id).await? else {
                continue;
            };
            if !is_eligible(&cfg.status, cfg.side_mode, signal.side()) {
                continue;
            }

            match signal {
                Signal::Arm { trigger, stop, side, .. } => {
                    self.queue
                        .enqueue_arm(ArmPayload {
                            bot_id: bot_id.clone(),
                            signal_id: signal_id.to_string(),
                            sym: self.sym.clone(),
                            side: *side,
                            trigger: *trigger,
                            stop: *stop,
                        })
                        .await?;
                }
                Signal::Disarm { side, .. } => {
                    self.queue
                        .enqueue_disarm(DisarmPayload {
                            bot_id: bot_id.clone(),
                            signal_id: signal_id.to_string(),
                            sym: self.sym.clone(),
                            side: *side,
                        })
                        .await?;
                }
            }
        }

        info!(sym = %self.sym, tf = %self.tf, id = %signal_id, kind = signal.kind(), "signal dispatched");
        Ok(())
    }
}

fn is_eligible(status: &BotStatus, side_mode: crate::domain::types::SideMode, side: crate::domain::types::Side) -> bool {
    *status == BotStatus::Active && side_mode.allows(side)
}
