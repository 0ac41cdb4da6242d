//! Per-`(sym, tf)` calculator worker (spec §4.E): rolling moving averages,
//! regime classification, indicator-candle tracking and transition-table
//! signal emission.

use crate::domain::errors::CalcError;
use crate::domain::filters::{quantize_ceil, quantize_floor};
use crate::domain::keys;
use crate::domain::ports::StreamBroker;
use crate::domain::regime::RegimeClassifier;
use crate::domain::types::{ArmedState, Candle, Color, IndicatorCandle, IndicatorSnapshot, Regime, Side, Signal};
use crate::infrastructure::broker::codec;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

const RING_CAPACITY: usize = 200;
const MA_SHORT: usize = 20;
const MA_LONG: usize = 200;
const BATCH_SIZE: usize = 50;

/// Owns one symbol/timeframe's rolling state. `process_candle` is the pure,
/// directly-testable core; `run` wraps it with stream I/O.
pub struct Calculator {
    sym: String,
    tf: String,
    tick_size: Decimal,
    classifier: Arc<dyn RegimeClassifier>,
    close_history: VecDeque<Decimal>,
    prev_regime: Regime,
    indicator_candle: Option<IndicatorCandle>,
    armed: Option<ArmedState>,
}

impl Calculator {
    pub fn new(sym: impl Into<String>, tf: impl Into<String>, tick_size: Decimal, classifier: Arc<dyn RegimeClassifier>) -> Self {
        Self {
            sym: sym.into(),
            tf: tf.into(),
            tick_size,
            classifier,
            close_history: VecDeque::with_capacity(RING_CAPACITY),
            prev_regime: Regime::Neutral,
            indicator_candle: None,
            armed: None,
        }
    }

    fn moving_average(&self, window: usize) -> Option<Decimal> {
        if self.close_history.len() < window {
            return None;
        }
        let sum: Decimal = self.close_history.iter().rev().take(window).sum();
        Some(sum / Decimal::from(window))
    }

    /// Long trigger/short stop: one tick above `high`, floored so the
    /// quantized level never creeps past the raw target. Short
    /// trigger/long stop: one tick below `low`, ceiled likewise.
    fn levels_for(&self, side: Side, ind: IndicatorCandle) -> (Decimal, Decimal) {
        match side {
            Side::Long => {
                let trigger = quantize_floor(ind.high + self.tick_size, self.tick_size);
                let stop = quantize_ceil(ind.low - self.tick_size, self.tick_size);
                (trigger, stop)
            }
            Side::Short => {
                let trigger = quantize_ceil(ind.low - self.tick_size, self.tick_size);
                let stop = quantize_floor(ind.high + self.tick_size, self.tick_size);
                (trigger, stop)
            }
        }
    }

    /// Runs one candle through the full per-candle procedure (spec §4.E
    /// steps 1-6, minus the stream writes), returning the signals to emit
    /// (in emission order) and the indicator snapshot to publish.
    pub fn process_candle(&mut self, candle: &Candle) -> (Vec<Signal>, IndicatorSnapshot) {
        self.close_history.push_back(candle.close);
        if self.close_history.len() > RING_CAPACITY {
            self.close_history.pop_front();
        }

        let ma20 = self.moving_average(MA_SHORT);
        let ma200 = self.moving_average(MA_LONG);
        let regime = self.classifier.classify(candle.close, ma20, ma200);

        let indicator_just_set = match regime {
            Regime::Long if candle.color == Color::Red => {
                self.indicator_candle = Some(IndicatorCandle {
                    side: Side::Long,
                    high: candle.high,
                    low: candle.low,
                    ts_ms: candle.ts_ms,
                });
                true
            }
            Regime::Short if candle.color == Color::Green => {
                self.indicator_candle = Some(IndicatorCandle {
                    side: Side::Short,
                    high: candle.high,
                    low: candle.low,
                    ts_ms: candle.ts_ms,
                });
                true
            }
            Regime::Neutral => {
                self.indicator_candle = None;
                false
            }
            _ => {
                if let Some(ind) = self.indicator_candle
                    && regime.side() != Some(ind.side)
                {
                    self.indicator_candle = None;
                }
                false
            }
        };

        let mut signals = Vec::new();
        let prev_side = self.prev_regime.side();
        let new_side = regime.side();

        if let Some(p) = prev_side
            && new_side != Some(p)
        {
            let reason = if new_side.is_some() { "direct-flip" } else { "regime_exit" };
            signals.push(Signal::Disarm {
                sym: self.sym.clone(),
                tf: self.tf.clone(),
                ind_ts: candle.ts_ms,
                side: p,
                prev_side: p,
                reason: reason.to_string(),
            });
            self.armed = None;
        }

        if let Some(s) = new_side
            && indicator_just_set
            && self.armed.is_none()
        {
            let ind = self.indicator_candle.expect("indicator_just_set implies Some");
            let (trigger, stop) = self.levels_for(s, ind);
            self.armed = Some(ArmedState { side: s, trigger, stop });
            signals.push(Signal::Arm {
                sym: self.sym.clone(),
                tf: self.tf.clone(),
                ind_ts: candle.ts_ms,
                side: s,
                trigger,
                stop,
            });
        }

        self.prev_regime = regime;

        let snapshot = IndicatorSnapshot {
            sym: self.sym.clone(),
            tf: self.tf.clone(),
            ts_ms: candle.ts_ms,
            close: candle.close,
            ma20: ma20.unwrap_or(Decimal::ZERO),
            ma200: ma200.unwrap_or(Decimal::ZERO),
            regime,
            ind_high: self.indicator_candle.map(|i| i.high),
            ind_low: self.indicator_candle.map(|i| i.low),
            ind_ts: self.indicator_candle.map(|i| i.ts_ms),
        };

        (signals, snapshot)
    }

    /// Drives the worker against a live `StreamBroker`: resumes from the
    /// highest id already present in the indicator stream (or `"0"` cold),
    /// reads new market candles in batches, and for each one writes the
    /// resulting signals, indicator snapshot, and latest-snapshot hash.
    pub async fn run(mut self, broker: Arc<dyn StreamBroker>) -> Result<(), CalcError> {
        let market_stream = keys::market_stream(&self.sym, &self.tf);
        let indicator_stream = keys::indicator_stream(&self.sym, &self.tf);
        let signal_stream = keys::signal_stream(&self.sym, &self.tf);
        let snapshot_hash = keys::snapshot_hash(&self.sym, &self.tf);

        let mut cursor = self.resume_cursor(&broker, &indicator_stream).await?;
        let mut backoff = Duration::from_millis(100);

        loop {
            let entries = match broker.xread(&market_stream, &cursor, BATCH_SIZE).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(sym = %self.sym, tf = %self.tf, %err, "calculator: broker unavailable, backing off");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    continue;
                }
            };
            backoff = Duration::from_millis(100);

            if entries.is_empty() {
                sleep(Duration::from_millis(200)).await;
                continue;
            }

            for entry in entries {
                cursor = entry.id.clone();
                let raw = codec::decode_candle_fields(&entry.fields);
                let candle = match codec::promote_candle(raw, &self.sym, &self.tf, codec::stream_id_to_ts_ms(&entry.id)) {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(sym = %self.sym, tf = %self.tf, %err, "calculator: skipping malformed candle");
                        continue;
                    }
                };

                let (signals, snapshot) = self.process_candle(&candle);

                for signal in &signals {
                    let fields = codec::encode_signal(signal);
                    if let Err(err) = broker.xadd(&signal_stream, fields).await {
                        warn!(sym = %self.sym, tf = %self.tf, %err, "calculator: failed to publish signal");
                    } else {
                        info!(sym = %self.sym, tf = %self.tf, kind = signal.kind(), "calculator: signal emitted");
                    }
                }

                let mut snap_fields = codec::encode_indicator_snapshot(&snapshot);
                // The indicator stream's own ids live in a different id
                // space than the market stream's, so the resume cursor
                // carries the source market-stream id explicitly rather
                // than assuming ids are comparable across streams.
                snap_fields.insert("src_id".to_string(), cursor.clone());
                if let Err(err) = broker.xadd(&indicator_stream, snap_fields.clone()).await {
                    warn!(sym = %self.sym, tf = %self.tf, %err, "calculator: failed to write indicator stream");
                }
                if let Err(err) = broker.hset(&snapshot_hash, snap_fields).await {
                    warn!(sym = %self.sym, tf = %self.tf, %err, "calculator: failed to write snapshot hash");
                }
            }
        }
    }

    /// Resumes from the market-stream id recorded on the indicator
    /// stream's last entry (`"0"` cold-start, per spec §4.E contract).
    async fn resume_cursor(&self, broker: &Arc<dyn StreamBroker>, indicator_stream: &str) -> Result<String, CalcError> {
        let entries = broker
            .xread(indicator_stream, "0", 10_000)
            .await
            .map_err(|e| CalcError::BrokerUnavailable { reason: e.to_string() })?;
        Ok(entries
            .last()
            .and_then(|e| e.fields.get("src_id").cloned())
            .unwrap_or_else(|| "0".to_string()))
    }
}
