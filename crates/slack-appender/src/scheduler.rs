// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives the buffer, composer and sink from a single background task.
//!
//! Producers call [`Dispatcher::on_event`], which only pushes into the
//! [`EventBuffer`] and, in window mode, records the arrival time in a slot and
//! wakes the task. Every drain, composition and send happens on that one task,
//! so flushes of a dispatcher never overlap.
//!
//! Arrivals coalesce while the task is busy sending: the slot keeps only the
//! earliest and latest unseen arrival, so a slow sink never queues more than
//! the buffer already holds.
//!
//! # Modes
//!
//! - [`FlushMode::Interval`]: a timer ticks every period; non-empty buffers are
//!   flushed, empty ticks send nothing.
//! - [`FlushMode::Window`]: the first event after the window has elapsed since
//!   the last flush triggers a flush of everything buffered, itself included.
//!   Events landing inside the window wait for the next such trigger.
//!
//! Changing the cadence stops the running task and awaits it before the new
//! one is spawned, so there is never more than one live timer.

use crate::buffer::EventBuffer;
use crate::composer::TextComposer;
use crate::config::{validate_flush_mode, BatchConfig, CoalesceNotice, FlushMode, MessageIdentity};
use crate::errors::ConfigError;
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::sink::{ComposedMessage, NotificationSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Level};

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A background task is running. `next_flush` is the next timer tick in
    /// interval mode and `None` in window mode, where flushes follow arrivals.
    Scheduled { next_flush: Option<Instant> },
    Shutdown,
}

type FlushRequest = oneshot::Sender<usize>;

struct Slot {
    state: SchedulerState,
    /// Set while a window task runs.
    watching_arrivals: bool,
    /// Earliest and latest arrival the window task has not seen yet.
    pending: Option<(Instant, Instant)>,
}

impl Slot {
    /// Returns whether the window task has to be woken.
    fn record_arrival(&mut self, arrived_at: Instant) -> bool {
        if !self.watching_arrivals {
            return false;
        }
        self.pending = Some(match self.pending {
            Some((first, last)) => (first.min(arrived_at), last.max(arrived_at)),
            None => (arrived_at, arrived_at),
        });
        true
    }

    fn shut_down(&mut self) {
        self.state = SchedulerState::Shutdown;
        self.watching_arrivals = false;
        self.pending = None;
    }
}

struct Shared {
    buffer: EventBuffer,
    composer: TextComposer,
    sink: Arc<dyn NotificationSink>,
    identity: MessageIdentity,
    notice: CoalesceNotice,
    slot: Mutex<Slot>,
    arrived: Notify,
    live_timers: AtomicUsize,
}

struct Running {
    cancel: CancellationToken,
    flushes: mpsc::Sender<FlushRequest>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    mode: FlushMode,
    running: Option<Running>,
}

/// Batching engine: buffer, composer and sink behind one background task.
pub struct Dispatcher {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("buffered", &self.shared.buffer.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        config: BatchConfig,
        identity: MessageIdentity,
        layout: Arc<dyn Layout>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = Shared {
            buffer: EventBuffer::new(config.buffer_capacity),
            composer: TextComposer::new(
                layout,
                config.max_event_text_length,
                config.max_message_text_length,
            ),
            sink,
            identity,
            notice: config.coalesce_notice,
            slot: Mutex::new(Slot {
                state: SchedulerState::Idle,
                watching_arrivals: false,
                pending: None,
            }),
            arrived: Notify::new(),
            live_timers: AtomicUsize::new(0),
        };

        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                mode: config.flush_mode,
                running: None,
            }),
        })
    }

    /// Accepts one event from a producer. Never blocks and never fails.
    ///
    /// Events are dropped once the dispatcher has been stopped or when the
    /// buffer is full.
    pub fn on_event(&self, event: LogEvent) {
        if self.shared.slot().state == SchedulerState::Shutdown {
            return;
        }
        let arrived_at = Instant::now();
        // Buffered before the task can wake, so the flush it triggers includes it
        self.shared.buffer.enqueue(event);
        if self.shared.slot().record_arrival(arrived_at) {
            self.shared.arrived.notify_one();
        }
    }

    /// Spawns the background task on the current runtime. No-op when already scheduled.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            return;
        }
        let mode = lifecycle.mode;
        lifecycle.running = Some(self.spawn(mode));
    }

    /// Cancels the background task, waits for it, then flushes what is left.
    ///
    /// Events arriving after this call are dropped.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.shared.slot().shut_down();
        halt(&mut lifecycle).await;
        // A tick polled on another worker before the cancel may have rescheduled
        self.shared.slot().shut_down();

        let flushed = self.shared.flush().await;
        debug!("Dispatcher stopped, final flush sent {flushed} events");
    }

    /// Switches the flush cadence. A running task is stopped before the new one starts.
    pub async fn reconfigure(&self, mode: FlushMode) -> Result<(), ConfigError> {
        validate_flush_mode(mode)?;
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.mode = mode;
        if lifecycle.running.is_some() {
            halt(&mut lifecycle).await;
            lifecycle.running = Some(self.spawn(mode));
        }
        debug!("Dispatcher reconfigured to {mode:?}");
        Ok(())
    }

    /// Flushes the buffer now, on the background task when one is running.
    ///
    /// Returns the number of events that were sent.
    pub async fn flush_now(&self) -> usize {
        let lifecycle = self.lifecycle.lock().await;
        if let Some(running) = &lifecycle.running {
            let (response_tx, response_rx) = oneshot::channel();
            if running.flushes.send(response_tx).await.is_ok() {
                return response_rx.await.unwrap_or_else(|e| {
                    error!("Failed to receive flush response: {e}");
                    0
                });
            }
        }
        // No task to race with while the lifecycle lock is held
        self.shared.flush().await
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.slot().state
    }

    /// Number of background tasks currently alive; at most one.
    pub fn live_timers(&self) -> usize {
        self.shared.live_timers.load(Ordering::Acquire)
    }

    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Total events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.shared.buffer.dropped()
    }

    fn spawn(&self, mode: FlushMode) -> Running {
        let (flushes, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let guard = TimerGuard::new(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);

        let task = match mode {
            FlushMode::Interval(period) => {
                let first_tick = Instant::now() + period;
                {
                    let mut slot = shared.slot();
                    slot.state = SchedulerState::Scheduled {
                        next_flush: Some(first_tick),
                    };
                    slot.watching_arrivals = false;
                    slot.pending = None;
                }
                tokio::spawn(
                    run_interval(shared, first_tick, period, rx, cancel.clone(), guard)
                        .in_current_span(),
                )
            }
            FlushMode::Window(window) => {
                let carried_over = {
                    let mut slot = shared.slot();
                    slot.state = SchedulerState::Scheduled { next_flush: None };
                    slot.watching_arrivals = true;
                    slot.pending.is_some()
                };
                if carried_over {
                    shared.arrived.notify_one();
                }
                tokio::spawn(run_window(shared, window, rx, cancel.clone(), guard).in_current_span())
            }
        };

        Running {
            cancel,
            flushes,
            task,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().running.take() {
            running.cancel.cancel();
        }
    }
}

async fn halt(lifecycle: &mut Lifecycle) {
    if let Some(running) = lifecycle.running.take() {
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!("Dispatcher task failed: {e}");
        }
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the next tick forward unless the dispatcher has left `Scheduled`.
    fn reschedule(&self, next_flush: Instant) {
        let mut slot = self.slot();
        if matches!(slot.state, SchedulerState::Scheduled { .. }) {
            slot.state = SchedulerState::Scheduled {
                next_flush: Some(next_flush),
            };
        }
    }

    async fn answer(&self, response_tx: FlushRequest) {
        let flushed = self.flush().await;
        if response_tx.send(flushed).is_err() {
            error!("Failed to send flush response - receiver dropped");
        }
    }

    /// One drain-compose-send cycle. Returns the number of events drained.
    async fn flush(&self) -> usize {
        let dropped = self.buffer.take_dropped();
        if dropped > 0 {
            warn!("Buffer full, dropped {dropped} log events since the last flush");
        }

        let events = self.buffer.drain_all();
        if events.is_empty() {
            return 0;
        }

        debug!("Flushing {} log events", events.len());
        let text = self.composer.compose(&events, self.notice.banner());
        let most_severe = events.iter().map(LogEvent::level).min();
        self.deliver(&self.message(text, most_severe)).await;
        events.len()
    }

    fn message(&self, text: String, level: Option<Level>) -> ComposedMessage {
        ComposedMessage {
            text,
            username: self.identity.username.clone(),
            icon_emoji: self.identity.icon_emoji.clone(),
            channel: self.identity.channel.clone(),
            color: level
                .filter(|_| self.identity.use_attachments)
                .map(|level| color_for_level(level).to_string()),
        }
    }

    async fn deliver(&self, message: &ComposedMessage) {
        if let Err(e) = self.sink.send(message).await {
            error!("Failed to post log events to Slack: {e}");
        }
    }
}

/// Slack attachment colour for the most severe level of a batch.
fn color_for_level(level: Level) -> &'static str {
    match level {
        Level::ERROR => "danger",
        Level::WARN => "warning",
        _ => "good",
    }
}

/// Counts a background task from spawn until its future is dropped.
struct TimerGuard(Arc<Shared>);

impl TimerGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.live_timers.fetch_add(1, Ordering::AcqRel);
        Self(shared)
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.live_timers.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn run_interval(
    shared: Arc<Shared>,
    first_tick: Instant,
    period: Duration,
    mut flushes: mpsc::Receiver<FlushRequest>,
    cancel: CancellationToken,
    _guard: TimerGuard,
) {
    debug!("Interval dispatcher started, flushing every {period:?}");
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.reschedule(Instant::now() + period);
                shared.flush().await;
            }
            Some(response_tx) = flushes.recv() => shared.answer(response_tx).await,
        }
    }

    debug!("Interval dispatcher stopped");
}

/// Coalescing state of a window task.
struct Window {
    period: Duration,
    last_flush: Option<Instant>,
    advised: bool,
}

impl Window {
    async fn on_arrival(&mut self, shared: &Shared, arrived_at: Instant) {
        let window_elapsed = self
            .last_flush
            .map_or(true, |last| arrived_at.saturating_duration_since(last) >= self.period);
        if window_elapsed {
            shared.flush().await;
            self.last_flush = Some(arrived_at);
            self.advised = false;
        } else if !self.advised && !shared.buffer.is_empty() {
            self.advised = true;
            if let Some(advisory) = shared.notice.advisory() {
                let message = shared.message(advisory.to_string(), None);
                shared.deliver(&message).await;
            }
        }
    }
}

async fn run_window(
    shared: Arc<Shared>,
    period: Duration,
    mut flushes: mpsc::Receiver<FlushRequest>,
    cancel: CancellationToken,
    _guard: TimerGuard,
) {
    debug!("Window dispatcher started, coalescing within {period:?}");
    let mut window = Window {
        period,
        last_flush: None,
        advised: false,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(response_tx) = flushes.recv() => shared.answer(response_tx).await,
            _ = shared.arrived.notified() => {
                let pending = shared.slot().pending.take();
                if let Some((first, last)) = pending {
                    window.on_arrival(&shared, first).await;
                    if last != first {
                        window.on_arrival(&shared, last).await;
                    }
                }
            }
        }
    }

    debug!("Window dispatcher stopped");
}
