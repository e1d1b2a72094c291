//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task;
use tokio::time::{self, Instant};
use tracing::{Instrument, error};

/// A handle to a task created by [`Task::spawn`].
///
/// Dropping the handle aborts the task, unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle to a one-shot timer created by [`TimeoutTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    timer: TimerHandle,
}

/// A handle to a periodic timer created by [`IntervalTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    timer: TimerHandle,
}

// State shared by both timer flavors.
#[derive(Debug)]
struct TimerHandle {
    _task: Task<()>,
    control: mpsc::UnboundedSender<Option<Duration>>,
    next: watch::Receiver<Instant>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Spawns a task that is restarted whenever it panics. The task ends
    /// once the provided future completes normally.
    ///
    /// Network receive loops use this so that a packet triggering a bug
    /// doesn't take the whole interface down.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
                    match Task::spawn(spawn_fn()).await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Detaches the task so that dropping the handle no longer aborts it.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Checks whether the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a timer that calls `cb` once `timeout` expires.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let (next_tx, next_rx) = watch::channel(Instant::now() + timeout);

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            let Some(new_timeout) = message else {
                                // Handle dropped.
                                break;
                            };
                            let next =
                                Instant::now() + new_timeout.unwrap_or(timeout);
                            sleep.as_mut().reset(next);
                            let _ = next_tx.send(next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            timer: TimerHandle::new(task, control_tx, next_rx),
        }
    }

    /// Restarts the timer, whether it has already expired or not.
    ///
    /// The original timeout is reused when `timeout` is `None`.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        self.timer.reset(timeout, "failed to reset timeout");
    }

    /// Returns the time left before the timer expires.
    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a timer that calls `cb` every time `interval` elapses.
    ///
    /// When `tick_on_start` is set the first call happens right away.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let (next_tx, next_rx) = watch::channel(Instant::now() + interval);

        let task = Task::spawn(
            async move {
                let start = if tick_on_start {
                    Instant::now()
                } else {
                    Instant::now() + interval
                };
                let mut period = interval;
                let mut ticker = time::interval_at(start, period);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            (cb)().await;
                            let _ = next_tx.send(Instant::now() + period);
                        }
                        message = control_rx.recv() => {
                            let Some(new_interval) = message else {
                                // Handle dropped.
                                break;
                            };
                            period = new_interval.unwrap_or(period);
                            let next = Instant::now() + period;
                            ticker = time::interval_at(next, period);
                            let _ = next_tx.send(next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            timer: TimerHandle::new(task, control_tx, next_rx),
        }
    }

    /// Restarts the interval.
    ///
    /// The current period is reused when `interval` is `None`.
    pub fn reset(&mut self, interval: Option<Duration>) {
        self.timer.reset(interval, "failed to reset interval");
    }

    /// Returns the time left before the next tick.
    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }
}

// ===== impl TimerHandle =====

impl TimerHandle {
    fn new(
        task: Task<()>,
        control: mpsc::UnboundedSender<Option<Duration>>,
        next: watch::Receiver<Instant>,
    ) -> TimerHandle {
        TimerHandle {
            _task: task,
            control,
            next,
        }
    }

    fn reset(&mut self, value: Option<Duration>, errmsg: &'static str) {
        if self.control.send(value).is_err() {
            error!("{}", errmsg);
        }
    }

    fn remaining(&self) -> Duration {
        self.next.borrow().saturating_duration_since(Instant::now())
    }
}

// ===== unit tests =====
