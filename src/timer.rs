//! 可取消的定时器任务句柄。
//! Cancellable timer task handles.
//!
//! Reconnect and keepalive timers are plain tokio tasks. A [`TimerHandle`]
//! owns the task and aborts it when cancelled or dropped, so a timer can never
//! outlive the record slot that holds it.
//!
//! 重连和保活定时器是普通的 tokio 任务。[`TimerHandle`] 拥有该任务，
//! 并在取消或被丢弃时中止它，因此定时器不会比持有它的记录槽活得更久。

use std::{future::Future, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Owner of a spawned timer task.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Runs `fut` after `delay`.
    ///
    /// 在 `delay` 之后运行 `fut`。
    pub(crate) fn after<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            fut.await;
        });
        Self { task: Some(task) }
    }

    /// Calls `tick` every `period`, first after one full period. Stops when
    /// `tick` resolves to `false`.
    ///
    /// 每隔 `period` 调用一次 `tick`，首次在一个完整周期之后。当 `tick` 返回 `false` 时停止。
    pub(crate) fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Stops the timer.
    pub(crate) fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Releases the handle without aborting the task. Used by a timer that is
    /// firing and clears its own slot.
    ///
    /// 释放句柄但不中止任务。由正在触发并清理自身槽位的定时器使用。
    pub(crate) fn disarm(mut self) {
        self.task.take();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn after_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _timer = TimerHandle::after(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = TimerHandle::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(timer);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_skips_the_immediate_tick_and_stops_on_false() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let _timer = TimerHandle::every(Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 2 }
        });

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }
}
