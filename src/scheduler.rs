use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A fixed-period task running on its own thread.
///
/// The first tick fires one period after spawning. Ticks run sequentially;
/// a tick that overruns the period is followed immediately by the next one.
/// Stopping wakes the thread at once so no further tick fires; a tick
/// already running finishes on its own.
pub struct PeriodicTask {
    stop_tx: Option<Sender<()>>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TaskStats {
    ticks: u64,
    overruns: u64,
    worst_case: Duration,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut stats = TaskStats::default();
            let mut wait = period;
            loop {
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Explicit stop or the handle was dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let cycle_start = Instant::now();
                tick();
                let elapsed = cycle_start.elapsed();

                stats.ticks += 1;
                if elapsed > stats.worst_case {
                    stats.worst_case = elapsed;
                }
                wait = if elapsed < period {
                    period - elapsed
                } else {
                    stats.overruns += 1;
                    Duration::ZERO
                };
            }
            log::debug!(
                "{} exited after {} ticks ({} overruns, worst case {:?})",
                thread_name,
                stats.ticks,
                stats.overruns,
                stats.worst_case
            );
        })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle,
        })
    }

    /// Prevents any further tick. Does not wait for a running tick.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tx.is_none()
    }

    /// Whether the task thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn counting_task(period: Duration) -> (PeriodicTask, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test-tick", period, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (task, count)
    }

    #[test]
    fn first_tick_waits_one_period() {
        let (mut task, count) = counting_task(Duration::from_millis(200));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        task.stop();
    }

    #[test]
    fn ticks_until_stopped() {
        let (mut task, count) = counting_task(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        task.stop();
        thread::sleep(Duration::from_millis(30));

        assert!(task.is_finished());
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {}", seen);
    }

    #[test]
    fn stop_prevents_further_ticks() {
        let (mut first, first_count) = counting_task(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(50));
        first.stop();
        assert!(first.is_stopped());
        // Let a tick that was already running finish
        thread::sleep(Duration::from_millis(20));
        assert!(first.is_finished());
        let frozen = first_count.load(Ordering::SeqCst);

        let (mut second, second_count) = counting_task(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(80));

        assert_eq!(first_count.load(Ordering::SeqCst), frozen);
        assert!(second_count.load(Ordering::SeqCst) >= 2);
        assert!(!second.is_finished());
        second.stop();
    }

    #[test]
    fn overrunning_ticks_run_back_to_back() {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let mut task = PeriodicTask::spawn("slow-tick", Duration::from_millis(50), move || {
            c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
        })
        .unwrap();
        // First tick at 50ms, then one every 100ms with no extra wait
        thread::sleep(Duration::from_millis(420));
        task.stop();

        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 4, "expected back-to-back ticks, got {}", seen);
    }
}
