//! 后台定时任务

pub mod expiry_sweep;
pub mod traffic_sync;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub use expiry_sweep::ExpirySweepJob;
pub use traffic_sync::{SyncReport, TrafficSyncJob};

/// 定时执行的任务
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// 定时任务调度器
///
/// 首次执行在一个周期之后，错过的 tick 直接跳过。每次执行都在独立任务中，
/// 失败或 panic 只记录日志，不影响下一次执行。
#[derive(Default)]
pub struct Scheduler {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_periodic(&mut self, period: Duration, job: Arc<dyn PeriodicJob>) {
        let name = job.name();
        info!("⏰ 注册定时任务: {} (每 {:?})", name, period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                debug!("开始执行定时任务: {}", name);

                let job = job.clone();
                match tokio::spawn(async move { job.run().await }).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("定时任务 {} 执行失败: {:#}", name, e),
                    Err(e) if e.is_panic() => error!("定时任务 {} 发生 panic", name),
                    Err(e) => error!("定时任务 {} 被取消: {}", name, e),
                }
            }
        });

        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 停止所有定时任务
    pub fn shutdown(self) {
        for (name, handle) in self.handles {
            handle.abort();
            debug!("已停止定时任务: {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicJob for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self) -> anyhow::Result<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => panic!("first run panics"),
                1 => anyhow::bail!("second run fails"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let job = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let mut scheduler = Scheduler::new();
        scheduler.spawn_periodic(Duration::from_millis(10), job.clone());
        assert_eq!(scheduler.len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while job.runs.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(job.runs.load(Ordering::SeqCst) >= 3);

        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_first_run_waits_one_period() {
        let job = Arc::new(Flaky {
            runs: AtomicUsize::new(2),
        });
        let mut scheduler = Scheduler::new();
        scheduler.spawn_periodic(Duration::from_secs(3600), job.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
    }
}
