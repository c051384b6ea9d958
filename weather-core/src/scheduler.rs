use std::time::Duration;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Owns one recurring background task. Starting again replaces the previous one.
#[derive(Debug, Default)]
pub struct Scheduler {
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { task: None }
    }

    /// Run `tick` every `period`, first after one full period has elapsed.
    /// `tick` returning `false` stops the timer.
    pub fn start<F>(&mut self, runtime: &Handle, period: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.cancel();

        self.task = Some(runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
