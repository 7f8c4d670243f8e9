use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// Что сделал teardown и какие шаги упали.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<&'static str>,
    pub failures: Vec<(&'static str, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Освобождение без остановок: каждый шаг выполняется, ошибки только собираются.
#[derive(Debug, Default)]
pub struct Teardown {
    report: TeardownReport,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<E: Display>(&mut self, name: &'static str, f: impl FnOnce() -> Result<(), E>) {
        let result = f();
        self.record(name, result);
    }

    pub async fn step_async<E, F>(&mut self, name: &'static str, fut: F)
    where
        E: Display,
        F: Future<Output = Result<(), E>>,
    {
        let result = fut.await;
        self.record(name, result);
    }

    fn record<E: Display>(&mut self, name: &'static str, result: Result<(), E>) {
        self.report.steps.push(name);
        match result {
            Ok(()) => debug!("teardown: {name}"),
            Err(e) => {
                warn!("teardown step {name} failed: {e}");
                self.report.failures.push((name, e.to_string()));
            }
        }
    }

    pub fn finish(self) -> TeardownReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failures_do_not_stop_later_steps() {
        let mut td = Teardown::new();
        td.step("first", || Err::<(), _>("boom"));
        td.step_async("second", async { Ok::<(), String>(()) }).await;
        td.step("third", || Ok::<(), String>(()));
        let report = td.finish();
        assert_eq!(report.steps, vec!["first", "second", "third"]);
        assert_eq!(report.failures, vec![("first", "boom".to_string())]);
        assert!(!report.is_clean());
    }
}
