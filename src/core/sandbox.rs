use crate::core::host::HostApi;
use crate::script::{
    self, ConsoleLevel, HostBridge, HostError, HostGlobal, HostRef, Limits, ScriptError, Value, SCRIPT_STACK_SIZE,
};
use crate::utils::error::{EngineError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Extra time the watchdog allows past the script deadline before giving up on the worker.
const WATCHDOG_GRACE: Duration = Duration::from_secs(1);

/// What came back from the worker thread.
#[derive(Debug)]
pub struct Execution {
    pub host: HostApi,
    pub result: std::result::Result<(), ScriptError>,
    pub elapsed: Duration,
}

/// Host state shared between the worker thread and the watchdog.
///
/// Whoever takes it first owns the declarations. Once the watchdog has taken it, host calls
/// from a still-running worker fail.
#[derive(Debug, Clone)]
struct SharedHost(Arc<Mutex<Option<HostApi>>>);

impl SharedHost {
    fn new(host: HostApi) -> Self {
        Self(Arc::new(Mutex::new(Some(host))))
    }

    fn lock(&self) -> MutexGuard<'_, Option<HostApi>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Option<HostApi> {
        self.lock().take()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HostApi) -> std::result::Result<T, HostError>) -> std::result::Result<T, HostError> {
        match self.lock().as_mut() {
            Some(host) => f(host),
            None => Err(HostError::error("script worker was abandoned")),
        }
    }
}

impl HostBridge for SharedHost {
    fn globals(&self) -> Vec<HostGlobal> {
        self.lock().as_ref().map(HostApi::globals).unwrap_or_default()
    }

    fn call(&mut self, name: &str, this: Option<HostRef>, args: &[Value]) -> std::result::Result<Value, HostError> {
        self.with(|host| host.call(name, this, args))
    }

    fn construct(&mut self, class: &str, args: &[Value]) -> std::result::Result<Value, HostError> {
        self.with(|host| host.construct(class, args))
    }

    fn get_member(&mut self, target: HostRef, key: &str) -> Option<Value> {
        self.lock().as_mut().and_then(|host| host.get_member(target, key))
    }

    fn set_member(&mut self, target: HostRef, key: &str, value: Value) -> std::result::Result<(), HostError> {
        self.with(|host| host.set_member(target, key, value))
    }

    fn keys(&self, target: HostRef) -> Vec<String> {
        self.lock().as_ref().map(|host| host.keys(target)).unwrap_or_default()
    }

    fn console(&mut self, level: ConsoleLevel, message: &str) {
        if let Some(host) = self.lock().as_mut() {
            host.console(level, message);
        }
    }
}

/// Runs script text against a [`HostApi`] on a dedicated thread, bounded by a wall-clock
/// deadline.
///
/// The interpreter enforces the deadline itself. The watchdog on the async side only
/// fires when the worker stops responding; it then keeps whatever the script declared so far
/// and reports a timeout.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    limits: Limits,
    watchdog: Duration,
}

impl SandboxExecutor {
    pub fn new(limits: Limits) -> Self {
        let watchdog = limits.timeout + WATCHDOG_GRACE.max(limits.timeout);
        Self { limits, watchdog }
    }

    /// Overrides how long the async side waits for the worker.
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub async fn execute(&self, source: String, host: HostApi) -> Result<Execution> {
        let (tx, rx) = oneshot::channel();
        let limits = self.limits.clone();
        let shared = SharedHost::new(host);
        let worker = shared.clone();

        std::thread::Builder::new()
            .name("takeoff-script".to_string())
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn(move || {
                let started = Instant::now();
                let mut bridge = worker.clone();
                let result = script::run_script(&source, &mut bridge, &limits);
                // Nothing to send when the watchdog already took the host.
                if let Some(host) = worker.take() {
                    let _ = tx.send(Execution {
                        host,
                        result,
                        elapsed: started.elapsed(),
                    });
                }
            })
            .map_err(|e| EngineError::WorkerError {
                message: format!("could not start script thread: {}", e),
            })?;

        match tokio::time::timeout(self.watchdog, rx).await {
            Ok(Ok(execution)) => {
                match &execution.result {
                    Ok(()) => tracing::debug!("Script finished in {:?}", execution.elapsed),
                    Err(e) => tracing::debug!("Script stopped after {:?}: {}", execution.elapsed, e),
                }
                Ok(execution)
            }
            Ok(Err(_)) => Err(EngineError::WorkerError {
                message: "script thread exited without a result".to_string(),
            }),
            Err(_) => {
                tracing::error!("Script worker unresponsive after {:?}, abandoning it", self.watchdog);
                match shared.take() {
                    Some(host) => Ok(Execution {
                        host,
                        result: Err(ScriptError::Timeout {
                            limit_ms: self.limits.timeout.as_millis() as u64,
                        }),
                        elapsed: self.watchdog,
                    }),
                    None => Err(EngineError::WorkerError {
                        message: format!("script worker unresponsive after {:?}", self.watchdog),
                    }),
                }
            }
        }
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::PriceCatalog;
    use crate::core::registry::SchemaRegistry;

    fn host() -> HostApi {
        HostApi::new(
            SchemaRegistry::new(Vec::new()),
            SchemaRegistry::new(Vec::new()),
            PriceCatalog::default(),
        )
    }

    #[tokio::test]
    async fn infinite_loops_time_out() {
        let sandbox = SandboxExecutor::new(Limits {
            timeout: Duration::from_millis(100),
            ..Limits::default()
        });

        let started = Instant::now();
        let execution = sandbox
            .execute("getUserInput('a', 1)\nwhile (true) {}".to_string(), host())
            .await
            .unwrap();

        assert_eq!(execution.result, Err(ScriptError::Timeout { limit_ms: 100 }));
        assert!(started.elapsed() < Duration::from_secs(2));
        // Declarations made before the loop survive.
        assert_eq!(execution.host.finish().input_records.len(), 1);
    }

    #[tokio::test]
    async fn abandoned_workers_keep_their_declarations() {
        let sandbox = SandboxExecutor::new(Limits {
            timeout: Duration::from_secs(5),
            ..Limits::default()
        })
        .with_watchdog(Duration::from_millis(150));

        let started = Instant::now();
        let execution = sandbox
            .execute("getUserInput('a', 1)\nwhile (true) {}".to_string(), host())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(execution.result, Err(ScriptError::Timeout { limit_ms: 5000 }));
        let output = execution.host.finish();
        assert_eq!(output.input_records.len(), 1);
        assert_eq!(output.input_records[0].name, "a");
    }

    #[tokio::test]
    async fn syntax_errors_do_not_run() {
        let execution = SandboxExecutor::default()
            .execute("getUserInput('a', 1)\nconst = 3".to_string(), host())
            .await
            .unwrap();

        assert!(matches!(execution.result, Err(ScriptError::Syntax { line: 2, .. })));
        assert!(execution.host.finish().input_records.is_empty());
    }

    #[test]
    fn runs_from_a_blocking_context() {
        let execution = tokio_test::block_on(
            SandboxExecutor::default().execute("const x = [1, 2, 3].map(n => n * 2)".to_string(), host()),
        )
        .unwrap();
        assert!(execution.result.is_ok());
    }
}
