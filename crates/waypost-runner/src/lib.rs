//! Long-running process supervision with graceful shutdown.
//!
//! A [`Runner`] owns a set of named worker processes sharing one
//! [`CancellationToken`]. It cancels everything when a worker fails or a
//! shutdown signal arrives, then runs registered closers under a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ProcessFn = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;
type CloserFn = Box<dyn FnOnce() -> ProcessFuture + Send>;

struct Process {
    name: &'static str,
    run: ProcessFn,
}

pub struct Runner {
    processes: Vec<Process>,
    closers: Vec<CloserFn>,
    closer_timeout: Duration,
    shutdown: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a worker. Workers run concurrently; the name shows up in
    /// start/stop/error logs.
    pub fn with_process<F, Fut>(mut self, name: &'static str, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes.push(Process {
            name,
            run: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Registers a cleanup step to run after all workers have stopped,
    /// whatever the reason they stopped.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// External handle on the shared shutdown token, mainly for tests.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Runs every worker to completion or cancellation, then the closers.
    /// Returns the first worker error, if any.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.shutdown;
        let mut workers = JoinSet::new();

        for process in self.processes {
            let worker_token = token.clone();
            let name = process.name;
            info!(process = name, "starting process");
            workers.spawn(async move {
                let result = (process.run)(worker_token).await;
                (name, result)
            });
        }

        spawn_signal_listener(token.clone());

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = name, "process finished");
                }
                Ok((name, Err(err))) => {
                    error!(process = name, error = %err, "process failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    token.cancel();
                }
                Err(join_err) => {
                    error!(error = %join_err, "process panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!(join_err));
                    }
                    token.cancel();
                }
            }
        }

        if !self.closers.is_empty() {
            info!(timeout_s = self.closer_timeout.as_secs(), "running closers");
            if tokio::time::timeout(self.closer_timeout, run_closers(self.closers))
                .await
                .is_err()
            {
                error!("closers timed out");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(err) => {
                        error!(error = %err, "failed to install sigterm handler");
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("received interrupt"),
                _ = sigterm.recv() => info!("received sigterm"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt");
        }
        token.cancel();
    });
}

async fn run_closers(closers: Vec<CloserFn>) {
    let mut set = JoinSet::new();
    for closer in closers {
        set.spawn(closer());
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => debug!("closer finished"),
            Ok(Err(err)) => error!(error = %err, "closer failed"),
            Err(err) => error!(error = %err, "closer panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_all_processes() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = Runner::new()
            .with_shutdown_token(token)
            .with_process("sleeper", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_process("second-sleeper", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .run()
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_process_failure_cancels_the_rest_and_surfaces_error() {
        let result = Runner::new()
            .with_process("failing", |_ctx| async move {
                Err(anyhow::anyhow!("worker exploded"))
            })
            .with_process("bystander", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .run()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closers_run_after_processes() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let result = Runner::new()
            .with_process("instant", |_ctx| async move { Ok(()) })
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .run()
            .await;
        assert!(result.is_ok());
        assert!(closed.load(Ordering::SeqCst));
    }
}
