//! Process lifecycle for the application server.
//!
//! A [`Runner`] starts named long-running processes concurrently, stops all of them when
//! one fails or a shutdown signal arrives, then runs the registered closers one after
//! another in registration order under a shared timeout.
//!
//! ```no_run
//! use lorix_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |token| async move {
//!             token.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Long-running process; it must return once the token is cancelled.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

/// Cleanup step executed after every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxFuture + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
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
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a process identified in logs by `name`.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("process-{}", self.processes.len());
        self.with_named_process(name, process)
    }

    /// Closers run sequentially in the order they were added.
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

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs until stopped and exits the process with 0 on clean shutdown, 1 otherwise.
    pub async fn run(self) {
        spawn_signal_listener(self.cancellation_token.clone());
        match self.run_until_stopped().await {
            Ok(()) => {
                info!("application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                error!(error = %format!("{:#}", err), "application exiting with error");
                std::process::exit(1);
            }
        }
    }

    /// Runs every process until the token is cancelled or one of them fails, then runs the
    /// closers. Returns the first process error.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                debug!(process = %name, "process starting");
                let result = process(process_token).await;
                (name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "process stopped"),
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, error = %format!("{:#}", err), "process failed");
                        first_error = Some(err.context(format!("process {} failed", name)));
                    }
                }
                Err(err) => error!(error = %err, "process panicked"),
            }
            // Any process returning early brings the others down too.
            token.cancel();
        }

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }
    info!(timeout_ms = timeout.as_millis() as u64, count = closers.len(), "running closers");

    let sequence = async {
        for (index, closer) in closers.into_iter().enumerate() {
            if let Err(err) = closer().await {
                error!(closer = index, error = %format!("{:#}", err), "closer failed");
            }
        }
    };

    if tokio::time::timeout(timeout, sequence).await.is_err() {
        error!(timeout_ms = timeout.as_millis() as u64, "closers timed out");
    }
}

fn spawn_signal_listener(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received interrupt signal");
                ctrl_c_token.cancel();
            }
            Err(err) => warn!(error = %err, "unable to listen for interrupt signal"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received terminate signal");
                token.cancel();
            }
            Err(err) => warn!(error = %err, "unable to listen for terminate signal"),
        }
    });
}
