//! Driver thread and cross-thread hand-off
//!
//! [`RootDriver::spawn`] moves a [`Root`] onto a dedicated thread running a
//! current-thread tokio runtime. The driver ticks the root on the configured
//! period and runs tasks handed over through a [`RootHandle`]. After every
//! task the root processes until idle.
//!
//! Waits are bounded by the configured hand-off timeout. A blocking
//! hand-off from the driver thread itself runs in place when the root is
//! free and is rejected when a task is already holding it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::Root;
use super::address::ControlAddress;
use super::error::{HandOffError, RuntimeError};
use super::value::{PError, Value};

type Task = Box<dyn FnOnce(&mut Root) + Send>;

enum Message {
    Task(Task),
    Shutdown,
}

/// Cloneable handle for running work on the driver thread
#[derive(Clone)]
pub struct RootHandle {
    root: Arc<Mutex<Root>>,
    sender: mpsc::UnboundedSender<Message>,
    driver: ThreadId,
    timeout: Duration,
}

impl RootHandle {
    /// Run `f` on the root and wait for its result
    pub fn invoke_blocking<R, F>(&self, f: F) -> Result<R, HandOffError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Root) -> R + Send + 'static,
    {
        if thread::current().id() == self.driver {
            let mut root = self.root.try_lock().ok_or(HandOffError::Reentrant)?;
            let result = f(&mut root);
            root.run_until_idle();
            return Ok(result);
        }

        let (tx, rx) = std_mpsc::sync_channel(1);
        self.post(move |root| {
            let _ = tx.send(f(root));
        })?;
        rx.recv_timeout(self.timeout).map_err(|err| match err {
            std_mpsc::RecvTimeoutError::Timeout => HandOffError::Timeout(self.timeout),
            std_mpsc::RecvTimeoutError::Disconnected => HandOffError::Closed,
        })
    }

    /// Run `f` on the root and await its result
    pub async fn invoke<R, F>(&self, f: F) -> Result<R, HandOffError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Root) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move |root| {
            let _ = tx.send(f(root));
        })?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(HandOffError::Closed),
            Err(_) => Err(HandOffError::Timeout(self.timeout)),
        }
    }

    /// Queue `f` without waiting
    pub fn post<F>(&self, f: F) -> Result<(), HandOffError>
    where
        F: FnOnce(&mut Root) + Send + 'static,
    {
        self.sender
            .send(Message::Task(Box::new(f)))
            .map_err(|_| HandOffError::Closed)
    }

    /// Send a host request and await its answer
    pub async fn request(
        &self,
        to: ControlAddress,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, PError> {
        let (tx, rx) = oneshot::channel();
        self.invoke(move |root| {
            root.request_with(to, args, move |outcome| {
                let _ = tx.send(outcome);
            })
        })
        .await
        .map_err(|err| PError::from(RuntimeError::from(err)))??;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PError::cancelled("root driver closed")),
            Err(_) => Err(PError::timeout(format!(
                "no answer within {:?}",
                self.timeout
            ))),
        }
    }

    /// Bounded wait used by this handle
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Owner of the driver thread
pub struct RootDriver {
    handle: RootHandle,
    thread: Option<JoinHandle<()>>,
}

impl RootDriver {
    /// Move `root` onto a new driver thread
    pub fn spawn(root: Root) -> Result<Self, HandOffError> {
        let timeout = root.config().handoff_timeout();
        let tick_period = root.config().tick_period();
        let name = format!("hotwire-{}", root.config().root_id);
        let root = Arc::new(Mutex::new(root));
        let (sender, receiver) = mpsc::unbounded_channel();

        let shared = root.clone();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to build driver runtime");
                        return;
                    }
                };
                runtime.block_on(drive(shared, receiver, tick_period));
            })
            .map_err(|err| HandOffError::Spawn(err.to_string()))?;

        let driver = thread.thread().id();
        tracing::info!(?tick_period, "root driver started");
        Ok(Self {
            handle: RootHandle {
                root,
                sender,
                driver,
                timeout,
            },
            thread: Some(thread),
        })
    }

    /// Handle for handing work to the driver
    pub fn handle(&self) -> RootHandle {
        self.handle.clone()
    }

    /// Stop the driver and wait for its thread to exit
    pub fn shutdown(mut self) -> Result<(), HandOffError> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<(), HandOffError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.handle.sender.send(Message::Shutdown);
        thread
            .join()
            .map_err(|_| HandOffError::Spawn("driver thread panicked".into()))
    }
}

impl Drop for RootDriver {
    fn drop(&mut self) {
        if let Err(err) = self.stop_thread() {
            tracing::error!(error = %err, "root driver did not stop cleanly");
        }
    }
}

async fn drive(
    root: Arc<Mutex<Root>>,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    tick_period: Option<Duration>,
) {
    let started = Instant::now();
    let mut ticker = tick_period.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        let message = match ticker.as_mut() {
            Some(ticker) => tokio::select! {
                message = receiver.recv() => message,
                _ = ticker.tick() => {
                    let now = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    root.lock().tick(now);
                    continue;
                }
            },
            None => receiver.recv().await,
        };
        match message {
            Some(Message::Task(task)) => {
                let mut root = root.lock();
                task(&mut root);
                root.run_until_idle();
            }
            Some(Message::Shutdown) | None => break,
        }
    }
    tracing::info!("root driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::registry::ComponentCatalog;

    fn driver() -> RootDriver {
        let config = RuntimeConfig {
            tick_period_ms: 0,
            handoff_timeout_ms: 500,
            ..RuntimeConfig::default()
        };
        let root = Root::new(config, ComponentCatalog::new()).unwrap();
        RootDriver::spawn(root).unwrap()
    }

    #[test]
    fn test_invoke_blocking_runs_on_driver() {
        let driver = driver();
        let handle = driver.handle();
        let caller = thread::current().id();
        let (ran_on, started) = handle
            .invoke_blocking(|root| (thread::current().id(), root.start()))
            .unwrap();
        assert_ne!(ran_on, caller);
        assert!(started);
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_nested_blocking_hand_off_is_rejected() {
        let driver = driver();
        let handle = driver.handle();
        let inner = handle.clone();
        let nested = handle
            .invoke_blocking(move |_root| inner.invoke_blocking(|root| root.time()))
            .unwrap();
        assert_eq!(nested, Err(HandOffError::Reentrant));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_closed_driver_rejects_work() {
        let driver = driver();
        let handle = driver.handle();
        driver.shutdown().unwrap();
        assert_eq!(
            handle.invoke_blocking(|root| root.time()),
            Err(HandOffError::Closed)
        );
    }
}
