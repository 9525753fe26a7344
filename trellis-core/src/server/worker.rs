//! Worker orchestration for thread-per-core serving.
//!
//! A [`WorkerPool`] spawns N worker threads, each with its own
//! single-threaded runtime and its own adapter source (address sharing is
//! the source factory's concern). Configuration reaches workers as
//! [`WorkerCommand`]s over a channel: a deploy rebuilds the routing
//! handler from a recorded [`ServerSetup`](super::ServerSetup) and swaps
//! it into the worker's [`HandlerSlot`] atomically, so existing
//! connections finish with the handler they captured while new requests
//! see the fresh one.

use std::{io, rc::Rc, sync::Arc, thread::JoinHandle};

use futures_channel::{
    mpsc::{channel, Receiver, Sender},
    oneshot::{channel as ochannel, Receiver as OReceiver, Sender as OSender},
};
use futures_util::{SinkExt, StreamExt};
use monoio::utils::bind_to_cpu_set;
use service_async::MakeService;
use tracing::{error, info, warn};

use super::{serve, Adapter, HandlerSlot, ServerSetup};
use crate::{
    config::{RuntimeConfig, RuntimeType},
    router::Router,
    routing::RoutingHandler,
    AnyError,
};

/// Yields accepted connections as adapters; one per serve loop.
pub trait AdapterSource {
    type Adapter: Adapter + 'static;

    /// The next accepted connection; `None` when the listener is closed.
    #[allow(async_fn_in_trait)]
    async fn accept(&mut self) -> Option<io::Result<Self::Adapter>>;
}

/// Builds the worker-local [`ServerSetup`]; runs on the worker thread.
pub type SetupFn = Arc<dyn Fn() -> ServerSetup + Send + Sync>;

/// Actions a worker carries out.
#[derive(Clone)]
pub enum WorkerCommand {
    /// Rebuild the routing handler from a freshly recorded setup and swap
    /// it in.
    Deploy(SetupFn),
    /// Stop accepting; drain connections and exit.
    Shutdown,
}

pub struct WorkerTask {
    cmd: WorkerCommand,
    result: OSender<Result<(), AnyError>>,
}

impl WorkerTask {
    pub fn new(cmd: WorkerCommand) -> (Self, OReceiver<Result<(), AnyError>>) {
        let (tx, rx) = ochannel();
        (Self { cmd, result: tx }, rx)
    }
}

/// A collection of results from multiple worker operations.
pub struct ResultGroup<T, E>(Vec<Result<T, E>>);

impl<T, E> From<Vec<Result<T, E>>> for ResultGroup<T, E> {
    fn from(value: Vec<Result<T, E>>) -> Self {
        Self(value)
    }
}

impl<T, E> From<ResultGroup<T, E>> for Vec<Result<T, E>> {
    fn from(value: ResultGroup<T, E>) -> Self {
        value.0
    }
}

impl<E> ResultGroup<(), E> {
    pub fn err(self) -> Result<(), E> {
        for r in self.0.into_iter() {
            r?;
        }
        Ok(())
    }
}

/// The per-worker runtime, selected from [`RuntimeConfig`].
pub enum RuntimeWrapper {
    #[cfg(target_os = "linux")]
    IoUring(monoio::Runtime<monoio::time::TimeDriver<monoio::IoUringDriver>>),
    Legacy(monoio::Runtime<monoio::time::TimeDriver<monoio::LegacyDriver>>),
}

impl From<&RuntimeConfig> for RuntimeWrapper {
    fn from(config: &RuntimeConfig) -> Self {
        #[cfg(target_os = "linux")]
        let runtime_type =
            if config.runtime_type == RuntimeType::IoUring && monoio::utils::detect_uring() {
                RuntimeType::IoUring
            } else {
                RuntimeType::Legacy
            };
        #[cfg(not(target_os = "linux"))]
        let runtime_type = RuntimeType::Legacy;

        match runtime_type {
            #[cfg(target_os = "linux")]
            RuntimeType::IoUring => {
                let runtime = monoio::RuntimeBuilder::<monoio::IoUringDriver>::new()
                    .enable_timer()
                    .with_entries(config.entries)
                    .build()
                    .unwrap();
                RuntimeWrapper::IoUring(runtime)
            }
            RuntimeType::Legacy => {
                let runtime = monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
                    .enable_timer()
                    .build()
                    .unwrap();
                RuntimeWrapper::Legacy(runtime)
            }
        }
    }
}

impl RuntimeWrapper {
    pub fn block_on<F>(&mut self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        match self {
            #[cfg(target_os = "linux")]
            RuntimeWrapper::IoUring(driver) => driver.block_on(future),
            RuntimeWrapper::Legacy(driver) => driver.block_on(future),
        }
    }
}

/// Orchestrates a fleet of worker threads.
pub struct WorkerPool {
    config: RuntimeConfig,
    workers: Vec<Sender<WorkerTask>>,
}

impl WorkerPool {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawns the configured number of worker threads. Each worker builds
    /// its own adapter source through `source_factory` (which is where
    /// address sharing must be arranged) and serves until shut down.
    pub fn spawn_workers<SF, S>(&mut self, source_factory: SF) -> Vec<JoinHandle<()>>
    where
        SF: Fn(usize) -> io::Result<S> + Clone + Send + 'static,
        S: AdapterSource + 'static,
    {
        let cores = if self.config.cpu_affinity {
            std::thread::available_parallelism().ok()
        } else {
            None
        };

        (0..self.config.worker_threads)
            .map(|worker_id| {
                let (tx, rx) = channel(128);
                let factory = source_factory.clone();
                let config = self.config.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("trellis-worker-{worker_id}"))
                    .spawn(move || {
                        if let Some(cores) = cores {
                            let core = worker_id % cores;
                            if let Err(e) = bind_to_cpu_set([core]) {
                                warn!("bind thread {worker_id} to core {core} failed: {e}");
                            }
                        }
                        let mut runtime = RuntimeWrapper::from(&config);
                        runtime.block_on(async move {
                            let source = match factory(worker_id) {
                                Ok(source) => source,
                                Err(e) => {
                                    error!("worker {worker_id} failed to build its source: {e:?}");
                                    return;
                                }
                            };
                            run_worker(source, rx).await;
                        });
                    })
                    .expect("failed to start worker thread");
                self.workers.push(tx);
                handle
            })
            .collect()
    }

    /// Broadcasts a command to every worker and aggregates results.
    pub async fn dispatch(&mut self, cmd: WorkerCommand) -> ResultGroup<(), AnyError> {
        let mut results = Vec::with_capacity(self.workers.len());
        for sender in self.workers.iter_mut() {
            let (task, rx) = WorkerTask::new(cmd.clone());
            match sender.feed(task).await {
                Ok(_) => match rx.await {
                    Ok(r) => results.push(r),
                    Err(e) => results.push(Err(e.into())),
                },
                Err(e) => results.push(Err(e.into())),
            }
        }
        results.into()
    }

    /// Rebuilds and swaps the routing handler on every worker.
    pub async fn deploy(&mut self, setup: SetupFn) -> ResultGroup<(), AnyError> {
        self.dispatch(WorkerCommand::Deploy(setup)).await
    }

    /// Stops accepting everywhere and lets connections drain.
    pub async fn shutdown(&mut self) -> ResultGroup<(), AnyError> {
        let results = self.dispatch(WorkerCommand::Shutdown).await;
        self.workers.clear();
        results
    }
}

async fn run_worker<S: AdapterSource + 'static>(source: S, mut rx: Receiver<WorkerTask>) {
    // Nothing deployed yet: an empty router answers 404 until the first
    // deploy lands.
    let slot = HandlerSlot::new(Rc::new(RoutingHandler::new(Router::new())));
    let (accept_stop, stop_rx) = ochannel();
    monoio::spawn(accept_loop(source, slot.clone(), stop_rx));
    let mut accept_stop = Some(accept_stop);

    while let Some(task) = rx.next().await {
        let mut done = false;
        let result = match task.cmd {
            WorkerCommand::Deploy(setup_fn) => {
                let setup = setup_fn();
                match setup.make_via_ref(None) {
                    Ok(handler) => {
                        slot.swap(handler);
                        info!("worker deployed a new handler");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            WorkerCommand::Shutdown => {
                // Dropping the sender cancels the accept loop.
                accept_stop.take();
                done = true;
                Ok(())
            }
        };
        if task.result.send(result).is_err() {
            error!("unable to send back result");
        }
        if done {
            break;
        }
    }
}

async fn accept_loop<S: AdapterSource + 'static>(
    mut source: S,
    slot: HandlerSlot,
    mut stop: OReceiver<()>,
) {
    // Receivers for per-connection stop channels. Dropping them (when this
    // loop ends) cancels every in-flight serve loop.
    let mut conn_stops: Vec<OReceiver<()>> = Vec::new();
    loop {
        monoio::select! {
            _ = &mut stop => {
                info!("accept loop stopping");
                break;
            }
            accepted = source.accept() => {
                match accepted {
                    Some(Ok(adapter)) => {
                        conn_stops.retain_mut(|rx| rx.try_recv().is_ok());
                        let (tx, rx) = ochannel();
                        conn_stops.push(rx);
                        monoio::spawn(serve(adapter, slot.clone(), tx));
                    }
                    Some(Err(e)) => warn!("accept connection failed: {e:?}"),
                    None => {
                        info!("adapter source closed");
                        break;
                    }
                }
            }
        }
    }
}
