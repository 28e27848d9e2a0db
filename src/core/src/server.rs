// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::job::Job;
use crate::listener::Listener;
use crate::poller::Poller;
use crate::timer::Timer;
use crate::worker::{Worker, WorkerContext};
use crate::workers::{WorkerSet, WorkerState};
use crate::{SessionSweeper, THREAD_PREFIX};

use common::Shutdown;
use config::ServerOptions;
use net::{Timeout, TlsTcpAcceptor};
use protocol_common::{Compose, Execute, Parse};
use queue::BoundedQueue;

use std::io::Result;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// bound on one supervisor wait so the stop flag is observed promptly
const SUPERVISOR_WAIT: Duration = Duration::from_millis(500);

/// Builds and launches the serving core: the queue, one listener thread per
/// configured endpoint, the keep-alive poller, the initial worker pool, and
/// the timer.
pub struct ServerBuilder<P, Req, Rsp, D> {
    options: ServerOptions,
    parser: P,
    dispatcher: Arc<D>,
    sweeper: Option<Arc<dyn SessionSweeper>>,
    _marker: PhantomData<fn() -> (Req, Rsp)>,
}

impl<P, Req, Rsp, D> ServerBuilder<P, Req, Rsp, D>
where
    P: Parse<Req> + Clone + Send + 'static,
    Req: 'static,
    Rsp: Compose + 'static,
    D: Execute<Req, Rsp> + Send + Sync + 'static,
{
    pub fn new(options: ServerOptions, parser: P, dispatcher: D) -> Self {
        Self {
            options,
            parser,
            dispatcher: Arc::new(dispatcher),
            sweeper: None,
            _marker: PhantomData,
        }
    }

    /// Attach the session scope holder whose timeout sweep the timer runs.
    pub fn sweeper(mut self, sweeper: Arc<dyn SessionSweeper>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    /// Bind every endpoint and start all threads. Startup errors (a bind
    /// failing after its retries, unloadable TLS material) abort here,
    /// before any thread exists.
    pub fn spawn(self) -> Result<Server<P, Req, Rsp, D>> {
        let options = self.options;

        for (name, value) in &options.set_env {
            std::env::set_var(name, value);
        }

        let shutdown = Shutdown::new();
        let producers_done = Shutdown::new();
        let queue = Arc::new(BoundedQueue::new(options.queue_size));

        let mut bound = Vec::new();
        let mut local_addrs = Vec::new();
        for spec in &options.listen {
            let mut listener = net::Listener::bind(
                &spec.ip,
                spec.port,
                options.listen_backlog,
                options.listen_retry,
            )?;

            if let Some(tls) = &spec.tls {
                let acceptor = TlsTcpAcceptor::builder()?
                    .certificate_chain_file(&tls.certificate)
                    .private_key_file(&tls.key)
                    .build()?;
                listener = listener.with_tls(Arc::new(acceptor));
            }

            info!(
                "listening on {}{}",
                listener.local_addr(),
                if listener.is_tls() { " (tls)" } else { "" }
            );
            local_addrs.push(listener.local_addr());
            bound.push(listener);
        }

        let (poller, poller_handle) = Poller::new(queue.clone(), shutdown.clone())?;

        let workers = Arc::new(WorkerSet::new(options.min_threads));
        let ctx = WorkerContext {
            parser: self.parser,
            dispatcher: self.dispatcher,
            queue: queue.clone(),
            poller: poller_handle.clone(),
            shutdown: shutdown.clone(),
            producers_done: producers_done.clone(),
            read_timeout: Timeout::from(options.socket_read_timeout),
            write_timeout: Timeout::from(options.socket_write_timeout),
            keep_alive_timeout: options.keep_alive_timeout,
            buffer_size: options.buffer_size,
            _marker: PhantomData,
        };

        info!("starting {} workers", options.min_threads);
        for _ in 0..options.min_threads {
            spawn_worker(&ctx, &workers)?;
        }

        let poller_thread = std::thread::Builder::new()
            .name(format!("{}_poller", THREAD_PREFIX))
            .spawn(move || poller.run())?;

        let handshake_timeout = Timeout::from(options.socket_read_timeout);
        let mut listener_threads = Vec::new();
        for (index, listener) in bound.into_iter().enumerate() {
            let listener = Listener::new(
                listener,
                queue.clone(),
                shutdown.clone(),
                handshake_timeout,
                options.keep_alive_max,
            );
            listener_threads.push(
                std::thread::Builder::new()
                    .name(format!("{}_listener_{}", THREAD_PREFIX, index))
                    .spawn(move || listener.run())?,
            );
        }

        let timer = Timer {
            queue: queue.clone(),
            workers: workers.clone(),
            poller: poller_handle,
            sweeper: self.sweeper,
            shutdown: shutdown.clone(),
            max_request_time: options.max_request_time,
        };
        let timer_thread = std::thread::Builder::new()
            .name(format!("{}_timer", THREAD_PREFIX))
            .spawn(move || timer.run())?;

        Ok(Server {
            queue,
            shutdown,
            producers_done,
            workers,
            ctx,
            local_addrs,
            listener_threads,
            poller_thread,
            timer_thread,
            max_threads: options.max_threads,
            thread_start_delay: options.thread_start_delay,
        })
    }
}

/// A running serving core. [`Server::wait`] runs the pool supervisor on the
/// calling thread until shutdown, then executes the shutdown protocol.
pub struct Server<P, Req, Rsp, D> {
    queue: Arc<BoundedQueue<Job>>,
    shutdown: Shutdown,
    producers_done: Shutdown,
    workers: Arc<WorkerSet>,
    ctx: WorkerContext<P, Req, Rsp, D>,
    local_addrs: Vec<SocketAddr>,
    listener_threads: Vec<JoinHandle<()>>,
    poller_thread: JoinHandle<()>,
    timer_thread: JoinHandle<()>,
    max_threads: usize,
    thread_start_delay: Duration,
}

impl<P, Req, Rsp, D> Server<P, Req, Rsp, D>
where
    P: Parse<Req> + Clone + Send + 'static,
    Req: 'static,
    Rsp: Compose + 'static,
    D: Execute<Req, Rsp> + Send + Sync + 'static,
{
    /// The bound addresses, in configuration order. Useful when an endpoint
    /// was configured with port zero.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// A cloneable handle for requesting shutdown from another thread.
    pub fn handle(&self) -> Handle {
        Handle {
            shutdown: self.shutdown.clone(),
            queue: self.queue.clone(),
            workers: self.workers.clone(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.handle().shutdown();
    }

    /// Run the worker-pool supervisor until shutdown, then stop everything:
    /// listeners first so no new connection is admitted, then the poller,
    /// the timer, and finally the workers once they have drained the queue.
    pub fn wait(self) {
        while !self.shutdown.is_set() {
            if !self.queue.wait_no_idle(SUPERVISOR_WAIT) {
                continue;
            }
            if self.shutdown.is_set() {
                break;
            }

            if self.workers.live() < self.max_threads {
                debug!("no idle worker at enqueue; spawning one");
                if let Err(e) = spawn_worker(&self.ctx, &self.workers) {
                    error!("cannot spawn worker: {}", e);
                }
            } else {
                warn!("max worker count {} reached", self.max_threads);
            }

            // damp oscillation between the spawn and the next signal
            if !self.thread_start_delay.is_zero() {
                std::thread::sleep(self.thread_start_delay);
            }
        }

        info!("stopping server");

        // stop admitting new connections, then stop the producers of
        // recycled ones, before releasing the workers to finish the queue
        for thread in self.listener_threads {
            let _ = thread.join();
        }
        let _ = self.poller_thread.join();
        let _ = self.timer_thread.join();

        self.producers_done.set();
        self.queue.release_consumers();
        for handle in self.workers.take_handles() {
            let _ = handle.join();
        }

        info!("server stopped");
    }
}

/// Control surface shared with other threads: request shutdown, observe
/// pool size.
#[derive(Clone)]
pub struct Handle {
    shutdown: Shutdown,
    queue: Arc<BoundedQueue<Job>>,
    workers: Arc<WorkerSet>,
}

impl Handle {
    /// Set the stop flag and nudge the supervisor awake. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.set();
        self.queue.signal_no_idle();
        self.queue.release_consumers();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    pub fn live_workers(&self) -> usize {
        self.workers.live()
    }
}

fn spawn_worker<P, Req, Rsp, D>(
    ctx: &WorkerContext<P, Req, Rsp, D>,
    workers: &Arc<WorkerSet>,
) -> Result<()>
where
    P: Parse<Req> + Clone + Send + 'static,
    Req: 'static,
    Rsp: Compose + 'static,
    D: Execute<Req, Rsp> + Send + Sync + 'static,
{
    let id = workers.next_id();
    let state = Arc::new(WorkerState::new());

    let worker = Worker {
        id,
        ctx: ctx.clone(),
        workers: workers.clone(),
        state: state.clone(),
    };

    workers.adopt(id, state);

    match std::thread::Builder::new()
        .name(format!("{}_worker_{}", THREAD_PREFIX, id))
        .spawn(move || worker.run())
    {
        Ok(handle) => {
            workers.attach(id, handle);
            Ok(())
        }
        Err(e) => {
            workers.abort(id);
            Err(e)
        }
    }
}
