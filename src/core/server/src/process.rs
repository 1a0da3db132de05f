// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::bucket::{Bucket, BucketState};
use crate::context::ServerContext;
use crate::extauth::ExternalAuthManager;
use crate::listener::ListenerBuilder;
use crate::privileges::PrivilegeDb;
use crate::settings::Settings;
use crate::worker::Worker;
use crate::{Signal, THREAD_PREFIX};
use config::*;
use crossbeam_channel::{bounded, Sender};
use engine::memory::MemoryEngine;
use logger::Drain;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const SIGNAL_QUEUE_DEPTH: usize = 128;

pub struct ProcessBuilder {
    listener: ListenerBuilder,
    workers: Vec<Worker>,
    server: Arc<ServerContext>,
    log_drain: Box<dyn Drain>,
    signal_txs: Vec<Sender<Signal>>,
}

impl ProcessBuilder {
    pub fn new<T>(config: &T, log_drain: Box<dyn Drain>) -> crate::Result<Self>
    where
        T: ServerConfig
            + WorkerConfig
            + TlsConfig
            + McbpConfig
            + BucketConfig
            + ExternalAuthConfig,
    {
        let settings = Settings::new(config);
        let engines = config
            .bucket()
            .names()
            .iter()
            .map(|name| {
                let engine: Arc<dyn engine::KvEngine> =
                    Arc::new(MemoryEngine::new(settings.vbuckets));
                (name.clone(), engine)
            })
            .collect();
        Self::with_engines(config, log_drain, engines)
    }

    /// As `new`, but with explicitly provided engines per bucket. Used to
    /// run the frontend against instrumented engines in tests.
    pub fn with_engines<T>(
        config: &T,
        log_drain: Box<dyn Drain>,
        engines: Vec<(String, Arc<dyn engine::KvEngine>)>,
    ) -> crate::Result<Self>
    where
        T: ServerConfig
            + WorkerConfig
            + TlsConfig
            + McbpConfig
            + BucketConfig
            + ExternalAuthConfig,
    {
        let settings = Settings::new(config);

        let privileges = Arc::new(match config.extauth().user_db() {
            Some(path) => PrivilegeDb::load(&path).map_err(|e| {
                error!("could not load user db: {}", e);
                std::io::Error::new(std::io::ErrorKind::Other, "bad user db")
            })?,
            None => PrivilegeDb::with_default_user(),
        });

        let extauth = Arc::new(ExternalAuthManager::new(Duration::from_secs(
            settings.extauth_push_interval,
        )));

        // bucket 0 is the no-bucket placeholder; the configured buckets
        // each get their own engine instance
        let mut buckets = vec![Arc::new(Bucket::no_bucket())];
        for (name, engine) in engines {
            let bucket = Bucket::new(&name, engine);
            bucket.set_state(BucketState::Ready);
            buckets.push(Arc::new(bucket));
        }

        let server = Arc::new(ServerContext::new(
            settings,
            buckets,
            privileges,
            extauth,
        ));

        let mut signal_txs = Vec::new();
        let mut workers = Vec::new();
        let timeout = Duration::from_millis(config.worker().timeout() as u64);
        for _ in 0..config.worker().threads() {
            let (tx, rx) = bounded(SIGNAL_QUEUE_DEPTH);
            signal_txs.push(tx);
            workers.push(Worker::new(
                server.clone(),
                rx,
                config.worker().nevent(),
                timeout,
            )?);
        }

        let listener = ListenerBuilder::new(config)?;

        Ok(Self {
            listener,
            workers,
            server,
            log_drain,
            signal_txs,
        })
    }

    pub fn spawn(mut self) -> Process {
        let worker_shared: Vec<_> = self.workers.iter().map(|w| w.shared()).collect();

        // the manager thread for the external auth bridge
        let extauth = self.server.extauth.clone();
        let privileges = self.server.privileges.clone();
        let extauth_thread = std::thread::Builder::new()
            .name(format!("{}_extauth", THREAD_PREFIX))
            .spawn(move || extauth.run(privileges))
            .ok();

        let (listener_tx, listener_rx) = bounded(SIGNAL_QUEUE_DEPTH);
        self.signal_txs.push(listener_tx);
        let listener_waker = self.listener.waker();
        let mut listener = self.listener.build(worker_shared.clone(), listener_rx);
        let listener_thread = std::thread::Builder::new()
            .name(format!("{}_listener", THREAD_PREFIX))
            .spawn(move || listener.run());

        let mut threads = Vec::new();
        if let Ok(handle) = listener_thread {
            threads.push(handle);
        }
        for (id, mut worker) in self.workers.drain(..).enumerate() {
            if let Ok(handle) = std::thread::Builder::new()
                .name(format!("{}_worker_{}", THREAD_PREFIX, id))
                .spawn(move || worker.run())
            {
                threads.push(handle);
            }
        }

        Process {
            threads,
            extauth_thread,
            signal_txs: self.signal_txs,
            worker_shared,
            listener_waker,
            server: self.server,
            log_drain: self.log_drain,
        }
    }

    pub fn server(&self) -> Arc<ServerContext> {
        self.server.clone()
    }
}

pub struct Process {
    threads: Vec<JoinHandle<()>>,
    extauth_thread: Option<JoinHandle<()>>,
    signal_txs: Vec<Sender<Signal>>,
    worker_shared: Vec<Arc<crate::notify::WorkerShared>>,
    listener_waker: Arc<net::Waker>,
    server: Arc<ServerContext>,
    log_drain: Box<dyn Drain>,
}

impl Process {
    pub fn server(&self) -> Arc<ServerContext> {
        self.server.clone()
    }

    /// Attempts to gracefully shutdown the `Process` by sending a
    /// shutdown to each thread and then waiting to join those threads.
    pub fn shutdown(mut self) {
        for tx in &self.signal_txs {
            let _ = tx.try_send(Signal::Shutdown);
        }
        for shared in &self.worker_shared {
            shared.wake();
        }
        let _ = self.listener_waker.wake();
        self.server.extauth.shutdown();

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        if let Some(thread) = self.extauth_thread.take() {
            let _ = thread.join();
        }
        self.log_drain.flush();
    }

    /// Block until all threads terminate. Under normal conditions this
    /// blocks indefinitely.
    pub fn wait(mut self) {
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        if let Some(thread) = self.extauth_thread.take() {
            let _ = thread.join();
        }
        self.log_drain.flush();
    }
}
