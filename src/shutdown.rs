// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shutdown Coordinator
//!
//! ```text
//! RUNNING --signal--> DRAINING --pool stopped, identity released--> STOPPED
//! ```
//!
//! The first termination signal cancels the `drain` token: the dispatcher
//! stops accepting connections and waits for in-flight requests, bounded by
//! the drain timeout. A second signal while draining cancels the `force`
//! token, which cuts that wait short. Further signals are ignored.
//!
//! Uses `tokio_util::sync::CancellationToken`, the same way background
//! loops in this service observe shutdown.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => ShutdownState::Running,
            DRAINING => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: AtomicU8,
    drain: CancellationToken,
    force: CancellationToken,
    drain_timeout: Duration,
    drain_started: OnceLock<Instant>,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            drain: CancellationToken::new(),
            force: CancellationToken::new(),
            drain_timeout,
            drain_started: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Cancelled when draining starts.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Cancelled when a second signal arrives while draining.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    /// Handle one termination request. Returns the resulting state.
    pub fn request_shutdown(&self) -> ShutdownState {
        match self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let _ = self.drain_started.set(Instant::now());
                info!(timeout = ?self.drain_timeout, "Shutdown requested; draining in-flight work");
                self.drain.cancel();
                ShutdownState::Draining
            }
            Err(DRAINING) => {
                if !self.force.is_cancelled() {
                    warn!("Second shutdown request while draining; cutting drain short");
                    self.force.cancel();
                }
                ShutdownState::Draining
            }
            Err(_) => {
                debug!("Shutdown requested after stop; ignoring");
                ShutdownState::Stopped
            }
        }
    }

    /// Time left of the drain budget. The whole budget before draining
    /// starts, zero once shutdown has been forced.
    pub fn drain_remaining(&self) -> Duration {
        if self.force.is_cancelled() {
            return Duration::ZERO;
        }
        match self.drain_started.get() {
            Some(started) => self.drain_timeout.saturating_sub(started.elapsed()),
            None => self.drain_timeout,
        }
    }

    /// Final transition, after the identity has been released.
    pub fn mark_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
        info!("Service stopped");
    }

    /// Wait for `drain`, then for the drain timeout or `force`, whichever
    /// comes first.
    pub async fn drain_deadline(&self) {
        self.drain.cancelled().await;
        tokio::select! {
            _ = tokio::time::sleep(self.drain_remaining()) => {
                warn!(timeout = ?self.drain_timeout, "Drain timeout elapsed");
            }
            _ = self.force.cancelled() => {}
        }
    }

    /// Turn SIGTERM, SIGQUIT and Ctrl-C into shutdown requests.
    ///
    /// Returns once a forced shutdown has been requested. Signals arriving
    /// after that are swallowed.
    pub async fn listen_for_signals(&self) -> std::io::Result<()> {
        let mut signals = Signals::install()?;
        loop {
            tokio::select! {
                name = signals.recv() => {
                    info!(signal = name, "Received termination signal");
                    if self.request_shutdown() == ShutdownState::Stopped {
                        return Ok(());
                    }
                }
                _ = self.force.cancelled() => return Ok(()),
            }
        }
    }
}

struct Signals {
    #[cfg(unix)]
    term: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                term: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.term.recv() => "SIGTERM",
                _ = self.quit.recv() => "SIGQUIT",
                Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            }
        }
        #[cfg(not(unix))]
        {
            loop {
                if tokio::signal::ctrl_c().await.is_ok() {
                    return "ctrl-c";
                }
            }
        }
    }
}
