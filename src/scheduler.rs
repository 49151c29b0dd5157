// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delayed execution of request timeouts.

use std::{fmt, io, time::Duration};

use tokio::{runtime::Handle, task::JoinHandle};

/// Deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancels a scheduled [`Task`].
///
/// Cancelling a task that already ran is a no-op.
pub trait TimeoutHandle: Send + Sync {
    fn cancel(&self);
}

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: Task) -> Box<dyn TimeoutHandle>;
}

/// [`Scheduler`] that spawns a sleeping task on a _tokio_ runtime.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").finish_non_exhaustive()
    }
}

impl TokioScheduler {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the current context.
    ///
    /// # Errors
    ///
    /// Fails if called outside of a _tokio_ runtime.
    pub fn current() -> io::Result<Self> {
        let handle =
            Handle::try_current().map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Self::new(handle))
    }
}

struct SpawnedTimeout(JoinHandle<()>);

impl TimeoutHandle for SpawnedTimeout {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Box<dyn TimeoutHandle> {
        let join_handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(SpawnedTimeout(join_handle))
    }
}
