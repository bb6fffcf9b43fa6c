// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::context::ResolutionContext;
use crate::{IrqError, IrqResult};
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

/// Non-blocking readability check of one descriptor.
pub fn is_readable(fd: RawFd) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }];
    Ok(poll_fds(&mut fds, Some(Duration::ZERO))? > 0 && fds[0].revents & libc::POLLIN != 0)
}

/// `poll(2)` with EINTR retry. `None` blocks indefinitely.
fn poll_fds(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = match timeout {
        None => -1,
        Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
    };
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            if let Some(bad) = fds.iter().find(|p| p.revents & libc::POLLNVAL != 0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("descriptor {} is not open", bad.fd),
                ));
            }
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[derive(Debug, Default)]
struct WakeFlag(AtomicBool);

impl WakeFlag {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Single-threaded executor for interrupt waits.
///
/// Runs one future at a time on the calling thread. Between polls it
/// dispatches every armed UIO device with a firing to consume and otherwise
/// sleeps in `poll(2)` on the armed devices' descriptors.
pub struct EventLoop<'a> {
    ctx: &'a ResolutionContext,
}

impl<'a> EventLoop<'a> {
    pub fn new(ctx: &'a ResolutionContext) -> Self {
        Self { ctx }
    }

    pub fn block_on<F: Future>(&self, future: F) -> IrqResult<F::Output> {
        match self.run(future, None)? {
            Some(output) => Ok(output),
            None => Err(IrqError::Stalled),
        }
    }

    /// Like [`block_on`](Self::block_on) but gives up after `timeout`,
    /// returning `None`. The future is dropped on expiry, which deregisters
    /// any waiter it holds.
    pub fn block_on_timeout<F: Future>(
        &self,
        future: F,
        timeout: Duration,
    ) -> IrqResult<Option<F::Output>> {
        self.run(future, Some(Instant::now() + timeout))
    }

    fn run<F: Future>(&self, future: F, deadline: Option<Instant>) -> IrqResult<Option<F::Output>> {
        let mut future = pin!(future);
        let flag = Arc::new(WakeFlag::default());
        let waker = Waker::from(flag.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            flag.take();
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(Some(output));
            }

            if self.ctx.dispatch_ready() > 0 || flag.take() {
                continue;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!("Event loop deadline reached");
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let mut fds: Vec<libc::pollfd> = self
                .ctx
                .armed_fds()
                .into_iter()
                .map(|fd| libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();
            if fds.is_empty() {
                return Err(IrqError::Stalled);
            }

            tracing::trace!("Event loop sleeping on {} descriptors", fds.len());
            poll_fds(&mut fds, remaining)
                .map_err(|e| IrqError::device_io("event loop poll", e))?;
        }
    }
}
