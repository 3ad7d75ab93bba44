//! The RT command bridge (§4.11): a bounded SPSC execute FIFO carrying
//! closures from the control thread to the RT thread, and a bounded SPSC
//! cleanup FIFO carrying completed commands back so their teardown runs off
//! the RT thread.
//!
//! `prepare` is just "whatever the caller does before calling `submit`" —
//! there is no separate prepare phase in this API, since in Rust that work
//! is naturally the code that builds the closures' captured state before
//! the command is constructed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

/// One RT command. `execute` runs on the RT thread between blocks and
/// returns a cost; a return of 0 means the command is not yet complete and
/// will be called again next block (cooperative multi-block commands, e.g.
/// rebuilding a large region-lookup table a chunk at a time). Any nonzero
/// return retires the command: it is pushed to the cleanup FIFO and
/// `cleanup` will run on the control thread.
pub struct RtCommand {
    execute: Box<dyn FnMut() -> u32 + Send>,
    cleanup: Box<dyn FnOnce() + Send>,
    completion: Option<Arc<AtomicBool>>,
}

impl RtCommand {
    pub fn new(
        execute: impl FnMut() -> u32 + Send + 'static,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            execute: Box::new(execute),
            cleanup: Box::new(cleanup),
            completion: None,
        }
    }

    /// Build a command paired with a completion flag the submitter can
    /// busy-wait on (§5 "the control thread blocks on the sync semaphore
    /// when invoking a synchronous RT command").
    pub fn synchronous(
        execute: impl FnMut() -> u32 + Send + 'static,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let cmd = Self {
            execute: Box::new(execute),
            cleanup: Box::new(cleanup),
            completion: Some(flag.clone()),
        };
        (cmd, flag)
    }

    /// One-shot pointer-swap command (§9): `swap` runs on the RT thread and
    /// atomically installs the new value; `old` is dropped on the control
    /// thread once the swap has been observed, after every voice that might
    /// still hold the previous `Arc` has had a chance to pick up the new one.
    pub fn pointer_swap<T: Send + 'static>(
        mut swap: impl FnMut() + Send + 'static,
        old: T,
    ) -> Self {
        Self::new(
            move || {
                swap();
                1
            },
            move || drop(old),
        )
    }
}

/// Held by the control thread: submits commands and drains their cleanups.
pub struct ControlSide {
    execute_tx: ringbuf::HeapProd<RtCommand>,
    cleanup_rx: ringbuf::HeapCons<RtCommand>,
}

impl ControlSide {
    /// Enqueue a command, spinning with a short sleep if the execute FIFO
    /// is full (§7 `CommandQueueFull`: log a warning roughly once a second).
    pub fn submit(&mut self, mut cmd: RtCommand) {
        let mut waited_ms: u64 = 0;
        loop {
            match self.execute_tx.try_push(cmd) {
                Ok(()) => return,
                Err(rejected) => {
                    cmd = rejected;
                    thread::sleep(Duration::from_millis(2));
                    waited_ms += 2;
                    if waited_ms.is_multiple_of(1000) {
                        tracing::warn!("RT command queue full after {waited_ms}ms, still waiting");
                    }
                }
            }
        }
    }

    /// Submit a command and block until the RT thread has executed it
    /// (§5: 10ms sleep loop, no timeout).
    pub fn submit_sync(
        &mut self,
        execute: impl FnMut() -> u32 + Send + 'static,
        cleanup: impl FnOnce() + Send + 'static,
    ) {
        let (cmd, flag) = RtCommand::synchronous(execute, cleanup);
        self.submit(cmd);
        while !flag.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Run the cleanup closure of every command the RT thread has retired
    /// since the last call. Call periodically from the control thread.
    pub fn drain_cleanup(&mut self) {
        while let Some(cmd) = self.cleanup_rx.try_pop() {
            (cmd.cleanup)();
        }
    }
}

/// Held by the RT thread: drains and executes commands, forwards completed
/// ones to the cleanup FIFO. Never allocates and never blocks.
pub struct RtSide {
    execute_rx: ringbuf::HeapCons<RtCommand>,
    cleanup_tx: ringbuf::HeapProd<RtCommand>,
    /// A command still in progress (returned cost 0 last block).
    pending: Option<RtCommand>,
}

impl RtSide {
    /// Run between audio blocks: finishes any in-progress command, then
    /// drains freshly-submitted ones, each until it reports completion or
    /// asks to be resumed next block.
    pub fn drain_execute(&mut self) {
        if let Some(mut cmd) = self.pending.take() {
            if (cmd.execute)() == 0 {
                self.pending = Some(cmd);
                return;
            }
            self.retire(cmd);
        }

        while let Some(mut cmd) = self.execute_rx.try_pop() {
            if (cmd.execute)() == 0 {
                self.pending = Some(cmd);
                break;
            }
            self.retire(cmd);
        }
    }

    fn retire(&mut self, cmd: RtCommand) {
        if let Some(flag) = &cmd.completion {
            flag.store(true, Ordering::Release);
        }
        // A full cleanup FIFO here would drop the command's teardown on the
        // floor; since it's sized to the same capacity as the execute FIFO
        // and retires at least as fast as submissions, this should never
        // happen in practice. If it does, the old allocation simply leaks
        // rather than risking a double-free from re-deriving the drop.
        if self.cleanup_tx.try_push(cmd).is_err() {
            tracing::warn!("RT cleanup queue full, dropping a retired command's teardown");
        }
    }
}

/// Build one execute/cleanup FIFO pair with the given capacity (in
/// commands, not bytes).
pub fn command_bridge(capacity: usize) -> (ControlSide, RtSide) {
    let (execute_tx, execute_rx) = HeapRb::<RtCommand>::new(capacity).split();
    let (cleanup_tx, cleanup_rx) = HeapRb::<RtCommand>::new(capacity).split();
    (
        ControlSide {
            execute_tx,
            cleanup_rx,
        },
        RtSide {
            execute_rx,
            cleanup_tx,
            pending: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn one_shot_command_retires_immediately() {
        let (mut control, mut rt) = command_bridge(8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let cleaned = Arc::new(AtomicBool::new(false));
        let cleaned2 = cleaned.clone();

        control.submit(RtCommand::new(
            move || {
                ran2.store(true, Ordering::Relaxed);
                1
            },
            move || cleaned2.store(true, Ordering::Relaxed),
        ));

        rt.drain_execute();
        assert!(ran.load(Ordering::Relaxed));
        assert!(!cleaned.load(Ordering::Relaxed));

        control.drain_cleanup();
        assert!(cleaned.load(Ordering::Relaxed));
    }

    #[test]
    fn cooperative_command_resumes_across_blocks() {
        let (mut control, mut rt) = command_bridge(8);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        control.submit(RtCommand::new(
            move || {
                let n = calls2.fetch_add(1, Ordering::Relaxed) + 1;
                if n < 3 {
                    0
                } else {
                    n
                }
            },
            || {},
        ));

        rt.drain_execute();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        rt.drain_execute();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        rt.drain_execute();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        // fully retired now; further drains do nothing
        rt.drain_execute();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn synchronous_submit_sets_completion_flag() {
        let (mut control, mut rt) = command_bridge(8);
        let (cmd, flag) = RtCommand::synchronous(|| 1, || {});
        control.submit(cmd);
        assert!(!flag.load(Ordering::Acquire));
        rt.drain_execute();
        assert!(flag.load(Ordering::Acquire));
    }
}
