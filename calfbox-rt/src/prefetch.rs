//! Prefetch pipe pool (§4.2): a small pool of streaming buffers, each fed
//! by its own background reader thread, assigned to a voice on note-start
//! and returned on note-end.
//!
//! A pipe exposes `consumed(n)`/`remaining()` to the voice generator; the
//! reader thread keeps pushing ahead of the read cursor independently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};

use calfbox_core::constants::{PREFETCH_BUFFER_FRAMES, PREFETCH_POOL_SIZE};
use calfbox_core::waveform::Waveform;

/// The RT-thread-owned half of a pipe: a lock-free consumer plus the
/// bookkeeping the voice generator needs.
pub struct PrefetchHandle {
    consumer: HeapCons<(i16, i16)>,
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
    pool_in_use: Arc<AtomicUsize>,
}

impl PrefetchHandle {
    /// Frames currently available to read without blocking.
    pub fn remaining(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Read up to `out.len()` frames, returning the number actually read.
    pub fn read(&mut self, out: &mut [(i16, i16)]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.consumer.try_pop() {
                Some(frame) => {
                    out[n] = frame;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        self.pool_in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pool of `PREFETCH_POOL_SIZE` pipes. Lives on the control thread; a voice
/// on the RT thread only ever touches the `PrefetchHandle` it was handed,
/// never the pool itself (§5: reader threads are spawned/joined by the
/// control thread, never by RT). `in_use` is shared with every handle it
/// hands out so a slot is reclaimed whenever a handle is dropped, however
/// that happens (natural voice end, steal, or an explicit `release`),
/// rather than only through a single call site that's easy to miss.
pub struct PrefetchPool {
    in_use: Arc<AtomicUsize>,
}

impl PrefetchPool {
    pub fn new() -> Self {
        Self { in_use: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn available(&self) -> usize {
        PREFETCH_POOL_SIZE.saturating_sub(self.in_use.load(Ordering::Relaxed))
    }

    /// Start streaming `waveform` from `start_frame`, wrapping at
    /// `loop_end` back to `loop_start` when `looping` is set, otherwise
    /// stopping at `total_frames`. Returns `None` (§7 `PrefetchExhausted`)
    /// when the pool has no free pipe; the caller falls back to
    /// preloaded-only playback.
    pub fn acquire(
        &mut self,
        waveform: Arc<Waveform>,
        start_frame: u32,
        loop_start: u32,
        loop_end: u32,
        looping: bool,
    ) -> Option<PrefetchHandle> {
        if self.in_use.load(Ordering::Relaxed) >= PREFETCH_POOL_SIZE {
            return None;
        }
        self.in_use.fetch_add(1, Ordering::Relaxed);

        let rb = HeapRb::<(i16, i16)>::new(PREFETCH_BUFFER_FRAMES);
        let (mut producer, consumer) = rb.split();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_reader = stop.clone();

        let reader = thread::Builder::new()
            .name("calfbox-prefetch".into())
            .spawn(move || {
                let mut pos = start_frame;
                let channels = waveform.channels as usize;
                while !stop_reader.load(Ordering::Relaxed) {
                    if pos >= waveform.total_frames {
                        if looping && loop_end > loop_start {
                            pos = loop_start;
                        } else {
                            break;
                        }
                    }
                    let base = pos as usize * channels;
                    let l = waveform.data[base];
                    let r = if channels > 1 { waveform.data[base + 1] } else { l };
                    match producer.try_push((l, r)) {
                        Ok(()) => {
                            pos += 1;
                            if looping && pos >= loop_end {
                                pos = loop_start;
                            }
                        }
                        Err(_) => thread::sleep(Duration::from_millis(2)),
                    }
                }
            })
            .expect("failed to spawn prefetch reader thread");

        Some(PrefetchHandle {
            consumer,
            stop,
            reader: Some(reader),
            pool_in_use: self.in_use.clone(),
        })
    }

    /// Return a pipe's slot to the pool. Dropping the handle stops its
    /// reader thread and reclaims the slot; this is just a named drop for
    /// callers that want it explicit.
    pub fn release(&mut self, handle: PrefetchHandle) {
        drop(handle);
    }
}

impl Default for PrefetchPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn waveform(total_frames: u32) -> Arc<Waveform> {
        Arc::new(Waveform {
            data: (0..total_frames as i16).collect(),
            channels: 1,
            sample_rate: 44100,
            total_frames,
            preloaded_frames: 4,
            loop_meta: None,
            levels: Vec::new(),
            source_path: PathBuf::new(),
        })
    }

    #[test]
    fn streams_frames_beyond_preload() {
        let mut pool = PrefetchPool::new();
        let w = waveform(100);
        let mut handle = pool.acquire(w, 4, 0, 100, false).unwrap();

        let mut buf = [(0i16, 0i16); 8];
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut total = 0;
        while total < 8 && std::time::Instant::now() < deadline {
            total += handle.read(&mut buf[total..]);
            if total < 8 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        assert_eq!(total, 8);
        assert_eq!(buf[0], (4, 4));
        assert_eq!(buf[7], (11, 11));
    }

    #[test]
    fn pool_exhausts_after_pool_size_acquisitions() {
        let mut pool = PrefetchPool::new();
        let mut handles = Vec::new();
        for _ in 0..PREFETCH_POOL_SIZE {
            handles.push(pool.acquire(waveform(1000), 0, 0, 1000, true).unwrap());
        }
        assert!(pool.acquire(waveform(1000), 0, 0, 1000, true).is_none());
        assert_eq!(pool.available(), 0);
    }
}
