//! Hand-off of eye textures to an asynchronous compositor thread.
//!
//! The render thread owns two pairs of eye textures. It renders into the
//! back pair, fences it, and on a later present, once the fence has
//! signalled, swaps it with the front pair under a short lock. The
//! compositor thread only ever locks to copy the front pair out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use glam::{Quat, Vec3};

use crate::host::{GpuFence, TextureHandle};

/// Left and right eye textures.
pub type EyePair = [TextureHandle; 2];

/// Head-tracked pose an eye was rendered with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Default for EyePose {
    fn default() -> Self {
        Self {
            orientation: Quat::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

/// What the compositor displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeFrame {
    pub textures: EyePair,
    pub poses: [EyePose; 2],
    /// Incremented on every promotion.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct FrontEyes {
    frame: Option<EyeFrame>,
    sequence: u64,
}

/// Front pair shared between the render and compositor threads.
#[derive(Debug, Clone, Default)]
pub struct EyeExchange {
    front: Arc<Mutex<FrontEyes>>,
}

impl EyeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current front pair, `None` before the first promotion.
    pub fn snapshot(&self) -> Option<EyeFrame> {
        self.front
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
    }

    /// Makes `textures` the front pair, returning the previous front
    /// textures.
    fn swap_front(&self, textures: EyePair, poses: [EyePose; 2]) -> Option<EyePair> {
        let mut front = self.front.lock().unwrap_or_else(PoisonError::into_inner);
        front.sequence += 1;
        let sequence = front.sequence;
        let previous = front.frame.replace(EyeFrame {
            textures,
            poses,
            sequence,
        });
        previous.map(|frame| frame.textures)
    }

    fn clear(&self) {
        let mut front = self.front.lock().unwrap_or_else(PoisonError::into_inner);
        front.frame = None;
    }
}

struct PendingEyes {
    fence: GpuFence,
    poses: [EyePose; 2],
}

/// Render-thread side of the exchange: owns the back pair and the fence of
/// the frame rendered into it.
pub struct EyeSwapchain {
    exchange: EyeExchange,
    back: Option<EyePair>,
    spare: Option<EyePair>,
    pending: Option<PendingEyes>,
}

impl EyeSwapchain {
    pub fn new(exchange: EyeExchange) -> Self {
        Self {
            exchange,
            back: None,
            spare: None,
            pending: None,
        }
    }

    pub fn exchange(&self) -> &EyeExchange {
        &self.exchange
    }

    /// Installs freshly created texture pairs, dropping any published frame.
    pub fn install(&mut self, back: EyePair, spare: EyePair) {
        self.exchange.clear();
        self.back = Some(back);
        self.spare = Some(spare);
        self.pending = None;
    }

    /// Takes every texture this swapchain and the exchange know about.
    pub fn take_all(&mut self) -> Vec<TextureHandle> {
        let front = self.exchange.snapshot().map(|f| f.textures);
        self.exchange.clear();
        self.pending = None;
        [self.back.take(), self.spare.take(), front]
            .into_iter()
            .flatten()
            .flatten()
            .collect()
    }

    /// Pair to render into this frame.
    pub fn back(&self) -> Option<EyePair> {
        self.back
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records that the back pair was rendered with `poses`; `fence` signals
    /// when the GPU finishes with it.
    pub fn submit(&mut self, fence: GpuFence, poses: [EyePose; 2]) {
        self.pending = Some(PendingEyes { fence, poses });
    }

    /// Promotes the pending back pair to the front if its fence has
    /// signalled. Never blocks on the GPU. Returns whether a swap happened.
    pub fn poll(&mut self) -> bool {
        let Some(pending) = self.pending.as_ref() else {
            return false;
        };
        if !pending.fence.is_signaled() {
            return false;
        }
        let Some(rendered) = self.back.take() else {
            self.pending = None;
            return false;
        };
        let poses = pending.poses;
        self.pending = None;
        let previous = self.exchange.swap_front(rendered, poses);
        self.back = previous.or_else(|| self.spare.take());
        true
    }
}

/// Callback run on the compositor thread with the current front pair.
pub type CompositorSink = Box<dyn FnMut(&EyeFrame) + Send>;

/// Background thread that periodically composites the front pair.
pub struct CompositorThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CompositorThread {
    pub fn spawn(
        exchange: EyeExchange,
        interval: Duration,
        mut sink: CompositorSink,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("efb-compositor".into())
            .spawn(move || {
                tracing::debug!("Compositor thread started");
                while !thread_stop.load(Ordering::Acquire) {
                    if let Some(frame) = exchange.snapshot() {
                        sink(&frame);
                    }
                    thread::sleep(interval);
                }
                tracing::debug!("Compositor thread stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the thread and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compositor thread panicked");
            }
        }
    }
}

impl Drop for CompositorThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const PAIR_A: EyePair = [TextureHandle(1), TextureHandle(2)];
    const PAIR_B: EyePair = [TextureHandle(3), TextureHandle(4)];

    fn pose(x: f32) -> [EyePose; 2] {
        let p = EyePose {
            orientation: Quat::IDENTITY,
            position: Vec3::new(x, 0.0, 0.0),
        };
        [p, p]
    }

    #[test]
    fn test_unsignaled_fence_is_not_promoted() {
        let mut chain = EyeSwapchain::new(EyeExchange::new());
        chain.install(PAIR_A, PAIR_B);
        chain.submit(GpuFence::new(), pose(1.0));

        assert!(!chain.poll());
        assert!(chain.exchange().snapshot().is_none());
        assert_eq!(chain.back(), Some(PAIR_A));
    }

    #[test]
    fn test_signaled_fence_swaps_pairs() {
        let mut chain = EyeSwapchain::new(EyeExchange::new());
        chain.install(PAIR_A, PAIR_B);

        chain.submit(GpuFence::signaled(), pose(1.0));
        assert!(chain.poll());
        let front = chain.exchange().snapshot().unwrap();
        assert_eq!(front.textures, PAIR_A);
        assert_eq!(front.poses, pose(1.0));
        assert_eq!(chain.back(), Some(PAIR_B));

        chain.submit(GpuFence::signaled(), pose(2.0));
        assert!(chain.poll());
        let front = chain.exchange().snapshot().unwrap();
        assert_eq!(front.textures, PAIR_B);
        assert_eq!(front.sequence, 2);
        assert_eq!(chain.back(), Some(PAIR_A));
    }

    #[test]
    fn test_front_never_equals_back() {
        let mut chain = EyeSwapchain::new(EyeExchange::new());
        chain.install(PAIR_A, PAIR_B);
        for i in 0..10 {
            chain.submit(GpuFence::signaled(), pose(i as f32));
            chain.poll();
            let front = chain.exchange().snapshot().unwrap();
            assert_ne!(Some(front.textures), chain.back());
        }
    }

    #[test]
    fn test_take_all_returns_every_texture() {
        let mut chain = EyeSwapchain::new(EyeExchange::new());
        chain.install(PAIR_A, PAIR_B);
        chain.submit(GpuFence::signaled(), pose(0.0));
        chain.poll();

        let mut textures = chain.take_all();
        textures.sort_by_key(|t| t.0);
        assert_eq!(textures.len(), 4);
        assert!(chain.exchange().snapshot().is_none());
    }

    #[test]
    fn test_compositor_thread_sees_front_pair() {
        let exchange = EyeExchange::new();
        let mut chain = EyeSwapchain::new(exchange.clone());
        chain.install(PAIR_A, PAIR_B);
        chain.submit(GpuFence::signaled(), pose(3.0));
        chain.poll();

        let (tx, rx) = mpsc::channel();
        let mut thread = CompositorThread::spawn(
            exchange,
            Duration::from_millis(1),
            Box::new(move |frame: &EyeFrame| {
                let _ = tx.send(*frame);
            }),
        )
        .unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.textures, PAIR_A);
        assert!(thread.is_running());
        thread.stop();
        assert!(!thread.is_running());
    }
}
