//! Receive/process/transmit loops around the engine.
//!
//! Single-worker mode runs everything on one thread. With more workers, one
//! receive thread shards frames by flow onto per-worker SPSC rings and each
//! worker processes and retransmits its own frames.

use crate::DaemonError;
use crate::ring::{MAX_FRAME, SpscFrameRing};
use crate::socket::RawSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use swivel_core::Engine;
use swivel_core::wire::peek_four_tuple;

/// Milliseconds a redirect may wait for socket buffer space before it is
/// dropped.
const SEND_WAIT_MS: u32 = 4;

pub const MAX_WORKERS: usize = 32;

/// Frames the runner dropped before or after the engine saw them.
#[derive(Debug, Default)]
pub struct RunnerDrops {
    /// Larger than the receive buffer; the kernel copied only a prefix.
    pub truncated: AtomicU64,
    /// Worker ring was full.
    pub ring_full: AtomicU64,
    /// Redirects the socket would not take.
    pub send_failed: AtomicU64,
}

impl RunnerDrops {
    pub fn log(&self) {
        tracing::info!(
            truncated = self.truncated.load(Ordering::Relaxed),
            ring_full = self.ring_full.load(Ordering::Relaxed),
            send_failed = self.send_failed.load(Ordering::Relaxed),
            "Runner drops"
        );
    }
}

pub struct PacketRunner {
    shutdown: Arc<AtomicBool>,
    drops: Arc<RunnerDrops>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl PacketRunner {
    pub fn start(engine: Arc<Engine>, iface: &str, workers: usize) -> Result<Self, DaemonError> {
        let workers = workers.clamp(1, MAX_WORKERS);
        let socket = Arc::new(RawSocket::bind(iface)?);
        let ifindex = socket.ifindex();
        let shutdown = Arc::new(AtomicBool::new(false));
        let drops = Arc::new(RunnerDrops::default());
        let mut handles = Vec::with_capacity(workers + 1);

        if workers == 1 {
            let shutdown = shutdown.clone();
            let drops = drops.clone();
            handles.push(
                thread::Builder::new()
                    .name("swivel-rx".to_string())
                    .spawn(move || run_single(&socket, &engine, &drops, &shutdown))?,
            );
        } else {
            let rings: Vec<Arc<SpscFrameRing>> = (0..workers)
                .map(|_| Arc::new(SpscFrameRing::new()))
                .collect();

            for (i, ring) in rings.iter().enumerate() {
                let ring = ring.clone();
                let socket = socket.clone();
                let engine = engine.clone();
                let drops = drops.clone();
                let shutdown = shutdown.clone();
                handles.push(
                    thread::Builder::new()
                        .name(format!("swivel-worker-{}", i))
                        .spawn(move || worker_loop(&socket, &engine, &ring, &drops, &shutdown))?,
                );
            }

            let shutdown = shutdown.clone();
            let drops = drops.clone();
            handles.push(
                thread::Builder::new()
                    .name("swivel-rx".to_string())
                    .spawn(move || dispatch_loop(&socket, &rings, &drops, &shutdown))?,
            );
        }

        tracing::info!(iface, ifindex, workers, "Packet runner started");
        Ok(Self {
            shutdown,
            drops,
            handles,
        })
    }

    pub fn drops(&self) -> &RunnerDrops {
        &self.drops
    }
}

impl Drop for PacketRunner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        tracing::debug!("Packet runner stopped");
    }
}

/// Worker count from `SWIVEL_WORKERS`, clamped to 1..=MAX_WORKERS.
pub fn workers_from_env() -> Option<usize> {
    let v = std::env::var("SWIVEL_WORKERS").ok()?;
    let n = v.parse::<usize>().ok()?;
    Some(n.clamp(1, MAX_WORKERS))
}

/// Worker count from the command line, else `SWIVEL_WORKERS`, else 1.
pub fn worker_count(requested: Option<usize>) -> usize {
    requested
        .or_else(workers_from_env)
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

/// The bytes of a frame `len` bytes long received into `buf`, or `None` if
/// it did not fit.
#[inline]
fn received<'a>(buf: &'a mut [u8], len: usize, drops: &RunnerDrops) -> Option<&'a mut [u8]> {
    let frame = buf.get_mut(..len);
    if frame.is_none() {
        drops.truncated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(len, "Dropped oversized frame");
    }
    frame
}

/// Runs the engine over a received frame and returns it if it must be
/// retransmitted. A frame cut short on receive never reaches the engine.
#[inline]
fn redirect_frame<'a>(
    engine: &Engine,
    buf: &'a mut [u8],
    len: usize,
    drops: &RunnerDrops,
) -> Option<&'a mut [u8]> {
    let frame = received(buf, len, drops)?;
    engine.process(frame).is_redirect().then_some(frame)
}

#[inline]
fn handle_frame(socket: &RawSocket, engine: &Engine, buf: &mut [u8], len: usize, drops: &RunnerDrops) {
    if let Some(frame) = redirect_frame(engine, buf, len, drops) {
        if !socket.send(frame, SEND_WAIT_MS) {
            drops.send_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(len = frame.len(), "Dropped redirect");
        }
    }
}

fn run_single(socket: &RawSocket, engine: &Engine, drops: &RunnerDrops, shutdown: &AtomicBool) {
    let mut buf = vec![0u8; MAX_FRAME];
    let mut idle = Idle::default();

    while !shutdown.load(Ordering::Relaxed) {
        let mut did_work = false;
        // Bounded batch so shutdown stays responsive under load.
        for _ in 0..64 {
            match socket.recv(&mut buf) {
                Ok(Some(n)) => {
                    did_work = true;
                    handle_frame(socket, engine, &mut buf, n, drops);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "recv error");
                    return;
                }
            }
        }
        idle.tick(did_work);
    }
}

fn dispatch_loop(
    socket: &RawSocket,
    rings: &[Arc<SpscFrameRing>],
    drops: &RunnerDrops,
    shutdown: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_FRAME];
    let mut idle = Idle::default();

    while !shutdown.load(Ordering::Relaxed) {
        let mut did_work = false;
        for _ in 0..64 {
            match socket.recv(&mut buf) {
                Ok(Some(n)) => {
                    did_work = true;
                    let Some(frame) = received(&mut buf, n, drops) else {
                        continue;
                    };
                    // Never wait on a full ring; drop instead.
                    if !rings[shard_for_frame(frame, rings.len())].push(frame) {
                        drops.ring_full.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "recv error");
                    return;
                }
            }
        }
        idle.tick(did_work);
    }
}

fn worker_loop(
    socket: &RawSocket,
    engine: &Engine,
    ring: &SpscFrameRing,
    drops: &RunnerDrops,
    shutdown: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_FRAME];
    let mut idle = Idle::default();

    while !shutdown.load(Ordering::Relaxed) {
        let mut did_work = false;
        while let Some(n) = ring.pop(&mut buf) {
            did_work = true;
            handle_frame(socket, engine, &mut buf, n, drops);
        }
        idle.tick(did_work);
    }
}

/// Picks a worker for `frame` so that all frames of one flow share a worker.
pub(crate) fn shard_for_frame(frame: &[u8], workers: usize) -> usize {
    if workers <= 1 {
        return 0;
    }
    match peek_four_tuple(frame) {
        // High bits, so worker and backend slot choices stay independent.
        Ok(tuple) => (tuple.hash().rotate_left(16) as usize) % workers,
        Err(_) => 0,
    }
}

/// Spin, then yield, then sleep while there is nothing to do.
#[derive(Default)]
struct Idle {
    count: u32,
}

impl Idle {
    #[inline]
    fn tick(&mut self, did_work: bool) {
        if did_work {
            self.count = 0;
            return;
        }
        self.count = self.count.saturating_add(1);
        if self.count > 10_000 {
            thread::sleep(Duration::from_micros(50));
        } else if self.count > 100 {
            thread::yield_now();
        }
    }
}
