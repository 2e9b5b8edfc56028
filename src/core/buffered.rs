//! Duplex buffered channel with one pump thread per direction.
//!
//! ```text
//! transport --reader pump--> inbound ring  --read()-->  consumer
//! transport <--writer pump-- outbound ring <--write()-- producer
//! ```
//!
//! Both rings sit behind their own mutex. The transport is shared with the
//! pumps through `Arc<Mutex<T>>`; the reader pump only reads from it and the
//! writer pump only writes. Neither pump blocks: a transport returning
//! `WouldBlock` makes the pump idle (yield or short sleep) and re-check the
//! stop flag. Blocking reads on the consumer side are spin-polls over the
//! inbound ring, there is no wake-up signal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::Config;
use crate::core::ring_buffer::{Mode, RingByteBuffer};
use crate::core::source::ByteSource;
use crate::error::{Error, Result};
use crate::net::transport::Transport;

/// What a polling loop does between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    Yield,
    Sleep(Duration),
}

impl Idle {
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            Some(d) if !d.is_zero() => Idle::Sleep(d),
            _ => Idle::Yield,
        }
    }

    #[inline]
    pub fn wait(self) {
        match self {
            Idle::Yield => thread::yield_now(),
            Idle::Sleep(d) => thread::sleep(d),
        }
    }
}

struct Shared {
    running: AtomicBool,
    reader_alive: AtomicBool,
    writer_alive: AtomicBool,
    /// Bytes the writer pump has drained but not yet handed to the transport.
    in_flight: AtomicUsize,
    inbound: Mutex<RingByteBuffer>,
    outbound: Mutex<RingByteBuffer>,
}

pub struct BufferedChannel<T: Transport> {
    blocking: bool,
    idle: Idle,
    linger: Duration,
    shared: Arc<Shared>,
    transport: Arc<Mutex<T>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

fn new_ring(config: &Config) -> RingByteBuffer {
    match config.buffer_capacity {
        Some(capacity) => RingByteBuffer::fixed(capacity),
        None => RingByteBuffer::growable(config.initial_capacity),
    }
}

fn pin_current(core: Option<usize>) {
    let Some(index) = core else { return };
    let target = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == index));
    match target {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!("{:?} pinned to core {}", thread::current().name(), index);
        }
        _ => warn!("could not pin {:?} to core {}", thread::current().name(), index),
    }
}

impl<T: Transport> BufferedChannel<T> {
    /// Takes ownership of `transport` and starts both pumps.
    pub fn new(transport: T, config: &Config) -> Result<Self> {
        Self::with_prefill(transport, &[], config)
    }

    /// Like [`new`](Self::new), with `prefill` already queued as inbound data.
    ///
    /// Used for bytes that arrived together with the handshake response.
    pub fn with_prefill(transport: T, prefill: &[u8], config: &Config) -> Result<Self> {
        let mut inbound = new_ring(config);
        inbound.write(prefill)?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            reader_alive: AtomicBool::new(true),
            writer_alive: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            inbound: Mutex::new(inbound),
            outbound: Mutex::new(new_ring(config)),
        });
        let transport = Arc::new(Mutex::new(transport));
        let idle = Idle::from_interval(config.poll_interval);

        let mut channel = Self {
            blocking: config.blocking,
            idle,
            linger: config.linger,
            shared,
            transport,
            reader: None,
            writer: None,
        };

        let (shared, transport) = (channel.shared.clone(), channel.transport.clone());
        let (read_chunk, pin) = (config.read_chunk, config.pin_core);
        channel.reader = Some(
            thread::Builder::new()
                .name("ws-reader".into())
                .spawn(move || {
                    pin_current(pin);
                    reader_pump(&shared, &transport, read_chunk, idle);
                })?,
        );

        let (shared, transport) = (channel.shared.clone(), channel.transport.clone());
        let spawned = thread::Builder::new()
            .name("ws-writer".into())
            .spawn(move || {
                pin_current(pin);
                writer_pump(&shared, &transport, idle);
            });
        // On failure `channel` drops here and joins the reader.
        channel.writer = Some(spawned?);

        debug!("buffered channel started (blocking: {})", channel.blocking);
        Ok(channel)
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// False once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_reader_alive(&self) -> bool {
        self.shared.reader_alive.load(Ordering::Acquire)
    }

    pub fn is_writer_alive(&self) -> bool {
        self.shared.writer_alive.load(Ordering::Acquire)
    }

    pub fn pending_inbound(&self) -> usize {
        self.shared.inbound.lock().len()
    }

    pub fn pending_outbound(&self) -> usize {
        self.shared.outbound.lock().len() + self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Exactly `len` inbound bytes.
    ///
    /// Non-blocking channels make one attempt and may return `WouldBlock`.
    /// Blocking channels poll until the bytes arrive. Either way `Closed` is
    /// returned once the reader pump has stopped and too few bytes remain.
    /// A fixed ring smaller than `len` can never satisfy the read, which is
    /// `BufferOverflow` up front.
    pub fn read(&self, len: usize) -> Result<Vec<u8>> {
        {
            let inbound = self.shared.inbound.lock();
            if inbound.mode() == Mode::Fixed && len > inbound.capacity() {
                return Err(Error::BufferOverflow);
            }
        }
        loop {
            match self.shared.inbound.lock().read(len) {
                Err(Error::WouldBlock) => {}
                other => return other,
            }

            if !self.is_reader_alive() {
                // The pump may have queued its last bytes just before stopping.
                return match self.shared.inbound.lock().read(len) {
                    Err(Error::WouldBlock) => Err(Error::Closed),
                    other => other,
                };
            }

            if !self.blocking {
                return Err(Error::WouldBlock);
            }
            self.idle.wait();
        }
    }

    /// Drains whatever is buffered right now, possibly nothing.
    pub fn read_available(&self) -> Result<Vec<u8>> {
        let bytes = self.shared.inbound.lock().read_all();
        if !bytes.is_empty() {
            return Ok(bytes);
        }
        if !self.is_reader_alive() {
            let bytes = self.shared.inbound.lock().read_all();
            return if bytes.is_empty() { Err(Error::Closed) } else { Ok(bytes) };
        }
        Ok(bytes)
    }

    /// Queues `bytes` for the writer pump.
    ///
    /// Growable rings always accept. A full fixed ring makes a non-blocking
    /// channel fail with `BufferOverflow`; a blocking one waits for room as
    /// long as `bytes` could ever fit.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.is_writer_alive() {
                return Err(Error::Closed);
            }
            {
                let mut outbound = self.shared.outbound.lock();
                match outbound.write(bytes) {
                    Err(Error::BufferOverflow)
                        if self.blocking && bytes.len() <= outbound.capacity() => {}
                    other => return other,
                }
            }
            self.idle.wait();
        }
    }

    /// Waits until every queued outbound byte has reached the transport.
    ///
    /// Gives up with `WouldBlock` after the configured linger.
    pub fn flush(&self) -> Result<()> {
        let deadline = Instant::now() + self.linger;
        loop {
            {
                let outbound = self.shared.outbound.lock();
                if outbound.is_empty() && self.shared.in_flight.load(Ordering::Acquire) == 0 {
                    return Ok(());
                }
            }
            if !self.is_writer_alive() {
                return Err(Error::Closed);
            }
            if Instant::now() >= deadline {
                return Err(Error::WouldBlock);
            }
            self.idle.wait();
        }
    }

    /// Flushes (bounded by linger), stops both pumps and joins them.
    ///
    /// Idempotent. The transport is released when the channel drops.
    pub fn shutdown(&mut self) {
        if self.reader.is_none() && self.writer.is_none() {
            return;
        }

        if self.is_writer_alive() {
            if let Err(e) = self.flush() {
                debug!("shutdown flush incomplete: {}", e);
            }
        }

        self.shared.running.store(false, Ordering::Release);
        for (name, handle) in [("reader", self.reader.take()), ("writer", self.writer.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("{} pump panicked", name);
                }
            }
        }
        debug!("buffered channel stopped");
    }
}

impl<T: Transport> ByteSource for BufferedChannel<T> {
    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        BufferedChannel::read(self, len)
    }
}

impl<T: Transport> Drop for BufferedChannel<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_pump<T: Transport>(shared: &Shared, transport: &Mutex<T>, read_chunk: usize, idle: Idle) {
    debug!("reader pump started");
    while shared.running.load(Ordering::Acquire) {
        let remaining = shared.inbound.lock().remaining_capacity();
        if remaining == 0 {
            idle.wait();
            continue;
        }

        let result = transport.lock().read(remaining.min(read_chunk));
        match result {
            Ok(bytes) => {
                // Only this thread writes inbound, so the space is still there.
                if let Err(e) = shared.inbound.lock().write(&bytes) {
                    warn!("reader pump dropped {} bytes: {}", bytes.len(), e);
                    break;
                }
            }
            Err(Error::WouldBlock) => idle.wait(),
            Err(Error::Closed) => {
                debug!("reader pump: transport closed");
                break;
            }
            Err(e) => {
                warn!("reader pump stopping: {}", e);
                break;
            }
        }
    }
    shared.reader_alive.store(false, Ordering::Release);
    debug!("reader pump stopped");
}

fn writer_pump<T: Transport>(shared: &Shared, transport: &Mutex<T>, idle: Idle) {
    debug!("writer pump started");
    'pump: while shared.running.load(Ordering::Acquire) {
        let data = {
            let mut outbound = shared.outbound.lock();
            let data = outbound.read_all();
            shared.in_flight.store(data.len(), Ordering::Release);
            data
        };
        if data.is_empty() {
            idle.wait();
            continue;
        }

        let mut written = 0;
        while written < data.len() {
            let result = transport.lock().write(&data[written..]);
            match result {
                Ok(n) => written += n,
                Err(Error::WouldBlock) => {
                    if !shared.running.load(Ordering::Acquire) {
                        warn!("writer pump abandoned {} unsent bytes", data.len() - written);
                        break 'pump;
                    }
                    idle.wait();
                }
                Err(e) => {
                    warn!("writer pump stopping: {}", e);
                    break 'pump;
                }
            }
        }
        shared.in_flight.store(0, Ordering::Release);
    }
    shared.in_flight.store(0, Ordering::Release);
    shared.writer_alive.store(false, Ordering::Release);
    debug!("writer pump stopped");
}
