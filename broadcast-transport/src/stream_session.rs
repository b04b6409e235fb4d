//! Duplex byte-stream session over TCP
//!
//! A session owns one network thread per connection. That thread runs a
//! current-thread tokio runtime that connects the socket, waits for
//! readiness and turns it into [`StreamStatus`] changes delivered to the
//! session callback, in order, on the network thread.
//!
//! Reads and writes are non-blocking and may be issued from any thread. Every
//! read clears the bytes bit and a short write clears the space bit; the
//! network thread then checks the socket again and sets them back. Readable
//! readiness is watched whenever no unread bytes are signalled, so an idle
//! connection still reports end of stream and errors. End of stream is
//! reported once pending bytes have been read.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::atomic_cell::AtomicCell;
use bitflags::bitflags;
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

bitflags! {
    /// Session status bits; several can be set at once
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamStatus: u32 {
        const CONNECTED = 1;
        const WRITE_BUFFER_HAS_SPACE = 1 << 1;
        const READ_BUFFER_HAS_BYTES = 1 << 2;
        const ERROR_ENCOUNTERED = 1 << 3;
        const END_STREAM = 1 << 4;
    }
}

bitflags! {
    /// Low-level readiness notifications for one direction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamEvent: u32 {
        const OPEN_COMPLETED = 1;
        const HAS_BYTES_AVAILABLE = 1 << 1;
        const HAS_SPACE_AVAILABLE = 1 << 2;
        const ERROR_OCCURRED = 1 << 3;
        const END_ENCOUNTERED = 1 << 4;
    }
}

/// One half of the duplex connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Lifecycle of one direction, in progression order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ChannelState {
    #[default]
    NotOpen,
    Opening,
    Open,
    AtEnd,
    Closed,
    Error,
}

#[derive(Debug, Clone, Default)]
struct Channel {
    state: ChannelState,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ChannelPair {
    input: Channel,
    output: Channel,
}

impl ChannelPair {
    fn get_mut(&mut self, direction: Direction) -> &mut Channel {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    fn get(&self, direction: Direction) -> &Channel {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn set_both(&mut self, state: ChannelState) {
        self.input.state = state;
        self.output.state = state;
    }

    /// Both directions open and neither finished
    fn is_open(&self) -> bool {
        [self.input.state, self.output.state]
            .iter()
            .all(|&s| s >= ChannelState::Open && s < ChannelState::AtEnd)
    }
}

/// Invoked on the network thread with the bits of the triggering event;
/// read [`ByteStreamSession::status`] for the full mask
pub type StreamSessionCallback = Arc<dyn Fn(&dyn ByteStreamSession, StreamStatus) + Send + Sync>;

/// Control surface of a duplex byte-stream session
pub trait ByteStreamSession: Send + Sync {
    fn status(&self) -> StreamStatus;
    /// Connect to `host:port`, disconnecting first if needed
    fn connect(&self, host: &str, port: u16, callback: StreamSessionCallback);
    /// Close both directions and stop the network thread; idempotent
    fn disconnect(&self);
    /// Write without blocking; returns the bytes accepted
    fn write(&self, buf: &[u8]) -> usize;
    /// Read without blocking; returns the bytes copied into `buf`
    fn read(&self, buf: &mut [u8]) -> usize;
}

struct RunLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionShared {
    status: AtomicCell<StreamStatus>,
    callback: AtomicCell<Option<StreamSessionCallback>>,
    channels: AtomicCell<ChannelPair>,
    socket: AtomicCell<Option<Arc<TcpStream>>>,
    rearm: Arc<Notify>,
    run_loop: AtomicCell<Option<RunLoop>>,
    generation: AtomicCell<u64>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        // May run on the network thread itself, so no join here
        if let Some(run_loop) = self.run_loop.swap(None) {
            run_loop.cancel.cancel();
        }
    }
}

/// TCP stream session
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct StreamSession {
    shared: Arc<SessionShared>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        StreamSession {
            shared: Arc::new(SessionShared {
                status: AtomicCell::default(),
                callback: AtomicCell::new(None),
                channels: AtomicCell::default(),
                socket: AtomicCell::new(None),
                rearm: Arc::new(Notify::new()),
                run_loop: AtomicCell::new(None),
                generation: AtomicCell::new(0),
            }),
        }
    }

    pub fn channel_state(&self, direction: Direction) -> ChannelState {
        self.shared.channels.with_value(|c| c.get(direction).state)
    }

    /// Last error reported by `direction`, if any
    pub fn last_error(&self, direction: Direction) -> Option<String> {
        self.shared.channels.with_value(|c| c.get(direction).last_error.clone())
    }

    /// Translate a readiness notification into status changes.
    ///
    /// Open completion only counts once both directions are open and neither
    /// has finished; it then replaces the status with `CONNECTED`. End and
    /// error replace the status, space and bytes are additive.
    pub fn handle_event(&self, direction: Direction, event: StreamEvent) {
        if event.contains(StreamEvent::OPEN_COMPLETED) {
            if self.shared.channels.with_value(ChannelPair::is_open) {
                info!("Stream session connected");
                self.set_status(StreamStatus::CONNECTED, true);
            } else {
                debug!(?direction, "Open completed, waiting for the other direction");
                return;
            }
        }
        if event.contains(StreamEvent::HAS_BYTES_AVAILABLE) {
            self.set_status(StreamStatus::READ_BUFFER_HAS_BYTES, false);
        }
        if event.contains(StreamEvent::HAS_SPACE_AVAILABLE) {
            self.set_status(StreamStatus::WRITE_BUFFER_HAS_SPACE, false);
        }
        if event.contains(StreamEvent::END_ENCOUNTERED) {
            info!(?direction, "Stream session reached end of stream");
            self.set_status(StreamStatus::END_STREAM, true);
        }
        if event.contains(StreamEvent::ERROR_OCCURRED) {
            self.set_status(StreamStatus::ERROR_ENCOUNTERED, true);
            let channels = self.shared.channels.get();
            if let Some(e) = &channels.input.last_error {
                error!(error = %e, "Input stream error");
            }
            if let Some(e) = &channels.output.last_error {
                error!(error = %e, "Output stream error");
            }
        }
    }

    fn set_status(&self, bits: StreamStatus, clear: bool) {
        self.shared.status.modify(|status| {
            if clear {
                *status = bits;
            } else {
                status.insert(bits);
            }
        });
        if let Some(callback) = self.shared.callback.get() {
            callback(self as &dyn ByteStreamSession, bits);
        }
    }

    fn clear_status(&self, bits: StreamStatus) {
        let changed = self.shared.status.modify(|status| {
            let had = status.intersects(bits);
            status.remove(bits);
            had
        });
        if changed {
            self.shared.rearm.notify_one();
        }
    }

    fn set_channel_state(&self, direction: Direction, state: ChannelState) {
        self.shared.channels.modify(|c| c.get_mut(direction).state = state);
    }

    fn record_error(&self, direction: Direction, e: &dyn std::fmt::Display) {
        self.shared.channels.modify(|c| {
            let channel = c.get_mut(direction);
            channel.state = ChannelState::Error;
            channel.last_error = Some(e.to_string());
        });
    }

    fn fail(&self, direction: Direction, e: &dyn std::fmt::Display) {
        self.record_error(direction, e);
        self.handle_event(direction, StreamEvent::ERROR_OCCURRED);
    }

    fn spawn_network(&self, host: String, port: u16, generation: u64) -> io::Result<RunLoop> {
        let cancel = CancellationToken::new();
        let task = NetworkTask {
            session: Arc::downgrade(&self.shared),
            generation,
            cancel: cancel.clone(),
            rearm: self.shared.rearm.clone(),
        };

        let handle = thread::Builder::new()
            .name("broadcast.stream.network".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        task.with_session(|session| session.fail(Direction::Output, &e));
                        return;
                    }
                };
                runtime.block_on(task.run(host, port));
            })?;

        Ok(RunLoop { cancel, handle })
    }
}

impl ByteStreamSession for StreamSession {
    fn status(&self) -> StreamStatus {
        self.shared.status.get()
    }

    fn connect(&self, host: &str, port: u16, callback: StreamSessionCallback) {
        self.shared.callback.set(Some(callback));
        let busy = !self.status().is_empty() || self.shared.run_loop.with_value(Option::is_some);
        if busy {
            self.disconnect();
        }

        self.shared.channels.modify(|c| {
            *c = ChannelPair::default();
            c.set_both(ChannelState::Opening);
        });
        let generation = self.shared.generation.modify(|g| {
            *g += 1;
            *g
        });

        info!(host, port, "Stream session connecting");
        match self.spawn_network(host.to_string(), port, generation) {
            Ok(run_loop) => self.shared.run_loop.set(Some(run_loop)),
            Err(e) => {
                self.shared.channels.modify(|c| c.set_both(ChannelState::Error));
                self.fail(Direction::Output, &e);
            }
        }
    }

    fn disconnect(&self) {
        let run_loop = self.shared.run_loop.swap(None);
        let had_socket = self.shared.socket.swap(None).is_some();

        if let Some(run_loop) = run_loop {
            run_loop.cancel.cancel();
            if run_loop.handle.thread().id() != thread::current().id() && run_loop.handle.join().is_err() {
                error!("Stream network thread panicked");
            }
        }

        self.shared.channels.modify(|c| c.set_both(ChannelState::Closed));
        self.shared.status.set(StreamStatus::empty());
        if had_socket {
            info!("Stream session disconnected");
        }
    }

    fn write(&self, buf: &[u8]) -> usize {
        let Some(socket) = self.shared.socket.get() else {
            debug!(size = buf.len(), "Write without an open connection");
            return 0;
        };

        let written = match socket.try_write(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                error!(
                    error = %e,
                    size = buf.len(),
                    first_byte = buf.first().copied().unwrap_or_default(),
                    "Stream write failed"
                );
                self.record_error(Direction::Output, &e);
                // The network thread reports the failure
                self.shared.rearm.notify_one();
                0
            }
        };

        if written < buf.len() {
            self.clear_status(StreamStatus::WRITE_BUFFER_HAS_SPACE);
        }
        written
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let Some(socket) = self.shared.socket.get() else {
            debug!("Read without an open connection");
            return 0;
        };

        let read = match socket.try_read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                error!(error = %e, "Stream read failed");
                self.record_error(Direction::Input, &e);
                self.shared.rearm.notify_one();
                0
            }
        };

        // The network thread raises the bit again if bytes remain
        self.clear_status(StreamStatus::READ_BUFFER_HAS_BYTES);
        read
    }
}

/// State moved onto the network thread
///
/// Holds the session weakly so that dropping every handle stops the thread.
struct NetworkTask {
    session: Weak<SessionShared>,
    generation: u64,
    cancel: CancellationToken,
    rearm: Arc<Notify>,
}

impl NetworkTask {
    /// Run `f` against the session unless it is gone or has reconnected
    fn with_session<R>(&self, f: impl FnOnce(&StreamSession) -> R) -> Option<R> {
        let shared = self.session.upgrade()?;
        if shared.generation.get() != self.generation {
            return None;
        }
        Some(f(&StreamSession { shared }))
    }

    async fn run(self, host: String, port: u16) {
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = TcpStream::connect((host.as_str(), port)) => result,
        };

        let socket = match connected {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(host = %host, port, error = %e, "Stream session connect failed");
                self.with_session(|session| {
                    session.record_error(Direction::Input, &e);
                    session.fail(Direction::Output, &e);
                });
                return;
            }
        };
        if let Err(e) = socket.set_nodelay(true) {
            warn!(error = %e, "Failed to disable Nagle");
        }

        let installed = self.with_session(|session| {
            session.shared.socket.set(Some(socket.clone()));
            session.set_channel_state(Direction::Output, ChannelState::Open);
            session.handle_event(Direction::Output, StreamEvent::OPEN_COMPLETED);
            session.set_channel_state(Direction::Input, ChannelState::Open);
            session.handle_event(Direction::Input, StreamEvent::OPEN_COMPLETED);
        });
        if installed.is_some() {
            self.poll_socket(&socket).await;
        }

        self.with_session(|session| {
            session.shared.socket.set(None);
            session.shared.channels.modify(|c| {
                for direction in [Direction::Input, Direction::Output] {
                    let channel = c.get_mut(direction);
                    if channel.state < ChannelState::AtEnd {
                        channel.state = ChannelState::Closed;
                    }
                }
            });
        });
        debug!("Stream network loop finished");
    }

    async fn poll_socket(&self, socket: &TcpStream) {
        loop {
            let Some(status) = self.session.upgrade().map(|s| s.status.get()) else {
                break;
            };

            // A failed read or write on a caller thread ends the loop here
            let failed = self.with_session(|session| {
                let failed = session.shared.channels.with_value(|c| {
                    [Direction::Output, Direction::Input]
                        .into_iter()
                        .find(|&d| c.get(d).state == ChannelState::Error)
                });
                if let Some(direction) = failed {
                    session.handle_event(direction, StreamEvent::ERROR_OCCURRED);
                }
                failed.is_some()
            });
            if failed != Some(false) {
                break;
            }

            // Readable readiness stays set while bytes are unread, so only
            // errors are watched until a read clears the bit
            let bytes_pending = status.contains(StreamStatus::READ_BUFFER_HAS_BYTES);
            let mut interest = Interest::ERROR;
            if !bytes_pending {
                interest = interest.add(Interest::READABLE);
            }
            if !status.contains(StreamStatus::WRITE_BUFFER_HAS_SPACE) {
                interest = interest.add(Interest::WRITABLE);
            }

            let ready = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.rearm.notified() => continue,
                ready = socket.ready(interest) => ready,
            };

            let ready = match ready {
                Ok(ready) => ready,
                Err(e) => {
                    self.with_session(|session| session.fail(Direction::Input, &e));
                    break;
                }
            };

            if ready.is_error() {
                let e = match socket.take_error() {
                    Ok(Some(e)) | Err(e) => e,
                    Ok(None) => io::Error::new(io::ErrorKind::ConnectionReset, "socket error"),
                };
                self.with_session(|session| session.fail(Direction::Input, &e));
                break;
            }

            if !bytes_pending && (ready.is_readable() || ready.is_read_closed()) {
                let mut peeked = [0u8; 1];
                // Zero timeout: only take the peek if it completes right away
                match tokio::time::timeout(Duration::ZERO, socket.peek(&mut peeked)).await {
                    Ok(Ok(0)) => {
                        self.with_session(|session| {
                            session.shared.channels.modify(|c| c.set_both(ChannelState::AtEnd));
                            session.handle_event(Direction::Input, StreamEvent::END_ENCOUNTERED);
                        });
                        break;
                    }
                    Ok(Ok(_)) => {
                        self.with_session(|session| {
                            session.handle_event(Direction::Input, StreamEvent::HAS_BYTES_AVAILABLE)
                        });
                    }
                    Ok(Err(e)) => {
                        self.with_session(|session| session.fail(Direction::Input, &e));
                        break;
                    }
                    // Stale readiness, cleared by the peek
                    Err(_) => {}
                }
            }

            if ready.is_writable() {
                self.with_session(|session| {
                    session.handle_event(Direction::Output, StreamEvent::HAS_SPACE_AVAILABLE)
                });
            }
        }
    }
}
