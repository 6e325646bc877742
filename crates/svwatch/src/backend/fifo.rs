//! In-process fifodir listener.
//!
//! Each subscription drops a FIFO named `ftrig1:@…` into the watched
//! fifodir. Supervisors write one byte per transition into every FIFO
//! carrying that prefix. All FIFOs are registered with a single epoll
//! instance whose descriptor is what callers poll.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use regex::bytes::{Regex, RegexBuilder};
use tracing::{debug, trace, warn};

use super::{NotificationBackend, PendingQueue, RepeatPolicy, SubscriptionId};

const BACKEND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::backend");

/// Name prefix supervisors look for when notifying a fifodir.
pub const FIFO_PREFIX: &str = "ftrig1";

/// Mode of listener FIFOs: owner read/write, everyone else write.
pub const FIFO_MODE: u32 = 0o622;

const EVENT_BATCH: usize = 16;
const READ_CHUNK: usize = 256;

/// Most bytes a listener keeps while waiting for its pattern to match.
/// Older bytes are discarded first.
pub const UNMATCHED_LIMIT: usize = 4096;

static FIFO_SERIAL: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Listener {
    id: SubscriptionId,
    fifo: Utf8PathBuf,
    reader: File,
    _writer: File,
    pattern: Regex,
    policy: RepeatPolicy,
    unmatched: Vec<u8>,
    delivered: Vec<u8>,
    active: bool,
}

impl Listener {
    /// Feeds freshly read bytes through the pattern, queueing `id` on every
    /// match. Returns `false` once a one-shot listener has matched.
    fn feed(&mut self, bytes: &[u8], queue: &mut PendingQueue) -> bool {
        for &byte in bytes {
            if !self.active {
                break;
            }
            self.unmatched.push(byte);
            if self.unmatched.len() > UNMATCHED_LIMIT {
                let excess = self.unmatched.len() - UNMATCHED_LIMIT;
                self.unmatched.drain(..excess);
            }
            if self.pattern.is_match(&self.unmatched) {
                self.delivered.append(&mut self.unmatched);
                queue.push(self.id);
                if self.policy == RepeatPolicy::Once {
                    self.active = false;
                }
            }
        }
        self.active
    }
}

/// Native [`NotificationBackend`] built on FIFOs and epoll.
#[derive(Debug)]
pub struct FifoBackend {
    epoll: Epoll,
    listeners: Vec<Listener>,
    queue: PendingQueue,
    ended: bool,
}

impl FifoBackend {
    /// Starts an empty session.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the epoll instance cannot be created.
    pub fn new() -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self {
            epoll,
            listeners: Vec::new(),
            queue: PendingQueue::new(),
            ended: false,
        })
    }

    /// Number of live subscriptions.
    #[must_use]
    pub const fn subscription_count(&self) -> usize {
        self.listeners.len()
    }

    fn next_id(&self) -> io::Result<SubscriptionId> {
        u16::try_from(self.listeners.len() + 1)
            .ok()
            .and_then(SubscriptionId::new)
            .ok_or_else(|| io::Error::other("subscription ids exhausted"))
    }

    fn listener_mut(&mut self, id: SubscriptionId) -> Option<&mut Listener> {
        listener_in(&mut self.listeners, id)
    }

    fn drain_listener(&mut self, id: SubscriptionId) -> io::Result<()> {
        let Some(listener) = listener_in(&mut self.listeners, id) else {
            return Ok(());
        };
        if !listener.active {
            return Ok(());
        }
        let mut chunk = [0_u8; READ_CHUNK];
        let mut still_active = true;
        while still_active {
            let count = match listener.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            };
            let bytes = chunk.get(..count).unwrap_or_default();
            trace!(
                target: BACKEND_TARGET,
                id = id.get(),
                bytes = count,
                "read notification bytes"
            );
            still_active = listener.feed(bytes, &mut self.queue);
        }
        if !still_active {
            self.epoll.delete(&listener.reader)?;
            debug!(
                target: BACKEND_TARGET,
                id = id.get(),
                "one-shot subscription matched; listener detached"
            );
        }
        Ok(())
    }
}

impl NotificationBackend for FifoBackend {
    fn subscribe(
        &mut self,
        path: &Utf8Path,
        pattern: &str,
        policy: RepeatPolicy,
    ) -> io::Result<SubscriptionId> {
        if self.ended {
            return Err(io::Error::other("notification session already ended"));
        }
        let pattern = compile_pattern(pattern)?;
        let id = self.next_id()?;
        let (fifo, reader, writer) = create_listener_fifo(path)?;
        if let Err(error) = self.epoll.add(
            &reader,
            EpollEvent::new(EpollFlags::EPOLLIN, u64::from(id.get())),
        ) {
            remove_fifo(&fifo);
            return Err(error.into());
        }
        debug!(
            target: BACKEND_TARGET,
            id = id.get(),
            fifo = %fifo,
            ?policy,
            "listener fifo registered"
        );
        self.listeners.push(Listener {
            id,
            fifo,
            reader,
            _writer: writer,
            pattern,
            policy,
            unmatched: Vec::new(),
            delivered: Vec::new(),
            active: true,
        });
        Ok(id)
    }

    fn refresh(&mut self) -> io::Result<()> {
        if self.ended {
            return Ok(());
        }
        let mut events = [EpollEvent::empty(); EVENT_BATCH];
        loop {
            let ready = self.epoll.wait(&mut events, EpollTimeout::ZERO)?;
            let ids: Vec<SubscriptionId> = events
                .iter()
                .take(ready)
                .filter_map(|event| u16::try_from(event.data()).ok())
                .filter_map(SubscriptionId::new)
                .collect();
            for id in ids {
                self.drain_listener(id)?;
            }
            if ready < EVENT_BATCH {
                return Ok(());
            }
        }
    }

    fn pending_count(&self) -> usize {
        self.queue.len()
    }

    fn pending_id_at(&self, index: usize) -> Option<SubscriptionId> {
        self.queue.get(index)
    }

    fn acknowledge(&mut self, count: usize) {
        self.queue.acknowledge(count);
    }

    fn decode(&mut self, id: SubscriptionId, out: &mut Vec<u8>) -> usize {
        let Some(listener) = self.listener_mut(id) else {
            return 0;
        };
        let count = listener.delivered.len();
        out.append(&mut listener.delivered);
        count
    }

    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.epoll.0.as_fd()
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        for listener in self.listeners.drain(..) {
            if listener.active
                && let Err(error) = self.epoll.delete(&listener.reader)
            {
                debug!(
                    target: BACKEND_TARGET,
                    id = listener.id.get(),
                    error = %error,
                    "failed to detach listener from epoll"
                );
            }
            remove_fifo(&listener.fifo);
        }
        self.queue.clear();
        debug!(target: BACKEND_TARGET, "notification session ended");
    }
}

impl Drop for FifoBackend {
    fn drop(&mut self) {
        self.end();
    }
}

/// Compiles a byte pattern in which `.` matches any single byte.
fn compile_pattern(pattern: &str) -> io::Result<Regex> {
    RegexBuilder::new(pattern)
        .unicode(false)
        .dot_matches_new_line(true)
        .build()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))
}

fn listener_in(listeners: &mut [Listener], id: SubscriptionId) -> Option<&mut Listener> {
    let index = usize::from(id.get()).checked_sub(1)?;
    listeners
        .get_mut(index)
        .filter(|listener| listener.id == id)
}

/// Creates a listener FIFO under a hidden name, opens both ends, and only
/// then renames it to the name supervisors notify.
fn create_listener_fifo(fifodir: &Utf8Path) -> io::Result<(Utf8PathBuf, File, File)> {
    let name = listener_name();
    let staging = fifodir.join(format!(".{name}"));
    let fifo = fifodir.join(&name);
    mkfifo(staging.as_std_path(), Mode::from_bits_truncate(0o600))?;
    let opened = fs::set_permissions(&staging, Permissions::from_mode(FIFO_MODE))
        .and_then(|()| open_fifo_ends(&staging))
        .and_then(|ends| fs::rename(&staging, &fifo).map(|()| ends));
    match opened {
        Ok((reader, writer)) => Ok((fifo, reader, writer)),
        Err(error) => {
            remove_fifo(&staging);
            Err(error)
        }
    }
}

fn open_fifo_ends(path: &Utf8Path) -> io::Result<(File, File)> {
    let reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)?;
    let writer = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)?;
    Ok((reader, writer))
}

fn listener_name() -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let serial = FIFO_SERIAL.fetch_add(1, Ordering::Relaxed);
    format!(
        "{FIFO_PREFIX}:@{:016x}{:08x}:{}.{serial}",
        stamp.as_secs(),
        stamp.subsec_nanos(),
        process::id()
    )
}

fn remove_fifo(path: &Utf8Path) {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => {
            warn!(
                target: BACKEND_TARGET,
                fifo = %path,
                error = %error,
                "failed to remove listener fifo"
            );
        }
        _ => {}
    }
}
