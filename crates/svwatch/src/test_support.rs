//! Fixtures shared by unit and behavioural tests.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::backend::{
    FIFO_PREFIX, NotificationBackend, PendingQueue, RepeatPolicy, SubscriptionId,
};
use crate::status::{CONTROL_DIR, STATUS_FILE, STATUS_SIZE};

/// Encodes a current-layout status record.
pub fn encode_status(pid: u64, finishing: bool, ready: bool) -> Vec<u8> {
    let mut record = Vec::with_capacity(STATUS_SIZE);
    record.extend_from_slice(&((1_u64 << 62) + 10 + 1_700_000_000).to_be_bytes());
    record.extend_from_slice(&250_u32.to_be_bytes());
    record.extend_from_slice(&((1_u64 << 62) + 10 + 1_700_000_005).to_be_bytes());
    record.extend_from_slice(&0_u32.to_be_bytes());
    record.extend_from_slice(&pid.to_be_bytes());
    record.extend_from_slice(&pid.to_be_bytes());
    record.extend_from_slice(&0_u16.to_be_bytes());
    let mut flags = 0_u8;
    if finishing {
        flags |= 0x02;
    }
    if ready {
        flags |= 0x08;
    }
    record.push(flags);
    record
}

/// Writes a status record into `<service>/supervise/status`.
pub fn write_status(service: &Utf8Path, record: &[u8]) {
    let control = service.join(CONTROL_DIR);
    fs::create_dir_all(&control).expect("create control directory");
    fs::write(control.join(STATUS_FILE), record).expect("write status record");
}

/// Writes `event` into every listener fifo of a fifodir, as a supervisor does.
///
/// Returns the number of fifos notified.
pub fn notify(fifodir: &Utf8Path, event: &[u8]) -> usize {
    let mut notified = 0;
    for entry in fs::read_dir(fifodir).expect("read fifodir") {
        let entry = entry.expect("fifodir entry");
        let name = entry.file_name();
        let is_listener = name.to_string_lossy().starts_with(FIFO_PREFIX)
            && entry.file_type().expect("entry type").is_fifo();
        if !is_listener {
            continue;
        }
        let mut fifo = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(entry.path())
            .expect("open listener fifo");
        fifo.write_all(event).expect("write event");
        notified += 1;
    }
    notified
}

/// Temporary tree of service directories.
pub struct ServiceTree {
    root: TempDir,
}

impl ServiceTree {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("create temp dir"),
        }
    }

    /// Creates (if needed) and returns the directory of `name`.
    pub fn service(&self, name: &str) -> Utf8PathBuf {
        let path = Utf8Path::from_path(self.root.path())
            .expect("temp dir is UTF-8")
            .join(name);
        fs::create_dir_all(&path).expect("create service dir");
        path
    }

    /// Returns a path under the tree that was never created.
    pub fn missing(&self, name: &str) -> Utf8PathBuf {
        Utf8Path::from_path(self.root.path())
            .expect("temp dir is UTF-8")
            .join(name)
    }
}

/// In-memory [`NotificationBackend`] replaying scripted notifications.
///
/// Each call to `refresh` pops one batch of `(id, payload)` pairs: the ids
/// are queued and every payload is handed out by one later `decode` of that
/// id, in order.
#[derive(Debug)]
pub struct ScriptedBackend {
    subscriptions: Vec<(Utf8PathBuf, String, RepeatPolicy)>,
    fail_subscribe_at: Option<usize>,
    fail_refresh: bool,
    batches: VecDeque<Vec<(u16, Vec<u8>)>>,
    payloads: HashMap<SubscriptionId, VecDeque<Vec<u8>>>,
    queue: PendingQueue,
    ended: Rc<Cell<usize>>,
    descriptor: File,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            fail_subscribe_at: None,
            fail_refresh: false,
            batches: VecDeque::new(),
            payloads: HashMap::new(),
            queue: PendingQueue::new(),
            ended: Rc::new(Cell::new(0)),
            descriptor: tempfile::tempfile().expect("create descriptor"),
        }
    }

    /// Makes the subscription at zero-based position `index` fail.
    pub fn failing_subscribe_at(mut self, index: usize) -> Self {
        self.fail_subscribe_at = Some(index);
        self
    }

    /// Makes every refresh fail after replaying its batch.
    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    /// Appends a batch delivered by a later refresh.
    pub fn with_batch(mut self, batch: &[(u16, &[u8])]) -> Self {
        self.batches.push_back(
            batch
                .iter()
                .map(|(raw, payload)| (*raw, payload.to_vec()))
                .collect(),
        );
        self
    }

    pub fn subscriptions(&self) -> &[(Utf8PathBuf, String, RepeatPolicy)] {
        &self.subscriptions
    }

    /// Counter of `end` calls that stays readable after the backend moves.
    pub fn end_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.ended)
    }
}

impl NotificationBackend for ScriptedBackend {
    fn subscribe(
        &mut self,
        path: &Utf8Path,
        pattern: &str,
        policy: RepeatPolicy,
    ) -> io::Result<SubscriptionId> {
        if self.fail_subscribe_at == Some(self.subscriptions.len()) {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        self.subscriptions
            .push((path.to_path_buf(), pattern.to_owned(), policy));
        let raw = u16::try_from(self.subscriptions.len()).expect("small id");
        Ok(SubscriptionId::new(raw).expect("non-zero id"))
    }

    fn refresh(&mut self) -> io::Result<()> {
        if let Some(batch) = self.batches.pop_front() {
            for (raw, payload) in batch {
                let id = SubscriptionId::new(raw).expect("non-zero id");
                self.queue.push(id);
                self.payloads.entry(id).or_default().push_back(payload);
            }
        }
        if self.fail_refresh {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
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
        let Some(mut payload) = self.payloads.get_mut(&id).and_then(VecDeque::pop_front) else {
            return 0;
        };
        let count = payload.len();
        out.append(&mut payload);
        count
    }

    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.descriptor.as_fd()
    }

    fn end(&mut self) {
        self.ended.set(self.ended.get() + 1);
        self.queue.clear();
    }
}
