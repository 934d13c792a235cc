//! File system monitoring via inotify
//!
//! A dedicated notification task reads inotify events and feeds the
//! event ledger. Watches cover the configured root recursively and are
//! extended when new subdirectories appear. Directory-only events are
//! never recorded.

use crate::ledger::{EventKind, EventLedger};
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long stop() waits for the notification task to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Directories never worth watching
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".cache", "target"];

fn event_mask() -> WatchMask {
    WatchMask::MODIFY
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

/// Recursive inotify event stream
struct InotifyStream {
    inotify: Inotify,
    async_fd: AsyncFd<std::os::unix::io::RawFd>,
    watches: HashMap<WatchDescriptor, PathBuf>,
    pending: VecDeque<(EventKind, PathBuf)>,
    buffer: [u8; 4096],
}

impl InotifyStream {
    fn new() -> anyhow::Result<Self> {
        let inotify = Inotify::init()?;

        use std::os::unix::io::AsRawFd;
        let fd = inotify.as_raw_fd();

        // inotify reads must not block the notification task
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let async_fd = AsyncFd::new(fd)?;

        Ok(Self {
            inotify,
            async_fd,
            watches: HashMap::new(),
            pending: VecDeque::new(),
            buffer: [0u8; 4096],
        })
    }

    /// Watch a directory and all its subdirectories
    fn watch_dir(&mut self, dir: &Path) -> anyhow::Result<()> {
        let wd = self
            .inotify
            .watches()
            .add(dir, event_mask())
            .with_context(|| format!("watching {}", dir.display()))?;
        self.watches.insert(wd, dir.to_path_buf());

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if SKIP_DIRS.contains(&name) {
                    continue;
                }
                if let Err(e) = self.watch_dir(&path) {
                    debug!("skipping {}: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }

    /// Next file event, waiting until one arrives
    async fn next(&mut self) -> anyhow::Result<(EventKind, PathBuf)> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let new_dirs = {
                let mut guard = self.async_fd.readable().await?;
                let mut new_dirs = Vec::new();

                match self.inotify.read_events(&mut self.buffer) {
                    Ok(events) => {
                        for event in events {
                            let Some(dir) = self.watches.get(&event.wd) else {
                                continue;
                            };
                            let path = match event.name {
                                Some(name) => dir.join(name),
                                // Event on the watched directory itself
                                None => continue,
                            };

                            if event.mask.contains(EventMask::ISDIR) {
                                // Track directories that appear under the root,
                                // but never record directory events
                                if event.mask.contains(EventMask::CREATE)
                                    || event.mask.contains(EventMask::MOVED_TO)
                                {
                                    new_dirs.push(path);
                                }
                                continue;
                            }

                            let kind = if event.mask.contains(EventMask::CREATE) {
                                EventKind::Created
                            } else if event.mask.contains(EventMask::MODIFY) {
                                EventKind::Modified
                            } else if event.mask.contains(EventMask::DELETE) {
                                EventKind::Deleted
                            } else if event.mask.contains(EventMask::MOVED_TO) {
                                EventKind::Moved
                            } else {
                                continue;
                            };

                            self.pending.push_back((kind, path));
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        guard.clear_ready();
                    }
                    Err(e) => return Err(e.into()),
                }

                new_dirs
            };

            for dir in new_dirs {
                if let Err(e) = self.watch_dir(&dir) {
                    warn!("failed to watch new directory {}: {}", dir.display(), e);
                }
            }
        }
    }
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Watches one directory tree and appends changes to the event ledger
pub struct FileMonitor {
    root: PathBuf,
    ledger: Arc<EventLedger>,
    exclude: GlobSet,
    active: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl FileMonitor {
    pub fn new(
        root: impl Into<PathBuf>,
        ledger: Arc<EventLedger>,
        exclude_patterns: &[String],
    ) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            let glob =
                Glob::new(pattern).with_context(|| format!("invalid exclude pattern {:?}", pattern))?;
            builder.add(glob);
        }

        Ok(Self {
            root: root.into(),
            ledger,
            exclude: builder.build()?,
            active: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Begin monitoring. A second start while active is a no-op success.
    pub fn start(&self) -> anyhow::Result<()> {
        if self.active.load(Ordering::SeqCst) {
            warn!("file monitoring is already active");
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating watch root {}", self.root.display()))?;

        let mut stream = InotifyStream::new()?;
        stream.watch_dir(&self.root)?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ledger = Arc::clone(&self.ledger);
        let exclude = self.exclude.clone();

        let handle = tokio::spawn(async move {
            info!("file monitor loop started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,

                    event = stream.next() => match event {
                        Ok((kind, path)) => {
                            if exclude.is_match(&path) {
                                debug!("excluded: {}", path.display());
                                continue;
                            }
                            debug!("file event: {:?} {}", kind, path.display());
                            ledger.record(kind, &path);
                        }
                        Err(e) => {
                            warn!("file monitor read failed: {:#}", e);
                            break;
                        }
                    }
                }
            }

            info!("file monitor loop stopped");
        });

        *self.worker.lock() = Some(Worker {
            stop: stop_tx,
            handle,
        });
        self.active.store(true, Ordering::SeqCst);
        info!("monitoring {}", self.root.display());

        Ok(())
    }

    /// Stop monitoring. A second stop while idle is a no-op success.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            warn!("file monitoring is not active");
            return Ok(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            if tokio::time::timeout(STOP_TIMEOUT, worker.handle).await.is_err() {
                warn!("file monitor did not stop within {:?}", STOP_TIMEOUT);
            }
        }

        self.active.store(false, Ordering::SeqCst);
        info!("stopped monitoring {}", self.root.display());

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EventKind;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_monitor_records_file_events() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(EventLedger::new());
        let monitor =
            FileMonitor::new(dir.path(), Arc::clone(&ledger), &["*.log".to_string()]).unwrap();

        monitor.start().unwrap();
        assert!(monitor.is_active());

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("victim.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("noise.log"), b"ignored").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = ledger.recent_events(10);
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::Created && e.path.ends_with("victim.txt")));
        assert!(!events.iter().any(|e| e.path.ends_with("noise.log")));

        monitor.stop().await.unwrap();
        assert!(!monitor.is_active());
    }

    #[tokio::test]
    async fn test_double_start_and_stop_are_noops() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(EventLedger::new());
        let monitor = FileMonitor::new(dir.path(), ledger, &[]).unwrap();

        monitor.start().unwrap();
        monitor.start().unwrap();
        monitor.stop().await.unwrap();
        monitor.stop().await.unwrap();
    }
}
