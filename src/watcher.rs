use crate::errors::ScanError;
use crossbeam_channel::{unbounded, Sender};
use log::{debug, error, warn};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

enum WatcherMsg {
    Fs(Result<notify::Event, notify::Error>),
    Shutdown,
}

/// One live filesystem watch over a set of paths. Events are delivered to the
/// callback on a dedicated listener thread; the callback must hand off long
/// work rather than block it.
///
/// The listener thread first lists the existing contents of the watched
/// paths and records them as already-known, then flips the ready flag and
/// starts draining events. The initial burst therefore never reaches the
/// callback: a create event for a known path is reported as a modification,
/// and only genuinely new paths report as created.
pub struct PathWatcher {
    /// Kept alive for the duration of the watch; dropping it releases the OS
    /// handles.
    _watcher: RecommendedWatcher,
    sender: Sender<WatcherMsg>,
    handle: Option<JoinHandle<()>>,
    ready: Arc<AtomicBool>,
}

impl PathWatcher {
    pub fn spawn<F>(paths: &[PathBuf], callback: F) -> Result<PathWatcher, ScanError>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        if paths.is_empty() {
            return Err(ScanError::EmptyWatchSet);
        }

        let (tx, rx) = unbounded();
        let fs_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = fs_tx.send(WatcherMsg::Fs(res));
            },
            Config::default(),
        )?;

        for path in paths {
            if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                warn!("Could not watch {}: {}", path.display(), e);
            }
        }

        let ready = Arc::new(AtomicBool::new(false));
        let thread_ready = Arc::clone(&ready);
        let thread_paths: Vec<PathBuf> = paths.to_vec();
        let handle = std::thread::spawn(move || {
            // Events fired while listing queue up in the channel and are
            // matched against the known set afterwards, so a file that
            // appears during the listing reports as modified, not created.
            let mut known = HashSet::new();
            for path in &thread_paths {
                list_existing(path, &mut known);
            }
            thread_ready.store(true, Ordering::Release);
            debug!("watch listener ready with {} known entries", known.len());

            for msg in rx {
                match msg {
                    WatcherMsg::Shutdown => break,
                    WatcherMsg::Fs(Err(e)) => error!("File watcher error: {}", e),
                    WatcherMsg::Fs(Ok(event)) => {
                        let kind = match event.kind {
                            EventKind::Create(_) => WatchEventKind::Created,
                            EventKind::Modify(_) => WatchEventKind::Modified,
                            EventKind::Remove(_) => WatchEventKind::Removed,
                            _ => continue,
                        };
                        for path in event.paths {
                            if is_dotfile(&path) {
                                continue;
                            }
                            let kind = match kind {
                                WatchEventKind::Created if known.contains(&path) => {
                                    WatchEventKind::Modified
                                }
                                WatchEventKind::Created => {
                                    known.insert(path.clone());
                                    WatchEventKind::Created
                                }
                                WatchEventKind::Removed => {
                                    known.remove(&path);
                                    WatchEventKind::Removed
                                }
                                other => other,
                            };
                            callback(WatchEvent { kind, path });
                        }
                    }
                }
            }
            debug!("watch listener stopped");
        });

        Ok(PathWatcher {
            _watcher: watcher,
            sender: tx,
            handle: Some(handle),
            ready,
        })
    }

    /// True once the listener thread finished the initial listing and live
    /// events flow to the callback.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Stops the listener thread and waits for it to exit, so the OS watch
    /// handles are released by the time this returns.
    pub fn stop(mut self) {
        let _ = self.sender.send(WatcherMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        let _ = self.sender.send(WatcherMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn list_existing(path: &Path, known: &mut HashSet<PathBuf>) {
    if path.is_file() {
        known.insert(path.to_path_buf());
        return;
    }
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let entry_path = entry.path();
                if !is_dotfile(&entry_path) {
                    known.insert(entry_path);
                }
            }
        }
        Err(e) => warn!("Could not list {} before watching: {}", path.display(), e),
    }
}
