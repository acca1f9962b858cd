//! Source-change detection.
//!
//! [`SourceWatcher`] polls a set of files and compares SHA-256 digests of their
//! contents on every cycle. The first cycle that sees a change invokes the
//! callback once with the changed path; all digests are then refreshed, so a
//! burst of edits saved together triggers a single callback.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default polling interval.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

type ChangeCallback = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

/// Polls files for content changes.
pub struct SourceWatcher {
    files: Vec<PathBuf>,
    interval: Duration,
    callback: ChangeCallback,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("files", &self.files)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SourceWatcher {
    /// Create a watcher that calls `on_change` with the path of a changed file.
    pub fn new<F, Fut>(on_change: F) -> Self
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ChangeCallback = Arc::new(move |path| Box::pin(on_change(path)));
        Self {
            files: Vec::new(),
            interval: DEFAULT_WATCH_INTERVAL,
            callback,
            running: None,
        }
    }

    /// Set the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Watch one file. It need not exist yet.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
        self
    }

    /// Watch every file under `dir` with the given extension (without the dot).
    /// Returns the number of files added.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be walked.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>, extension: &str) -> io::Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.map_err(io::Error::other)?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().is_some_and(|ext| ext == extension)
                && !self.files.iter().any(|known| known == path)
            {
                self.files.push(path.to_path_buf());
                added += 1;
            }
        }
        debug!(dir = %dir.as_ref().display(), added, "Watching source directory");
        Ok(added)
    }

    /// Watched files.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Whether the polling task is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the polling task. A no-op while already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.files.clone(),
            self.interval,
            self.callback.clone(),
            cancel.clone(),
        ));
        info!(files = self.files.len(), interval = ?self.interval, "Source watcher started");
        self.running = Some((cancel, task));
    }

    /// Cancel the polling task and wait for it to finish.
    pub async fn stop(&mut self) {
        let Some((cancel, task)) = self.running.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            warn!("Source watcher ended abnormally: {}", e);
        }
        debug!("Source watcher stopped");
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        if let Some((cancel, _)) = &self.running {
            cancel.cancel();
        }
    }
}

async fn digest(path: &Path) -> Option<String> {
    let contents = tokio::fs::read(path).await.ok()?;
    Some(format!("{:x}", Sha256::digest(&contents)))
}

async fn snapshot(files: &[PathBuf]) -> HashMap<PathBuf, Option<String>> {
    let mut digests = HashMap::with_capacity(files.len());
    for path in files {
        digests.insert(path.clone(), digest(path).await);
    }
    digests
}

async fn poll_loop(
    files: Vec<PathBuf>,
    interval: Duration,
    callback: ChangeCallback,
    cancel: CancellationToken,
) {
    let mut known = snapshot(&files).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = snapshot(&files).await;
        let changed = files.iter().find(|path| known.get(*path) != current.get(*path)).cloned();
        known = current;

        if let Some(path) = changed {
            info!(path = %path.display(), "Source change detected");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = callback(path) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_change_triggers_single_callback() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("tools.rs");
        let second = dir.path().join("more.rs");
        std::fs::write(&first, "fn a() {}").unwrap();
        std::fs::write(&second, "fn b() {}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = SourceWatcher::new(move |path| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(path);
            }
        })
        .with_interval(Duration::from_millis(20));
        assert_eq!(watcher.add_dir(dir.path(), "rs").unwrap(), 2);
        watcher.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        std::fs::write(&first, "fn a() { changed() }").unwrap();
        std::fs::write(&second, "fn b() { changed() }").unwrap();
        let path = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(path == first || path == second);

        watcher.stop().await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_created_file_counts_as_change() {
        let dir = tempfile::tempdir().unwrap();
        let pending = dir.path().join("later.rs");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = SourceWatcher::new(move |path| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(path);
            }
        })
        .with_interval(Duration::from_millis(20));
        watcher.add_file(&pending);
        watcher.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&pending, "fn later() {}").unwrap();
        let path = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, pending);
        watcher.stop().await;
    }
}
