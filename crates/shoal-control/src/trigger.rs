//! Tick triggers: interval timer and debounced manifest watching.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What caused a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTrigger {
    Interval,
    FileChange,
}

impl TickTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            TickTrigger::Interval => "interval",
            TickTrigger::FileChange => "file change",
        }
    }
}

/// Create the trigger channel. Capacity 1: a trigger arriving while a tick
/// is in progress queues at most one pending tick; further triggers
/// collapse into it.
pub fn channel() -> (mpsc::Sender<TickTrigger>, mpsc::Receiver<TickTrigger>) {
    mpsc::channel(1)
}

/// Watches the manifest for changes and queues debounced tick triggers.
///
/// The manifest's parent directory is watched non-recursively (editors
/// replace files via rename, so watching the file itself misses updates)
/// and events are filtered back to the manifest's file name. Bursts of
/// events within the debounce window collapse into a single trigger.
pub struct ManifestWatcher {
    _watcher: notify::RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl ManifestWatcher {
    pub fn spawn(
        manifest: &Path,
        debounce: Duration,
        triggers: mpsc::Sender<TickTrigger>,
    ) -> notify::Result<Self> {
        let manifest: PathBuf = manifest
            .canonicalize()
            .unwrap_or_else(|_| manifest.to_path_buf());
        let target: Option<OsString> = manifest.file_name().map(OsString::from);
        let directory = manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        if touches_target(&event, target.as_deref()) {
                            let _ = raw_tx.send(());
                        }
                    }
                    Err(e) => warn!(error = %e, "manifest watch error"),
                }
            })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        debug!(manifest = %manifest.display(), "watching manifest for changes");

        let task = tokio::spawn(async move {
            while raw_rx.recv().await.is_some() {
                // Collapse the burst: keep draining until the window stays
                // quiet for a full debounce period.
                loop {
                    match tokio::time::timeout(debounce, raw_rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                debug!("manifest changed, queueing tick");
                let _ = triggers.try_send(TickTrigger::FileChange);
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn touches_target(event: &notify::Event, target: Option<&std::ffi::OsStr>) -> bool {
    if matches!(event.kind, notify::EventKind::Access(_)) {
        return false;
    }
    let Some(target) = target else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pending_triggers_collapse() {
        let (tx, mut rx) = channel();
        tx.try_send(TickTrigger::FileChange).unwrap();
        // Channel is full: the second trigger collapses into the pending one.
        assert!(tx.try_send(TickTrigger::FileChange).is_err());
        assert_eq!(rx.try_recv().unwrap(), TickTrigger::FileChange);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn burst_of_writes_yields_one_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("compose.yml");
        std::fs::write(&manifest, "services: {}\n").unwrap();

        let (tx, mut rx) = channel();
        let _watcher =
            ManifestWatcher::spawn(&manifest, Duration::from_millis(100), tx).unwrap();

        for i in 0..3 {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&manifest)
                .unwrap();
            writeln!(file, "# edit {i}").unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let trigger = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no trigger within timeout")
            .unwrap();
        assert_eq!(trigger, TickTrigger::FileChange);

        // The burst collapsed: nothing else is pending after the window.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("compose.yml");
        std::fs::write(&manifest, "services: {}\n").unwrap();

        let (tx, mut rx) = channel();
        let _watcher =
            ManifestWatcher::spawn(&manifest, Duration::from_millis(50), tx).unwrap();

        std::fs::write(dir.path().join("other.txt"), "noise").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
    }
}
