//! Rules script watcher for hot reload.
//!
//! The parent directory is watched rather than the file, so editors that save
//! by renaming a temporary file over the script keep triggering reloads.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::health::scheduler::ProbeCommand;

/// Monitors the rules script and asks the probe engine to reload it.
pub struct ScriptWatcher {
    path: PathBuf,
    commands: mpsc::UnboundedSender<ProbeCommand>,
}

impl ScriptWatcher {
    pub fn new(path: &Path, commands: mpsc::UnboundedSender<ProbeCommand>) -> Self {
        Self {
            path: path.to_path_buf(),
            commands,
        }
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.commands.clone();
        let name = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::path_not_found().add_path(self.path.clone()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_script = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(name.as_os_str()));
                    if touches_script && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!("rules script change detected");
                        let _ = tx.send(ProbeCommand::Reload);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "rules watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = ScriptWatcher::new(Path::new("/nonexistent/rules.rhai"), tx);
        assert!(watcher.run().is_err());
    }

    #[tokio::test]
    async fn modification_requests_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.rhai");
        std::fs::write(&path, "next(1000);").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = ScriptWatcher::new(&path, tx).run().unwrap();

        std::fs::write(&path, "next(2000);").unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(received.unwrap(), Some(ProbeCommand::Reload));
    }

    #[tokio::test]
    async fn replacing_the_file_keeps_watching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.rhai");
        std::fs::write(&path, "next(1000);").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = ScriptWatcher::new(&path, tx).run().unwrap();

        for round in 0..2 {
            let staged = dir.path().join(format!(".rules.rhai.{}.tmp", round));
            std::fs::write(&staged, format!("next({});", 2000 + round)).unwrap();
            std::fs::rename(&staged, &path).unwrap();

            let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
            assert_eq!(received.unwrap(), Some(ProbeCommand::Reload), "save {}", round);

            tokio::time::sleep(Duration::from_millis(200)).await;
            while rx.try_recv().is_ok() {}
        }
    }

    #[tokio::test]
    async fn other_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.rhai");
        std::fs::write(&path, "next(1000);").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = ScriptWatcher::new(&path, tx).run().unwrap();

        std::fs::write(dir.path().join("notes.txt"), "unrelated").unwrap();
        let received = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(received.is_err());
    }
}
