//! Directory watcher provider
//!
//! Watches a spec directory and translates filesystem events into catalog
//! mutations. Uses the `notify` crate for cross-platform file system events
//! (inotify on Linux, kqueue on macOS, ReadDirectoryChanges on Windows).
//!
//! Two file flavors are supported, classified by extension:
//!
//! - json files hold a spec body; each file becomes one catalog entry read
//!   from disk at fetch time.
//! - url files are bundles of `<name>: <url>` lines; each bundle maps to its
//!   own source so a rewrite reconciles additions, removals, and edits
//!   atomically.

use crate::catalog::Catalog;
use crate::error::{HubError, Result};
use crate::fetch;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Start watching `path` and feed matching files into the catalog.
///
/// The directory is scanned once before the event loop takes over, so
/// existing contents are ingested. Cancelling `shutdown` closes the watcher
/// and stops the loop without touching the catalog.
pub fn configure(
    shutdown: CancellationToken,
    catalog: Arc<Catalog>,
    path: impl AsRef<Path>,
    prefix: &str,
    json_ext: &str,
    url_ext: &str,
) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
    .map_err(|e| HubError::ProviderInit(format!("unable to start directory watcher: {}", e)))?;
    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| {
            HubError::ProviderInit(format!("could not watch path {}: {}", path.display(), e))
        })?;

    let dir_watcher = DirWatcher {
        source: format!("dirwatcher-{}", path.display()),
        prefix: prefix.to_string(),
        json_ext: json_ext.to_string(),
        url_ext: url_ext.to_string(),
        catalog,
    };

    // Ingest whatever is already in the directory.
    let existing = std::fs::read_dir(&path).map_err(|e| {
        HubError::ProviderInit(format!("could not read path {}: {}", path.display(), e))
    })?;
    for dir_entry in existing {
        match dir_entry {
            Ok(dir_entry) => dir_watcher.apply(&dir_entry.path(), Change::Add),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable directory entry"),
        }
    }

    tokio::spawn(run_event_loop(shutdown, watcher, rx, dir_watcher));
    Ok(())
}

async fn run_event_loop(
    shutdown: CancellationToken,
    watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    dir_watcher: DirWatcher,
) {
    // The watcher must stay alive for as long as events are consumed.
    let _watcher = watcher;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(Ok(event)) => dir_watcher.dispatch(&event),
                Some(Err(e)) => tracing::warn!(error = %e, "directory watcher error"),
                None => break,
            },
        }
    }
    tracing::info!(source = %dir_watcher.source, "stopping directory watcher");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Json,
    Url,
}

struct DirWatcher {
    source: String,
    prefix: String,
    json_ext: String,
    url_ext: String,
    catalog: Arc<Catalog>,
}

impl DirWatcher {
    fn dispatch(&self, event: &notify::Event) {
        let change = match event.kind {
            EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) => Change::Add,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                Change::Remove
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Change::Add,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Paths are reported as [old, new].
                if let Some(old) = event.paths.first() {
                    self.apply(old, Change::Remove);
                }
                if let Some(new) = event.paths.get(1) {
                    self.apply(new, Change::Add);
                }
                return;
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Ambiguous rename report; the path's existence decides.
                for path in &event.paths {
                    let change = if path.exists() {
                        Change::Add
                    } else {
                        Change::Remove
                    };
                    self.apply(path, change);
                }
                return;
            }
            _ => return,
        };
        for path in &event.paths {
            self.apply(path, change);
        }
    }

    fn apply(&self, path: &Path, change: Change) {
        match self.classify(path) {
            Some((FileKind::Json, key)) => self.change_json_file(&key, path, change),
            Some((FileKind::Url, key)) => self.change_url_file(&key, path, change),
            None => {}
        }
    }

    /// Classify a path by prefix and extension, returning the derived key
    fn classify(&self, path: &Path) -> Option<(FileKind, String)> {
        let file_name = path.file_name()?.to_str()?;
        let stem = file_name.strip_prefix(&self.prefix)?;
        if let Some(key) = stem.strip_suffix(&self.json_ext) {
            return Some((FileKind::Json, key.to_string()));
        }
        if let Some(key) = stem.strip_suffix(&self.url_ext) {
            return Some((FileKind::Url, key.to_string()));
        }
        None
    }

    fn change_json_file(&self, key: &str, path: &Path, change: Change) {
        let result = match change {
            Change::Add => self.catalog.put(&self.source, key, fetch::cached_file(path)),
            Change::Remove => self.catalog.remove(&self.source, key),
        };
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "could not update spec file entry");
        }
    }

    fn change_url_file(&self, key: &str, path: &Path, change: Change) {
        let source = format!("{}-{}", self.source, key);
        match change {
            Change::Add => {
                let content = match std::fs::read_to_string(path) {
                    Ok(content) => content,
                    Err(e) => {
                        // An unreadable bundle is treated as empty.
                        tracing::warn!(path = %path.display(), error = %e, "unable to read url bundle");
                        String::new()
                    }
                };
                let specs = parse_bundle(path, &content)
                    .into_iter()
                    .map(|(name, url)| (name, fetch::cached_remote(url)))
                    .collect();
                self.catalog.replace_all_of(&source, specs);
            }
            Change::Remove => self.catalog.remove_all_of(&source),
        }
    }
}

/// Parse a bundle of `<name>: <url>` lines.
///
/// Both sides are trimmed. Blank lines are tolerated; any other line that
/// does not match the grammar is logged and skipped.
fn parse_bundle(path: &Path, content: &str) -> HashMap<String, String> {
    let mut specs = HashMap::new();
    for row in content.lines() {
        if row.trim().is_empty() {
            continue;
        }
        match row.split_once(": ") {
            Some((name, url)) => {
                specs.insert(name.trim().to_string(), url.trim().to_string());
            }
            None => {
                tracing::warn!(
                    path = %path.display(),
                    row,
                    "unexpected line format in url bundle"
                );
            }
        }
    }
    specs
}
