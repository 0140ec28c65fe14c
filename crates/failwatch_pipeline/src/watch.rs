//! Filesystem change notification sources
//!
//! A [`WatchSource`] turns a [`WatchRoot`] into a live [`Subscription`] that
//! pushes [`WatchNotice`]s into a sink closure. The sink runs on the
//! backend's notification thread and must not block.
//!
//! [`NotifySource`] is the production implementation, backed by the
//! `notify` crate's native watcher or its polling watcher.

use crate::config::WatchBackend;
use crate::error::WatchError;
use notify::event::{CreateKind, MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A directory under observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchRoot {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    /// Destination side of a rename
    MovedTo,
}

/// A qualifying filesystem notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub at: Instant,
}

/// Everything a subscription reports
#[derive(Debug, Clone)]
pub enum WatchNotice {
    Change(ChangeEvent),
    /// The backend reported an error; the root's subscription is unusable
    Failed { root: PathBuf, error: String },
}

/// Receives notices on the backend's thread.
pub type NoticeSink = Arc<dyn Fn(WatchNotice) + Send + Sync>;

/// A live subscription. Dropping it releases the OS watch.
pub trait Subscription: Send {
    fn root(&self) -> &Path;
}

/// Capability to subscribe to change notifications under a root.
pub trait WatchSource: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    fn subscribe(
        &self,
        root: &WatchRoot,
        sink: NoticeSink,
    ) -> Result<Box<dyn Subscription>, WatchError>;
}

/// Map one raw `notify` event onto the kinds the pipeline reacts to.
///
/// Folder creation, removals, access events and permission or ownership
/// changes yield nothing. For renames only the destination path qualifies.
pub fn classify(event: &Event) -> Vec<ChangeEvent> {
    let at = Instant::now();
    let make = |path: &PathBuf, kind: ChangeKind| ChangeEvent {
        path: path.clone(),
        kind,
        at,
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| make(p, ChangeKind::Created))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| make(p, ChangeKind::MovedTo))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .get(1)
            .map(|p| vec![make(p, ChangeKind::MovedTo)])
            .unwrap_or_default(),
        // Backends that cannot tell the sides apart report every path; the
        // stability probe discards the one that no longer exists.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Other)) => event
            .paths
            .iter()
            .map(|p| make(p, ChangeKind::MovedTo))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)) => event
            .paths
            .iter()
            .map(|p| make(p, ChangeKind::Modified))
            .collect(),
        EventKind::Modify(_) => Vec::new(),
        EventKind::Remove(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

/// `notify`-backed source: one watcher instance per root.
#[derive(Debug, Clone, Copy)]
pub struct NotifySource {
    backend: WatchBackend,
    poll_interval: Duration,
}

impl NotifySource {
    pub fn new(backend: WatchBackend, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    pub fn native() -> Self {
        Self::new(WatchBackend::Native, Duration::from_secs(1))
    }

    pub fn polling(poll_interval: Duration) -> Self {
        Self::new(WatchBackend::Poll, poll_interval)
    }
}

struct NotifySubscription {
    root: PathBuf,
    _watcher: Box<dyn Watcher + Send>,
}

impl Subscription for NotifySubscription {
    fn root(&self) -> &Path {
        &self.root
    }
}

impl WatchSource for NotifySource {
    fn name(&self) -> &'static str {
        match self.backend {
            WatchBackend::Native => "native",
            WatchBackend::Poll => "poll",
        }
    }

    fn subscribe(
        &self,
        root: &WatchRoot,
        sink: NoticeSink,
    ) -> Result<Box<dyn Subscription>, WatchError> {
        let failed_root = root.path.clone();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in classify(&event) {
                    sink(WatchNotice::Change(change));
                }
            }
            Err(error) => sink(WatchNotice::Failed {
                root: failed_root.clone(),
                error: error.to_string(),
            }),
        };

        let backend = self.name();
        let mut watcher: Box<dyn Watcher + Send> = match self.backend {
            WatchBackend::Native => Box::new(
                RecommendedWatcher::new(handler, Config::default())
                    .map_err(|source| WatchError::Create { backend, source })?,
            ),
            WatchBackend::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    Config::default()
                        .with_poll_interval(self.poll_interval)
                        .with_compare_contents(false),
                )
                .map_err(|source| WatchError::Create { backend, source })?,
            ),
        };

        let mode = if root.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root.path, mode)
            .map_err(|source| WatchError::Subscribe {
                root: root.path.clone(),
                source,
            })?;

        Ok(Box::new(NotifySubscription {
            root: root.path.clone(),
            _watcher: watcher,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn kinds(events: Vec<ChangeEvent>) -> Vec<(PathBuf, ChangeKind)> {
        events.into_iter().map(|e| (e.path, e.kind)).collect()
    }

    #[test]
    fn test_create_and_modify_qualify() {
        let created = classify(&event(EventKind::Create(CreateKind::File), &["/in/a.zip"]));
        assert_eq!(kinds(created), vec![(PathBuf::from("/in/a.zip"), ChangeKind::Created)]);

        let modified = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/in/a.zip"],
        ));
        assert_eq!(kinds(modified), vec![(PathBuf::from("/in/a.zip"), ChangeKind::Modified)]);

        // Polling backend reports mtime changes as metadata events.
        let polled = classify(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/in/a.zip"],
        ));
        assert_eq!(polled.len(), 1);
    }

    #[test]
    fn test_rename_uses_destination_only() {
        let both = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/in/a.zip.part", "/in/a.zip"],
        ));
        assert_eq!(kinds(both), vec![(PathBuf::from("/in/a.zip"), ChangeKind::MovedTo)]);

        let to = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/in/b.zip"],
        ));
        assert_eq!(kinds(to), vec![(PathBuf::from("/in/b.zip"), ChangeKind::MovedTo)]);

        let from = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/in/c.zip"],
        ));
        assert!(from.is_empty());
    }

    #[test]
    fn test_ignored_kinds() {
        let ignored = [
            EventKind::Create(CreateKind::Folder),
            EventKind::Remove(RemoveKind::File),
            EventKind::Access(AccessKind::Any),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            EventKind::Any,
            EventKind::Other,
        ];
        for kind in ignored {
            assert!(classify(&event(kind, &["/in/a.zip"])).is_empty(), "{kind:?}");
        }
    }
}
