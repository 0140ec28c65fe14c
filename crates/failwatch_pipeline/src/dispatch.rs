//! Routing of change notices
//!
//! The dispatcher is what every subscription's sink calls into. It filters
//! change events by container extension, hands survivors to the [`Intake`],
//! and turns backend errors into root-failure reports on the control
//! channel. It keeps no per-file state of its own.

use crate::intake::{Intake, Offer};
use crate::orchestrator::ControlEvent;
use crate::watch::{ChangeEvent, NoticeSink, WatchNotice};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, trace};

/// Outcome of one dispatched event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a container file
    Ignored,
    /// Intake is closed
    Closed,
    Offered(Offer),
}

pub struct WatchDispatcher {
    extensions: Vec<String>,
    intake: Intake,
    open: AtomicBool,
    control: Mutex<Sender<ControlEvent>>,
}

impl WatchDispatcher {
    /// `extensions` are lowercase, without the dot.
    pub fn new(extensions: Vec<String>, intake: Intake, control: Sender<ControlEvent>) -> Self {
        Self {
            extensions,
            intake,
            open: AtomicBool::new(true),
            control: Mutex::new(control),
        }
    }

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    /// Whether `path` names a recognized container, by extension only.
    pub fn is_container(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }

    pub fn dispatch(&self, event: &ChangeEvent) -> Dispatch {
        if !self.open.load(Ordering::SeqCst) {
            return Dispatch::Closed;
        }
        if !self.is_container(&event.path) {
            trace!(path = %event.path.display(), "Ignoring non-container event");
            return Dispatch::Ignored;
        }
        Dispatch::Offered(self.intake.offer(&event.path))
    }

    /// Handle one notice from a subscription.
    pub fn notice(&self, notice: WatchNotice) {
        match notice {
            WatchNotice::Change(event) => {
                self.dispatch(&event);
            }
            WatchNotice::Failed { root, error } => {
                if !self.open.load(Ordering::SeqCst) {
                    return;
                }
                error!(root = %root.display(), error = %error, "Watch root failed");
                let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = control.send(ControlEvent::RootFailed { root, error });
            }
        }
    }

    /// Stop forwarding events. Later notices are dropped.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Sink closure handed to each subscription.
    pub fn sink(self: &Arc<Self>) -> NoticeSink {
        let dispatcher = Arc::clone(self);
        Arc::new(move |notice| dispatcher.notice(notice))
    }
}
