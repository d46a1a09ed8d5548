//! File-backed membership source.
//!
//! Polls a membership document (for example an Endpoints object mounted or
//! written by a sidecar) and publishes a snapshot whenever its parsed content
//! changes. A missing or malformed document keeps the last good snapshot in
//! place: an unreadable source is not the same as an empty membership.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::MembershipError;
use crate::membership::{MembershipSnapshot, ServiceFilter, load_document};

/// Polls one membership document.
#[derive(Debug, Clone)]
pub struct FileMembershipSource {
    path: PathBuf,
    filter: Option<ServiceFilter>,
    interval: Duration,
}

impl FileMembershipSource {
    pub const fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            filter: None,
            interval,
        }
    }

    /// Ignore documents that name a different service.
    #[must_use]
    pub fn with_filter(mut self, filter: ServiceFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Read the document once.
    pub fn read(&self) -> Result<Option<MembershipSnapshot>, MembershipError> {
        load_document(&self.path, self.filter.as_ref())
    }

    /// Read the document and publish it if it differs from the current value.
    ///
    /// Returns whether a new snapshot was published.
    pub fn poll_into(
        &self,
        tx: &watch::Sender<Option<MembershipSnapshot>>,
    ) -> Result<bool, MembershipError> {
        let Some(snapshot) = self.read()? else {
            debug!(path = %self.path.display(), "Membership document is for another service");
            return Ok(false);
        };
        Ok(tx.send_if_modified(|current| {
            if current.as_ref() == Some(&snapshot) {
                false
            } else {
                *current = Some(snapshot);
                true
            }
        }))
    }

    /// Spawn the polling loop. It ends on shutdown or when every receiver of
    /// `tx` is gone.
    pub fn spawn(
        self,
        tx: watch::Sender<Option<MembershipSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_error: Option<String> = None;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match self.poll_into(&tx) {
                            Ok(published) => {
                                if last_error.take().is_some() {
                                    info!(path = %self.path.display(), "Membership document readable again");
                                }
                                if published {
                                    let members = tx.borrow().as_ref().map_or(0, MembershipSnapshot::len);
                                    info!(path = %self.path.display(), members, "Membership changed");
                                }
                            }
                            Err(e) => {
                                let message = e.to_string();
                                if last_error.as_deref() != Some(message.as_str()) {
                                    warn!(error = %message, "Failed to load membership document");
                                    last_error = Some(message);
                                }
                            }
                        }
                    }
                    () = tx.closed() => {
                        debug!("No membership consumers left");
                        return;
                    }
                    _ = shutdown.changed() => {
                        info!("Membership source shutting down");
                        return;
                    }
                }
            }
        })
    }
}
