//! The network-owning run loop.
//!
//! Exactly one worker owns the cache and the connection. Other
//! contexts never call into it directly: they enqueue [`SyncCommand`]s
//! on its private FIFO and observe results through posted
//! [`SyncNotification`]s, never by polling owned state. The single
//! `run` loop drains commands strictly in submission order, giving the
//! worker exclusive, sequential access to everything it owns.

use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::mutation::{MutationPipeline, MutationRequest};
use crate::progress::ProgressEvent;
use crate::source::RemoteSource;
use orrery_cache::Cache;
use orrery_types::CacheEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Work enqueued for the network owner.
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a full reconciliation against the remote authority.
    Refresh,
    /// Push one local edit through the mutation pipeline.
    Mutate(MutationRequest),
    /// Persist the cache snapshot.
    Save,
    /// Drain nothing further and return the cache.
    Shutdown,
}

/// What the worker posts back to observers.
#[derive(Debug)]
pub enum SyncNotification {
    /// Progress from an in-flight refresh.
    Progress(ProgressEvent),
    /// A confirmed cache mutation.
    Updated(CacheEvent),
    /// A refresh completed.
    RefreshFinished(SyncReport),
    /// An operation failed; the cache keeps its previous state (plus
    /// any still-pending optimistic edits).
    Failed { context: String, error: String },
}

/// Sender half handed to presentation contexts.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    commands: mpsc::Sender<SyncCommand>,
}

impl WorkerHandle {
    /// Enqueues a full refresh.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.send(SyncCommand::Refresh).await
    }

    /// Enqueues a local edit.
    pub async fn mutate(&self, request: MutationRequest) -> SyncResult<()> {
        self.send(SyncCommand::Mutate(request)).await
    }

    /// Enqueues a snapshot save.
    pub async fn save(&self) -> SyncResult<()> {
        self.send(SyncCommand::Save).await
    }

    /// Asks the worker to stop after the commands already queued.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(SyncCommand::Shutdown).await
    }

    async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// The owner of the cache and the remote connection.
pub struct SyncWorker {
    cache: Cache,
    source: Box<dyn RemoteSource>,
    engine: SyncEngine,
    commands: mpsc::Receiver<SyncCommand>,
    notifications: mpsc::UnboundedSender<SyncNotification>,
}

impl SyncWorker {
    /// Builds a worker plus the handle and notification stream for
    /// the presentation side.
    pub fn new(
        cache: Cache,
        source: Box<dyn RemoteSource>,
        engine: SyncEngine,
    ) -> (
        Self,
        WorkerHandle,
        mpsc::UnboundedReceiver<SyncNotification>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Self {
            cache,
            source,
            engine,
            commands: command_rx,
            notifications: event_tx,
        };
        (worker, WorkerHandle { commands: command_tx }, event_rx)
    }

    /// Drains commands in submission order until shutdown or every
    /// handle is dropped. Returns the cache to the caller.
    pub async fn run(mut self) -> Cache {
        info!("sync worker started");
        while let Some(command) = self.commands.recv().await {
            match command {
                SyncCommand::Refresh => self.handle_refresh().await,
                SyncCommand::Mutate(request) => self.handle_mutate(request).await,
                SyncCommand::Save => self.handle_save(),
                SyncCommand::Shutdown => break,
            }
        }
        info!("sync worker stopped");
        self.cache
    }

    async fn handle_refresh(&mut self) {
        let events = self.notifications.clone();
        let mut sink = move |event: ProgressEvent| {
            let _ = events.send(SyncNotification::Progress(event));
        };
        match self
            .engine
            .refresh(&mut self.cache, self.source.as_ref(), &mut sink)
            .await
        {
            Ok(report) => {
                self.notify(SyncNotification::RefreshFinished(report));
            }
            Err(e) => {
                warn!(error = %e, "refresh failed");
                self.notify(SyncNotification::Failed {
                    context: "refresh".into(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn handle_mutate(&mut self, request: MutationRequest) {
        let dirty = match MutationPipeline::apply(&mut self.cache, request) {
            Ok(evt) => evt,
            Err(e) => {
                warn!(error = %e, "mutation rejected");
                self.notify(SyncNotification::Failed {
                    context: "mutate".into(),
                    error: e.to_string(),
                });
                return;
            }
        };
        match MutationPipeline::reconcile(self.source.as_ref(), &mut self.cache, dirty).await {
            Ok(update) => {
                debug!(event = %update, "mutation confirmed");
                self.notify(SyncNotification::Updated(update));
            }
            Err(e) => {
                // The optimistic state stays pending; the presentation
                // layer decides whether to retry or roll back.
                warn!(error = %e, "mutation not confirmed");
                self.notify(SyncNotification::Failed {
                    context: "mutate".into(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn handle_save(&mut self) {
        if let Err(e) = self.cache.save() {
            warn!(error = %e, "snapshot save failed");
            self.notify(SyncNotification::Failed {
                context: "save".into(),
                error: e.to_string(),
            });
        }
    }

    fn notify(&self, notification: SyncNotification) {
        let _ = self.notifications.send(notification);
    }
}
