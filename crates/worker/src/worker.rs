//! Worker lifecycle: install, activate, serve.

use crate::deployment::Deployment;
use crate::error::{ErrorKind, Result};
use crate::interceptor::{ActiveManifest, Handled, InterceptDecision, Interceptor};
use crate::origin::Origin;
use crate::synchronizer::{CacheStatus, Generations, Reconciliation, Synchronizer};
use derive_more::Display;
use shellsync_fetch::FetcherHandle;
use shellsync_storage::StorageHandle;
use std::str::FromStr;

/// Lifecycle states, in the order a deployment moves through them.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WorkerState {
    #[default]
    #[display("uninitialized")]
    Uninitialized,
    #[display("installing")]
    Installing,
    /// Shell staged, waiting for activation.
    #[display("installed")]
    Installed,
    #[display("activating")]
    Activating,
    /// Reconciled; requests are served from the durable generation.
    #[display("ready")]
    Ready,
}

/// Commands posted to the worker from a client page.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate a waiting deployment without waiting for clients to close.
    #[display("skipWaiting")]
    ActivateNow,
    /// Cache every resource of the deployment, not just the shell.
    #[display("downloadOffline")]
    DownloadOffline,
}
impl FromStr for Command {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "skipWaiting" => Ok(Self::ActivateNow),
            "downloadOffline" => Ok(Self::DownloadOffline),
            other => exn::bail!(ErrorKind::UnknownCommand(other.to_string())),
        }
    }
}

/// Sets the worker state for the duration of an operation.
///
/// Falls back to a given state when dropped before
/// [`complete()`](Self::complete), which covers both errors and a caller
/// dropping the operation's future part way through.
struct Transition<'a> {
    state: &'a mut WorkerState,
    fallback: WorkerState,
    operation: &'static str,
    completed: bool,
}

impl<'a> Transition<'a> {
    fn begin(
        state: &'a mut WorkerState,
        during: WorkerState,
        fallback: WorkerState,
        operation: &'static str,
    ) -> Self {
        *state = during;
        Self {
            state,
            fallback,
            operation,
            completed: false,
        }
    }

    fn complete(mut self, next: WorkerState) {
        *self.state = next;
        self.completed = true;
    }
}
impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.completed {
            *self.state = self.fallback;
            tracing::warn!(operation = self.operation, state = %self.fallback, "Lifecycle operation did not complete");
        }
    }
}

/// An offline-capable worker for one deployment.
///
/// Lifecycle events must arrive in order: [`install()`](Self::install), then
/// [`activate()`](Self::activate). Until an activation succeeds (or a
/// previous one is [restored](Self::restore)) every request passes through
/// to the network.
pub struct ServiceWorker {
    deployment: Deployment,
    synchronizer: Synchronizer,
    interceptor: Interceptor,
    active: ActiveManifest,
    state: WorkerState,
}

impl ServiceWorker {
    pub fn new(
        storage: StorageHandle,
        fetcher: FetcherHandle,
        origin: Origin,
        generations: Generations,
        deployment: Deployment,
    ) -> Self {
        let active = ActiveManifest::default();
        let interceptor = Interceptor::new(
            storage.clone(),
            fetcher.clone(),
            origin.clone(),
            generations.durable.clone(),
            active.clone(),
        );
        Self {
            deployment,
            synchronizer: Synchronizer::new(storage, fetcher, origin, generations),
            interceptor,
            active,
            state: WorkerState::Uninitialized,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// A handle for serving requests concurrently with the worker.
    pub fn interceptor(&self) -> Interceptor {
        self.interceptor.clone()
    }

    fn require(&self, operation: &'static str, allowed: &[WorkerState]) -> Result<()> {
        if !allowed.contains(&self.state) {
            exn::bail!(ErrorKind::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Stage the application shell.
    ///
    /// A worker that is already serving keeps serving its current manifest
    /// while the new shell is staged, and stays ready if staging fails. Any
    /// previously staged shell is gone either way.
    #[tracing::instrument(skip_all, fields(shell = self.deployment.core.len()))]
    pub async fn install(&mut self) -> Result<()> {
        use WorkerState::*;
        self.require("install", &[Uninitialized, Installed, Ready])?;
        let fallback = match self.state {
            Ready => Ready,
            _ => Uninitialized,
        };
        let transition = Transition::begin(&mut self.state, Installing, fallback, "install");
        if self.synchronizer.discard_staging().await? {
            tracing::debug!("Discarded abandoned staging generation");
        }
        self.synchronizer.prime_shell(&self.deployment.core).await?;
        transition.complete(Installed);
        tracing::info!("Installed");
        Ok(())
    }

    /// Reconcile the caches against this deployment and start serving it.
    ///
    /// Nothing is served from cache while reconciliation runs. On failure
    /// every cache generation has been wiped and the worker is back to
    /// [`Uninitialized`](WorkerState::Uninitialized), passing every request
    /// through until the next install.
    #[tracing::instrument(skip_all)]
    pub async fn activate(&mut self) -> Result<Reconciliation> {
        self.require("activate", &[WorkerState::Installed])?;
        self.active.clear();
        let transition =
            Transition::begin(&mut self.state, WorkerState::Activating, WorkerState::Uninitialized, "activate");
        let outcome = self.synchronizer.reconcile(&self.deployment.resources).await?;
        self.active.publish(self.deployment.resources.clone());
        transition.complete(WorkerState::Ready);
        tracing::info!("Activated");
        Ok(outcome)
    }

    /// Pick up where an earlier run over the same storage left off.
    ///
    /// If the persisted manifest equals this deployment's, requests are
    /// served from cache again. If staging holds this deployment's complete
    /// shell, the worker is [`Installed`](WorkerState::Installed) and waiting
    /// for activation; otherwise it is [`Ready`](WorkerState::Ready) when the
    /// record matched, or still uninitialized.
    pub async fn restore(&mut self) -> Result<WorkerState> {
        self.require("restore", &[WorkerState::Uninitialized])?;
        let record = self.synchronizer.persisted_manifest().await?;
        let current = record.as_ref() == Some(&self.deployment.resources);
        if current {
            self.active.publish(self.deployment.resources.clone());
            self.state = WorkerState::Ready;
        }
        if self.synchronizer.staged_shell(&self.deployment.core).await? {
            self.state = WorkerState::Installed;
        }
        tracing::debug!(recorded = record.is_some(), current, state = %self.state, "Restored");
        Ok(self.state)
    }

    pub fn resolve(&self, url: &str) -> InterceptDecision {
        self.interceptor.resolve(url)
    }

    /// Intercept a request. See [`Interceptor::handle`].
    pub async fn fetch(&self, url: &str) -> Result<Handled> {
        self.interceptor.handle(url).await
    }

    /// Handle a command posted by a client.
    #[tracing::instrument(skip(self))]
    pub async fn message(&mut self, command: Command) -> Result<()> {
        match command {
            Command::ActivateNow => match self.state {
                WorkerState::Installed => self.activate().await.map(|_| ()),
                state => {
                    tracing::debug!(%state, "Nothing waiting to activate");
                    Ok(())
                },
            },
            Command::DownloadOffline => {
                self.require("download offline", &[WorkerState::Ready])?;
                self.synchronizer.download_offline(&self.deployment.resources).await.map(|_| ())
            },
        }
    }

    pub async fn status(&self) -> Result<CacheStatus> {
        self.synchronizer.status(&self.deployment.resources).await
    }
}
