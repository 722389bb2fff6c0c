use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{AppError, AppResult},
    store::mutation::{MutationOutcome, PendingMutation},
};

/// Message for the store's background worker
pub(crate) enum Command<M> {
    Mutate {
        mutation: M,
        generation: u64,
        reply: oneshot::Sender<MutationOutcome>,
    },
    /// Acknowledged once every earlier command has been processed
    Barrier(oneshot::Sender<()>),
    /// Stops accepting commands, drains the queue, then acknowledges
    Shutdown(oneshot::Sender<()>),
}

/// Remote half of a store's mutations
#[async_trait::async_trait]
pub(crate) trait MutationHandler: Send + Sync + 'static {
    type Mutation: Send + 'static;

    /// Issues the remote call for `mutation` and reconciles local state
    async fn confirm(&self, mutation: Self::Mutation, generation: u64) -> MutationOutcome;

    /// Runs after each confirmation, before its outcome is delivered
    async fn after_confirm(&self) {}

    fn name(&self) -> &'static str;
}

/// Sender side of a running worker
pub(crate) struct WorkerHandle<M> {
    commands: mpsc::UnboundedSender<Command<M>>,
}

impl<M> Clone for WorkerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<M: Send + 'static> WorkerHandle<M> {
    /// Spawns the worker task. Must be called from within a Tokio runtime.
    pub(crate) fn spawn<H>(handler: Arc<H>) -> Self
    where
        H: MutationHandler<Mutation = M>,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            run(handler, rx).await;
        });
        Self { commands }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub(crate) fn submit(&self, mutation: M, generation: u64) -> AppResult<PendingMutation> {
        let (reply, pending) = PendingMutation::channel();
        self.commands
            .send(Command::Mutate {
                mutation,
                generation,
                reply,
            })
            .map_err(|_| AppError::Internal("store worker has stopped".to_string()))?;
        Ok(pending)
    }

    pub(crate) async fn barrier(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Barrier(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub(crate) async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Processes commands strictly in submission order
///
/// One remote call is in flight at a time, so mutations on the same key can
/// never reach the remote out of order.
async fn run<H: MutationHandler>(handler: Arc<H>, mut rx: mpsc::UnboundedReceiver<Command<H::Mutation>>) {
    tracing::debug!(store = handler.name(), "Store worker started");
    let mut shutdown_acks = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Mutate {
                mutation,
                generation,
                reply,
            } => {
                let outcome = handler.confirm(mutation, generation).await;
                handler.after_confirm().await;
                // The caller may have dropped its handle
                let _ = reply.send(outcome);
            }
            Command::Barrier(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                tracing::info!(store = handler.name(), "Store worker shutting down, draining queue");
                rx.close();
                shutdown_acks.push(ack);
            }
        }
    }

    for ack in shutdown_acks {
        let _ = ack.send(());
    }
    tracing::info!(store = handler.name(), "Store worker stopped");
}
