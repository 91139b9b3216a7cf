//! Observer actor that forwards coordinator broadcasts to an mpsc channel.
//!
//! Bridges the actor world to plain async code: CLIs and tests await the
//! channel instead of subscribing themselves.

use acton_reactive::prelude::*;
use tokio::sync::mpsc;

use crate::messages::{RegionUpdated, TickComplete, WorkDropped};

/// Everything the coordinator broadcasts.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Tick(TickComplete),
    Updated(RegionUpdated),
    Dropped(WorkDropped),
}

/// State for the loop observer actor.
#[derive(Default, Clone)]
pub struct LoopObserverState {
    /// Channel sender for forwarding events
    pub tx: Option<mpsc::Sender<LoopEvent>>,
}

impl std::fmt::Debug for LoopObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopObserverState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that receives loop broadcasts and forwards them to a channel.
pub struct LoopObserver {
    tx: mpsc::Sender<LoopEvent>,
}

impl LoopObserver {
    pub fn new(tx: mpsc::Sender<LoopEvent>) -> Self {
        Self { tx }
    }

    /// Spawn the observer. Subscriptions are in place before this returns.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor =
            runtime.new_actor_with_name::<LoopObserverState>("LoopObserver".to_string());

        actor.model.tx = Some(self.tx);

        actor.handle().subscribe::<TickComplete>().await;
        actor.handle().subscribe::<RegionUpdated>().await;
        actor.handle().subscribe::<WorkDropped>().await;

        actor.act_on::<TickComplete>(|actor, context| {
            let event = LoopEvent::Tick(context.message().clone());
            let tx = actor.model.tx.clone();
            Reply::pending(async move {
                if let Some(tx) = tx {
                    // Receiver may have been dropped
                    let _ = tx.send(event).await;
                }
            })
        });

        actor.act_on::<RegionUpdated>(|actor, context| {
            let event = LoopEvent::Updated(context.message().clone());
            let tx = actor.model.tx.clone();
            Reply::pending(async move {
                if let Some(tx) = tx {
                    let _ = tx.send(event).await;
                }
            })
        });

        actor.act_on::<WorkDropped>(|actor, context| {
            let event = LoopEvent::Dropped(context.message().clone());
            let tx = actor.model.tx.clone();
            Reply::pending(async move {
                if let Some(tx) = tx {
                    let _ = tx.send(event).await;
                }
            })
        });

        actor.start().await
    }
}
