use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::{CurrentShardState, EntityId, ShardId, ShardStats};
use crate::passivation::{PassivateIntent, PassivationManager};
use crate::settings::Settings;
use crate::shard::{EntityFactory, MessageOf, ShardController, ShardError, ShardMessenger};

/// The node-level entry point: hosts shard controllers, routes traffic to
/// them, and drives the passivation policy.
///
/// A host owns one [`PassivationManager`] and one controller task per
/// hosted shard. Activating or deactivating a shard retunes the per-shard
/// entity budget; under the idle strategy a single coarse sweep timer scans
/// all shards.
///
/// # Examples
///
/// ```rust,no_run
/// # use std::time::Duration;
/// use shardhost::model::{EntityId, ShardId};
/// use shardhost::settings::Settings;
/// use shardhost::shard::{Entity, EntityContext, EntityFactory};
/// use shardhost::ShardHost;
///
/// struct Greeter;
///
/// #[shardhost::async_trait]
/// impl Entity for Greeter {
///     type Message = String;
///
///     async fn handle(&mut self, ctx: &EntityContext<String>, message: String) {
///         println!("{}: {message}", ctx.entity_id());
///     }
/// }
///
/// struct GreeterFactory;
///
/// impl EntityFactory for GreeterFactory {
///     type Entity = Greeter;
///
///     fn create(&self, _shard_id: &ShardId, _entity_id: &EntityId) -> Greeter {
///         Greeter
///     }
/// }
///
/// # async fn run() -> Result<(), shardhost::Error> {
/// let host = ShardHost::new(Settings::idle(Duration::from_secs(120)), GreeterFactory)?;
/// host.start_shard(ShardId::new("1")).await?;
/// host.deliver(&ShardId::new("1"), EntityId::new("alice"), "hello".to_owned()).await;
/// # Ok(())
/// # }
/// ```
pub struct ShardHost<F: EntityFactory> {
    factory: Arc<F>,
    manager: Arc<PassivationManager>,
    settings: Settings,
    /// The controllers currently hosted, keyed by shard id.
    controllers: Arc<Mutex<HashMap<ShardId, ShardMessenger<MessageOf<F>>>>>,
    sweeper: Option<AbortHandle>,
}

impl<F: EntityFactory> ShardHost<F> {
    /// Creates a host and, under the idle strategy, spawns its sweep timer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] if the settings are invalid.
    pub fn new(settings: Settings, factory: F) -> Result<Self> {
        let manager = Arc::new(PassivationManager::new(&settings)?);
        let controllers = Arc::new(Mutex::new(HashMap::new()));

        let sweeper = manager.sweep_interval().map(|period| {
            spawn_named(
                "host::sweeper",
                run_sweeper(Arc::clone(&manager), Arc::clone(&controllers), period),
            )
            .abort_handle()
        });

        Ok(Self {
            factory: Arc::new(factory),
            manager,
            settings,
            controllers,
            sweeper,
        })
    }

    /// Activates `shard_id` on this node: spawns its controller task,
    /// registers it with the manager, and applies any rebalance evictions
    /// this causes on the other hosted shards.
    ///
    /// # Errors
    ///
    /// Returns [`ShardError::AlreadyStarted`] if the shard is already
    /// hosted.
    pub async fn start_shard(&self, shard_id: ShardId) -> Result<()> {
        let mut controllers = self.controllers.lock().await;
        if controllers.contains_key(&shard_id) {
            return Err(Error::Shard(ShardError::AlreadyStarted(shard_id)));
        }

        info!("[ShardHost] Starting shard {shard_id}");
        let mut controller = ShardController::new(
            shard_id.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.manager),
            self.settings.tuning.clone(),
            self.settings.strict,
        );
        let messenger = controller.messenger();

        let task_shard = shard_id.clone();
        spawn_named("shard::controller", async move {
            if let Err(why) = controller.run().await {
                error!("[ShardController {task_shard}] Aborted: {why}");
            }
        });

        controllers.insert(shard_id.clone(), messenger);

        let intents = self.manager.register_shard(shard_id);
        dispatch_intents(&controllers, intents);

        Ok(())
    }

    /// Deactivates `shard_id`: deregisters it from the manager and shuts
    /// its controller down, cancelling pending hand-off timers and
    /// force-stopping entities still mid-handshake.
    ///
    /// Returns whether a controller was present.
    pub async fn stop_shard(&self, shard_id: &ShardId) -> bool {
        let mut controllers = self.controllers.lock().await;
        let Some(messenger) = controllers.remove(shard_id) else {
            warn!("[ShardHost] Shard {shard_id} is not hosted here");
            return false;
        };

        info!("[ShardHost] Stopping shard {shard_id}");
        let intents = self.manager.deregister_shard(shard_id);
        dispatch_intents(&controllers, intents);
        messenger.shutdown();

        true
    }

    /// Routes `message` to `entity_id` on `shard_id`, activating the entity
    /// if it is not currently running.
    ///
    /// Returns whether the shard is hosted here; a message for an unknown
    /// shard is dropped with a warning.
    pub async fn deliver(&self, shard_id: &ShardId, entity_id: EntityId, message: MessageOf<F>) -> bool {
        match self.controllers.lock().await.get(shard_id) {
            Some(messenger) => {
                messenger.deliver(entity_id, message);
                true
            },
            None => {
                warn!(
                    "[ShardHost] Dropping message for entity {entity_id} on unknown shard \
                     {shard_id}"
                );
                false
            },
        }
    }

    /// Administrative query: the ids currently in the `Active` state on
    /// `shard_id`, or [`None`] if the shard is not hosted here.
    pub async fn shard_state(&self, shard_id: &ShardId) -> Option<CurrentShardState> {
        let messenger = self.controllers.lock().await.get(shard_id).cloned()?;
        messenger.shard_state().await
    }

    /// Administrative query: entity occupancy of `shard_id`, or [`None`] if
    /// the shard is not hosted here.
    pub async fn shard_stats(&self, shard_id: &ShardId) -> Option<ShardStats> {
        let messenger = self.controllers.lock().await.get(shard_id).cloned()?;
        messenger.shard_stats().await
    }

    /// The ids of the shards currently hosted on this node.
    pub async fn shards(&self) -> Vec<ShardId> {
        self.controllers.lock().await.keys().cloned().collect()
    }

    /// The passivation manager owned by this host.
    #[must_use]
    pub fn manager(&self) -> &PassivationManager {
        &self.manager
    }

    /// Shuts down the sweep timer and every hosted shard controller.
    pub async fn shutdown_all(&self) {
        info!("[ShardHost] Shutting down all shards");
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }

        let mut controllers = self.controllers.lock().await;
        for (shard_id, messenger) in controllers.drain() {
            self.manager.deregister_shard(&shard_id);
            messenger.shutdown();
        }
    }
}

impl<F: EntityFactory> Drop for ShardHost<F> {
    /// A custom drop implementation that stops the sweep timer and tells
    /// every remaining controller to shut down.
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }

        let controllers = Arc::clone(&self.controllers);
        tokio::spawn(async move {
            for (_, messenger) in controllers.lock().await.drain() {
                messenger.shutdown();
            }
        });
    }
}

/// Sends each shard its slice of an intent batch, preserving the per-shard
/// order the manager produced.
fn dispatch_intents<M>(
    controllers: &HashMap<ShardId, ShardMessenger<M>>,
    intents: Vec<PassivateIntent>,
) {
    if intents.is_empty() {
        return;
    }

    let mut grouped: HashMap<ShardId, Vec<PassivateIntent>> = HashMap::new();
    for intent in intents {
        grouped.entry(intent.shard_id.clone()).or_default().push(intent);
    }

    for (shard_id, batch) in grouped {
        match controllers.get(&shard_id) {
            Some(messenger) => messenger.apply(batch),
            None => debug!(
                "[ShardHost] Dropping {} intent(s) for unhosted shard {}",
                batch.len(),
                shard_id
            ),
        }
    }
}

/// The idle sweep loop: one coarse timer scanning every shard's idle
/// tracker, instead of one timer per entity.
async fn run_sweeper<M: Send + 'static>(
    manager: Arc<PassivationManager>,
    controllers: Arc<Mutex<HashMap<ShardId, ShardMessenger<M>>>>,
    period: Duration,
) {
    debug!("[ShardHost] Idle sweeper running every {period:?}");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let intents = manager.sweep(Instant::now());
        if intents.is_empty() {
            continue;
        }

        debug!("[ShardHost] Sweep produced {} passivation intent(s)", intents.len());
        dispatch_intents(&*controllers.lock().await, intents);
    }
}
