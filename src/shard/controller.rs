use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedReceiver as Receiver, UnboundedSender as Sender};
use futures::StreamExt;
use tokio::task::AbortHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use super::message::{ShardControllerMessage, WorkerMessage};
use super::messenger::ShardMessenger;
use super::worker::{run_worker, EntityContext, EntityFactory, MessageOf};
use super::{EntityStatus, ShardError};
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::{CurrentShardState, EntityId, ShardId, ShardStats};
use crate::passivation::{PassivateIntent, PassivationManager};
use crate::settings::TuningSettings;

/// One live entity slot owned by a controller.
struct EntitySlot<M> {
    worker_tx: Sender<WorkerMessage<M>>,
    status: EntityStatus,
    /// Messages received while passivating, FIFO, bounded by
    /// `tuning.buffer_size`.
    buffer: VecDeque<M>,
    /// Distinguishes successive worker instances for the same id, so stale
    /// acknowledgements and timers are ignored.
    epoch: u64,
    worker: AbortHandle,
    hand_off: Option<AbortHandle>,
}

/// The single-threaded owner of one shard's entity address space.
///
/// A controller is run as its own task and is the only writer of the
/// shard's state: it routes incoming messages to entity workers, records
/// lifecycle events with the [`PassivationManager`], applies the
/// passivation intents the manager returns, and mediates the two-phase stop
/// handshake with workers.
pub struct ShardController<F: EntityFactory> {
    shard_id: ShardId,
    factory: Arc<F>,
    manager: Arc<PassivationManager>,
    tuning: TuningSettings,
    strict: bool,
    entities: HashMap<EntityId, EntitySlot<MessageOf<F>>>,
    // Channel to receive messages from the host, the manager's sweep
    // fan-out, workers, and the controller's own watcher/timer tasks.
    rx: Receiver<ShardControllerMessage<MessageOf<F>>>,
    tx: Sender<ShardControllerMessage<MessageOf<F>>>,
    next_epoch: u64,
}

impl<F: EntityFactory> ShardController<F> {
    /// Creates a controller for `shard_id`.
    pub(crate) fn new(
        shard_id: ShardId,
        factory: Arc<F>,
        manager: Arc<PassivationManager>,
        tuning: TuningSettings,
        strict: bool,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded();

        Self {
            shard_id,
            factory,
            manager,
            tuning,
            strict,
            entities: HashMap::new(),
            rx,
            tx,
            next_epoch: 0,
        }
    }

    /// Creates a new handle to this controller.
    #[must_use]
    pub fn messenger(&self) -> ShardMessenger<MessageOf<F>> {
        ShardMessenger::new(self.tx.clone())
    }

    /// Runs the controller loop until shutdown.
    ///
    /// Each iteration dequeues exactly one message and acts on it:
    ///
    /// 1. traffic is routed to the target worker, activating it if absent
    ///    and recording the access with the manager first;
    /// 2. intents returned by the manager (or fanned out by the sweep
    ///    timer) start the stop handshake for their entities;
    /// 3. termination acknowledgements release the slot and re-route any
    ///    buffered messages, in arrival order;
    /// 4. hand-off deadlines force-terminate workers that failed to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shard`] if strict mode is enabled and a worker
    /// terminates outside the handshake protocol. The surrounding
    /// supervisor may restart the shard.
    pub async fn run(&mut self) -> Result<()> {
        info!("[ShardController {}] Running", self.shard_id);

        while let Some(msg) = self.rx.next().await {
            match msg {
                ShardControllerMessage::Deliver {
                    entity_id,
                    message,
                } => self.handle_deliver(entity_id, message),
                ShardControllerMessage::Passivate {
                    entity_id,
                    stop_message,
                } => self.begin_passivation(&entity_id, stop_message),
                ShardControllerMessage::Apply(intents) => self.apply_intents(intents),
                ShardControllerMessage::WorkerStopped {
                    entity_id,
                    epoch,
                } => self.handle_worker_stopped(&entity_id, epoch)?,
                ShardControllerMessage::HandOffExpired {
                    entity_id,
                    epoch,
                } => self.handle_hand_off_expired(&entity_id, epoch),
                ShardControllerMessage::GetState {
                    tx,
                } => {
                    drop(tx.send(self.current_state()));
                },
                ShardControllerMessage::GetStats {
                    tx,
                } => {
                    drop(tx.send(self.current_stats()));
                },
                ShardControllerMessage::Shutdown => break,
            }
        }

        self.shutdown_entities();
        info!("[ShardController {}] Stopping", self.shard_id);

        Ok(())
    }

    /// Routes one message: buffered if the target is passivating, otherwise
    /// recorded with the manager (activating the entity first if absent)
    /// and delivered after any returned intents are applied.
    fn handle_deliver(&mut self, entity_id: EntityId, message: MessageOf<F>) {
        match self.entities.get(&entity_id).map(|slot| slot.status) {
            Some(EntityStatus::Passivating) => self.buffer_message(&entity_id, message),
            Some(EntityStatus::Active) => {
                let intents =
                    self.manager.record_access(&self.shard_id, &entity_id, Instant::now());
                self.apply_intents(intents);
                self.route(&entity_id, message);
            },
            None => {
                self.activate(&entity_id);
                let intents =
                    self.manager.record_create(&self.shard_id, &entity_id, Instant::now());
                self.apply_intents(intents);
                self.route(&entity_id, message);
            },
        }
    }

    /// Spawns a fresh worker for `entity_id` plus the watcher task that
    /// will deliver its termination acknowledgement.
    fn activate(&mut self, entity_id: &EntityId) {
        debug!("[ShardController {}] Activating entity {}", self.shard_id, entity_id);

        let (worker_tx, worker_rx) = mpsc::unbounded();
        let entity = self.factory.create(&self.shard_id, entity_id);
        let ctx = EntityContext::new(
            self.shard_id.clone(),
            entity_id.clone(),
            ShardMessenger::new(self.tx.clone()),
        );

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let worker = spawn_named("shard::worker", run_worker(entity, ctx, worker_rx));
        let abort = worker.abort_handle();

        let ack_tx = self.tx.clone();
        let ack_shard = self.shard_id.clone();
        let ack_id = entity_id.clone();
        spawn_named("shard::worker_watch", async move {
            if let Err(why) = worker.await {
                if why.is_panic() {
                    warn!(
                        "[ShardController {ack_shard}] Worker for {ack_id} panicked; treating \
                         as a clean stop"
                    );
                }
            }

            drop(ack_tx.unbounded_send(ShardControllerMessage::WorkerStopped {
                entity_id: ack_id,
                epoch,
            }));
        });

        self.entities.insert(entity_id.clone(), EntitySlot {
            worker_tx,
            status: EntityStatus::Active,
            buffer: VecDeque::new(),
            epoch,
            worker: abort,
            hand_off: None,
        });
    }

    /// Applies intents in order, skipping entities that are no longer
    /// active. Skips are legal: a stale tracker entry may name an entity
    /// that requested its own passivation moments earlier.
    fn apply_intents(&mut self, intents: Vec<PassivateIntent>) {
        for intent in intents {
            if intent.shard_id != self.shard_id {
                warn!(
                    "[ShardController {}] Ignoring intent for foreign shard {}",
                    self.shard_id, intent.shard_id
                );
                continue;
            }

            self.begin_passivation(&intent.entity_id, None);
        }
    }

    /// Starts the stop handshake: sends the terminal signal, marks the slot
    /// passivating, and arms the hand-off timer.
    fn begin_passivation(&mut self, entity_id: &EntityId, stop_message: Option<MessageOf<F>>) {
        let hand_off_timeout = self.tuning.hand_off_timeout;
        let Some(slot) = self.entities.get_mut(entity_id) else {
            debug!(
                "[ShardController {}] Skipping passivation of unknown entity {}",
                self.shard_id, entity_id
            );
            return;
        };

        if slot.status == EntityStatus::Passivating {
            debug!(
                "[ShardController {}] Entity {} is already passivating",
                self.shard_id, entity_id
            );
            return;
        }

        debug!("[ShardController {}] Passivating entity {}", self.shard_id, entity_id);
        slot.status = EntityStatus::Passivating;

        if slot.worker_tx.unbounded_send(WorkerMessage::Stop(stop_message)).is_err() {
            // The worker already terminated; its watcher delivers the
            // acknowledgement regardless.
            trace!(
                "[ShardController {}] Worker for {} was gone before the stop signal",
                self.shard_id,
                entity_id
            );
        }

        let timer_tx = self.tx.clone();
        let timer_id = entity_id.clone();
        let epoch = slot.epoch;
        let timer = spawn_named("shard::hand_off", async move {
            sleep(hand_off_timeout).await;
            drop(timer_tx.unbounded_send(ShardControllerMessage::HandOffExpired {
                entity_id: timer_id,
                epoch,
            }));
        });
        slot.hand_off = Some(timer.abort_handle());
    }

    /// Completes the handshake for `entity_id`: records the stop, releases
    /// the slot, and re-routes any buffered messages in arrival order.
    fn handle_worker_stopped(&mut self, entity_id: &EntityId, epoch: u64) -> Result<()> {
        let status = match self.entities.get(entity_id) {
            Some(slot) if slot.epoch == epoch => slot.status,
            _ => {
                trace!(
                    "[ShardController {}] Stale stop acknowledgement for entity {}",
                    self.shard_id,
                    entity_id
                );
                return Ok(());
            },
        };

        if status == EntityStatus::Active {
            if self.strict {
                return Err(Error::Shard(ShardError::InvalidTransition {
                    shard_id: self.shard_id.clone(),
                    entity_id: entity_id.clone(),
                }));
            }

            warn!(
                "[ShardController {}] Worker for {} terminated while active; treating as \
                 stopped",
                self.shard_id, entity_id
            );
        }

        let Some(mut slot) = self.entities.remove(entity_id) else {
            return Ok(());
        };
        if let Some(timer) = slot.hand_off.take() {
            timer.abort();
        }

        self.manager.record_stop(&self.shard_id, entity_id);
        debug!("[ShardController {}] Entity {} stopped", self.shard_id, entity_id);

        let buffered = mem::take(&mut slot.buffer);
        if !buffered.is_empty() {
            debug!(
                "[ShardController {}] Re-routing {} buffered message(s) for {}",
                self.shard_id,
                buffered.len(),
                entity_id
            );
        }
        for message in buffered {
            self.handle_deliver(entity_id.clone(), message);
        }

        Ok(())
    }

    /// Force-terminates a worker that failed to stop within the hand-off
    /// deadline. The abort surfaces through the watcher as a normal
    /// termination acknowledgement.
    fn handle_hand_off_expired(&mut self, entity_id: &EntityId, epoch: u64) {
        let Some(slot) = self.entities.get_mut(entity_id) else {
            return;
        };
        if slot.epoch != epoch || slot.status != EntityStatus::Passivating {
            return;
        }

        warn!(
            "[ShardController {}] Hand-off timed out for entity {}; force-stopping",
            self.shard_id, entity_id
        );
        slot.hand_off = None;
        slot.worker.abort();
    }

    /// Delivers directly to an active worker, or parks the message in the
    /// entity's buffer.
    fn route(&mut self, entity_id: &EntityId, message: MessageOf<F>) {
        let Some(slot) = self.entities.get_mut(entity_id) else {
            warn!(
                "[ShardController {}] Dropping message for missing entity {}",
                self.shard_id, entity_id
            );
            return;
        };

        match slot.status {
            EntityStatus::Active => {
                if let Err(send_err) =
                    slot.worker_tx.unbounded_send(WorkerMessage::Deliver(message))
                {
                    // The worker terminated on its own; park the message so
                    // the pending acknowledgement re-routes it.
                    debug!(
                        "[ShardController {}] Worker for {} is gone; buffering until the stop \
                         acknowledgement",
                        self.shard_id, entity_id
                    );
                    if let WorkerMessage::Deliver(message) = send_err.into_inner() {
                        self.buffer_message(entity_id, message);
                    }
                }
            },
            EntityStatus::Passivating => self.buffer_message(entity_id, message),
        }
    }

    fn buffer_message(&mut self, entity_id: &EntityId, message: MessageOf<F>) {
        let cap = self.tuning.buffer_size;
        let Some(slot) = self.entities.get_mut(entity_id) else {
            warn!(
                "[ShardController {}] Dropping message for missing entity {}",
                self.shard_id, entity_id
            );
            return;
        };

        if slot.buffer.len() >= cap {
            slot.buffer.pop_front();
            warn!(
                "[ShardController {}] Buffer for passivating entity {} is full; dropping the \
                 oldest message",
                self.shard_id, entity_id
            );
        }

        slot.buffer.push_back(message);
    }

    fn current_state(&self) -> CurrentShardState {
        CurrentShardState {
            shard_id: self.shard_id.clone(),
            active_ids: self
                .entities
                .iter()
                .filter(|(_, slot)| slot.status == EntityStatus::Active)
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    fn current_stats(&self) -> ShardStats {
        ShardStats {
            shard_id: self.shard_id.clone(),
            entity_count: self
                .entities
                .values()
                .filter(|slot| slot.status == EntityStatus::Active)
                .count(),
        }
    }

    /// Stops every entity as part of shard deactivation: hand-off timers
    /// are cancelled, active workers get a stop signal, passivating workers
    /// are force-terminated.
    fn shutdown_entities(&mut self) {
        for (entity_id, mut slot) in self.entities.drain() {
            trace!("[ShardController] Stopping entity {entity_id}");
            if let Some(timer) = slot.hand_off.take() {
                timer.abort();
            }

            match slot.status {
                EntityStatus::Active => {
                    drop(slot.worker_tx.unbounded_send(WorkerMessage::Stop(None)));
                },
                EntityStatus::Passivating => slot.worker.abort(),
            }
        }
    }
}
