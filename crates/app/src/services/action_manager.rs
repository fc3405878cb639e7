//! Action manager — timed device operations with a persisted lifecycle.
//!
//! An action is written to the device's `activeActions` at every transition
//! (`PENDING`, `IN_PROGRESS`, then `COMPLETED` or `FAILED`). Live timers are
//! tracked by device and [`ActionId`]; both the timer and
//! [`ActionManager::cancel_action`] first remove the entry from the map, so
//! exactly one of them finishes the action.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use homesim_domain::action::{Action, CANCELLED_MESSAGE};
use homesim_domain::error::{HomeSimError, NotFoundError, ValidationError};
use homesim_domain::id::{ActionId, DeviceId};
use homesim_domain::time::{Timestamp, now};
use tokio::task::JoinHandle;

use crate::ports::{DocumentStore, WebhookNotifier};
use crate::services::RegistryService;

/// Error a hook may fail with; its message chain is recorded on the action.
pub type HookError = Box<dyn Error + Send + Sync>;

type HookFuture = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send>>;
type Hook = Box<dyn FnOnce() -> HookFuture + Send>;

/// Optional callbacks run when an action starts and when its timer expires.
#[derive(Default)]
pub struct ActionHooks {
    on_start: Option<Hook>,
    on_complete: Option<Hook>,
}

impl ActionHooks {
    /// Run `hook` between `PENDING` and `IN_PROGRESS`; a failure fails the
    /// action immediately and no timer is armed.
    #[must_use]
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move || Box::pin(hook())));
        self
    }

    /// Run `hook` when the timer expires; a failure fails the action.
    #[must_use]
    pub fn on_complete<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.on_complete = Some(Box::new(move || Box::pin(hook())));
        self
    }
}

/// Render an error and its sources as `outer: inner: root`.
fn describe(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains('/') {
        return Err(ValidationError::InvalidActionName(name.to_string()));
    }
    Ok(())
}

struct RunningAction {
    action: Action,
    handle: JoinHandle<()>,
}

/// Action ids are only unique within one device.
type TimerKey = (DeviceId, ActionId);

#[derive(Default)]
struct Timers {
    armed: HashMap<TimerKey, RunningAction>,
    /// Ids handed out to actions that are still starting.
    claimed: HashSet<TimerKey>,
}

impl Timers {
    fn is_taken(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key) || self.claimed.contains(key)
    }
}

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reservation of an action id while its action starts; released on drop.
struct Claim {
    timers: Arc<Mutex<Timers>>,
    key: TimerKey,
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.timers).claimed.remove(&self.key);
    }
}

/// Starts, tracks and cancels timed actions.
pub struct ActionManager<S, N> {
    registry: Arc<RegistryService<S, N>>,
    timers: Arc<Mutex<Timers>>,
}

impl<S, N> ActionManager<S, N>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    pub fn new(registry: Arc<RegistryService<S, N>>) -> Self {
        Self {
            registry,
            timers: Arc::new(Mutex::new(Timers::default())),
        }
    }

    /// Reserve `<name>_<millis>` for a new action of `device_id`.
    ///
    /// When that id is already live or in the device's history, the next
    /// free millisecond is used instead.
    fn claim_id(
        &self,
        device_id: DeviceId,
        name: &str,
        started_at: Timestamp,
        history: &BTreeMap<ActionId, Action>,
    ) -> Claim {
        let mut timers = lock(&self.timers);
        let mut at = started_at;
        let key = loop {
            let key = (device_id, ActionId::generate(name, at));
            if !history.contains_key(&key.1) && !timers.is_taken(&key) {
                break key;
            }
            at += chrono::TimeDelta::milliseconds(1);
        };
        timers.claimed.insert(key.clone());
        Claim {
            timers: Arc::clone(&self.timers),
            key,
        }
    }

    async fn record(
        &self,
        device_id: DeviceId,
        action_id: &ActionId,
        action: &Action,
    ) -> Result<(), HomeSimError> {
        if self
            .registry
            .record_action(device_id, action_id, action)
            .await?
        {
            Ok(())
        } else {
            Err(NotFoundError {
                entity: "Device",
                id: device_id.to_string(),
            }
            .into())
        }
    }

    /// Start an action on a device and arm its completion timer.
    ///
    /// The action is persisted as `PENDING`, `on_start` runs, then it is
    /// persisted as `IN_PROGRESS` and completes after `duration`. When
    /// `on_start` fails the action is persisted as `FAILED` and returned as
    /// such.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::NotFound`] for an unknown device,
    /// [`HomeSimError::Validation`] for an empty name or one containing `/`,
    /// or a storage error from the registry.
    #[tracing::instrument(skip(self, hooks))]
    pub async fn start_action(
        &self,
        device_id: DeviceId,
        name: &str,
        duration: Duration,
        hooks: ActionHooks,
    ) -> Result<(ActionId, Action), HomeSimError> {
        validate_name(name)?;
        let device = self
            .registry
            .get_device(device_id)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Device",
                id: device_id.to_string(),
            })?;
        let started_at = now();
        let claim = self.claim_id(device_id, name, started_at, &device.active_actions);
        let action_id = claim.key.1.clone();
        let mut action = Action::pending(name, started_at);
        self.record(device_id, &action_id, &action).await?;

        let ActionHooks {
            on_start,
            on_complete,
        } = hooks;
        if let Some(hook) = on_start
            && let Err(err) = hook().await
        {
            let message = describe(err.as_ref());
            tracing::warn!(%action_id, error = %message, "action failed to start");
            action.fail(now(), message)?;
            self.record(device_id, &action_id, &action).await?;
            return Ok((action_id, action));
        }

        action.start()?;
        self.record(device_id, &action_id, &action).await?;
        self.arm_timer(device_id, action_id.clone(), action.clone(), duration, on_complete);
        drop(claim);
        tracing::info!(%action_id, ?duration, "action started");
        Ok((action_id, action))
    }

    fn arm_timer(
        &self,
        device_id: DeviceId,
        action_id: ActionId,
        action: Action,
        duration: Duration,
        on_complete: Option<Hook>,
    ) {
        let registry = Arc::clone(&self.registry);
        let timers = Arc::clone(&self.timers);
        let key = (device_id, action_id);
        let task_key = key.clone();

        // The map stays locked until the handle is inserted, so an
        // immediately-expiring timer still finds its own entry.
        let mut guard = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let entry = lock(&timers).armed.remove(&task_key);
            let Some(entry) = entry else {
                return;
            };
            let (device_id, action_id) = task_key;
            finish(&registry, device_id, &action_id, entry.action, on_complete).await;
        });
        guard.armed.insert(key, RunningAction { action, handle });
    }

    /// Cancel a live action of `device_id`, persisting it as `FAILED` with
    /// the message `"Action cancelled"`.
    ///
    /// Returns `false` when no live timer exists for that action on that
    /// device (unknown, already finished, or only live on another device).
    ///
    /// # Errors
    ///
    /// Returns a storage error from the registry.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_action(
        &self,
        device_id: DeviceId,
        action_id: &ActionId,
    ) -> Result<bool, HomeSimError> {
        let entry = lock(&self.timers)
            .armed
            .remove(&(device_id, action_id.clone()));
        let Some(RunningAction { mut action, handle }) = entry
        else {
            return Ok(false);
        };
        handle.abort();

        action.fail(now(), CANCELLED_MESSAGE)?;
        if !self
            .registry
            .record_action(device_id, action_id, &action)
            .await?
        {
            tracing::warn!("cancelled action of a deleted device");
        }
        tracing::info!("action cancelled");
        Ok(true)
    }

    /// Ids of every action whose timer is still armed, sorted. The same id
    /// appears once per device it is live on.
    #[must_use]
    pub fn get_running_actions(&self) -> Vec<ActionId> {
        let mut ids: Vec<ActionId> = lock(&self.timers)
            .armed
            .keys()
            .map(|(_, action_id)| action_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Start one of the built-in actions of the device's type.
    ///
    /// On completion the action's target state is written through
    /// [`RegistryService::update_device_state`], so subscribers are notified.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::NotFound`] for an unknown device,
    /// [`HomeSimError::Validation`] when the type has no such action, or a
    /// storage error from the registry.
    pub async fn start_device_action(
        &self,
        device_id: DeviceId,
        name: &str,
    ) -> Result<(ActionId, Action), HomeSimError> {
        let device = self
            .registry
            .get_device(device_id)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Device",
                id: device_id.to_string(),
            })?;
        let builtin = device.device_type().action(name)?;

        let registry = Arc::clone(&self.registry);
        let hooks = ActionHooks::default().on_complete(move || async move {
            registry
                .update_device_state(device_id, builtin.completion_state())
                .await?
                .ok_or_else(|| NotFoundError {
                    entity: "Device",
                    id: device_id.to_string(),
                })?;
            Ok::<(), HookError>(())
        });
        self.start_action(device_id, builtin.name(), builtin.duration(), hooks)
            .await
    }

    /// Abort every armed timer. Their actions stay as last persisted.
    pub fn shutdown(&self) {
        let drained: Vec<RunningAction> = lock(&self.timers)
            .armed
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.handle.abort();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "aborted running actions");
        }
    }
}

async fn finish<S, N>(
    registry: &RegistryService<S, N>,
    device_id: DeviceId,
    action_id: &ActionId,
    mut action: Action,
    on_complete: Option<Hook>,
) where
    S: DocumentStore,
    N: WebhookNotifier + 'static,
{
    let outcome = match on_complete {
        Some(hook) => hook().await,
        None => Ok(()),
    };
    let transition = match outcome {
        Ok(()) => action.complete(now()),
        Err(err) => {
            let message = describe(err.as_ref());
            tracing::warn!(%action_id, error = %message, "action completion hook failed");
            action.fail(now(), message)
        }
    };
    if let Err(err) = transition {
        tracing::error!(%action_id, error = %err, "action finished in an impossible state");
        return;
    }

    match registry.record_action(device_id, action_id, &action).await {
        Ok(true) => tracing::info!(%action_id, status = %action.status, "action finished"),
        Ok(false) => tracing::warn!(%action_id, %device_id, "action finished on a deleted device"),
        Err(err) => tracing::error!(%action_id, error = %err, "failed to persist finished action"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_tree::InMemoryDocumentStore;
    use homesim_domain::action::ActionStatus;
    use homesim_domain::api_key::ApiKey;
    use homesim_domain::capability::DeviceType;
    use homesim_domain::device::{Device, DeviceState, NewDevice};
    use serde_json::{Map, Value};

    struct SilentNotifier;

    impl WebhookNotifier for SilentNotifier {
        fn notify(
            &self,
            _api_key: &ApiKey,
            _device: &Device,
            _previous: &Map<String, Value>,
            _new: &Map<String, Value>,
        ) -> impl Future<Output = bool> + Send {
            async { true }
        }
    }

    type TestRegistry = RegistryService<InMemoryDocumentStore, SilentNotifier>;

    fn manager() -> (ActionManager<InMemoryDocumentStore, SilentNotifier>, Arc<TestRegistry>) {
        let registry = Arc::new(RegistryService::new(
            InMemoryDocumentStore::new(),
            SilentNotifier,
        ));
        (ActionManager::new(Arc::clone(&registry)), registry)
    }

    async fn curtain(registry: &TestRegistry) -> DeviceId {
        registry
            .create_device(NewDevice::new(
                "Bay window",
                DeviceState::initial(DeviceType::Curtain),
            ))
            .await
            .unwrap()
            .id
    }

    async fn stored_action(registry: &TestRegistry, device_id: DeviceId, action_id: &ActionId) -> Action {
        let device = registry.get_device(device_id).await.unwrap().unwrap();
        device.active_actions[action_id].clone()
    }

    fn failing_hook() -> impl Future<Output = Result<(), HookError>> + Send + 'static {
        async { Err(HookError::from("motor jammed")) }
    }

    #[tokio::test(start_paused = true)]
    async fn should_persist_in_progress_after_start() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (action_id, action) = manager
            .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
            .await
            .unwrap();

        assert_eq!(action.status, ActionStatus::InProgress);
        assert!(action_id.as_str().starts_with("open_"));
        assert_eq!(
            stored_action(&registry, device_id, &action_id).await.status,
            ActionStatus::InProgress
        );
        assert_eq!(manager.get_running_actions(), vec![action_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_complete_when_timer_expires() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (action_id, _) = manager
            .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let action = stored_action(&registry, device_id, &action_id).await;
        assert_eq!(action.status, ActionStatus::Completed);
        assert!(action.completed_at.is_some());
        assert!(action.error.is_none());
        assert!(manager.get_running_actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_with_hook_error_on_completion() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let hooks = ActionHooks::default().on_complete(failing_hook);
        let (action_id, _) = manager
            .start_action(device_id, "open", Duration::from_secs(1), hooks)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let action = stored_action(&registry, device_id, &action_id).await;
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.error.as_deref(), Some("motor jammed"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_without_timer_when_start_hook_fails() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let hooks = ActionHooks::default().on_start(failing_hook);
        let (action_id, action) = manager
            .start_action(device_id, "open", Duration::from_secs(1), hooks)
            .await
            .unwrap();

        assert_eq!(action.status, ActionStatus::Failed);
        assert!(manager.get_running_actions().is_empty());
        let stored = stored_action(&registry, device_id, &action_id).await;
        assert_eq!(stored.status, ActionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("motor jammed"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_unknown_device() {
        let (manager, _) = manager();
        let result = manager
            .start_action(DeviceId::new(), "open", Duration::from_secs(1), ActionHooks::default())
            .await;
        assert!(matches!(result, Err(HomeSimError::NotFound(_))));
        assert!(manager.get_running_actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_name_with_path_separator() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;
        let result = manager
            .start_action(device_id, "open/now", Duration::from_secs(1), ActionHooks::default())
            .await;
        assert!(matches!(
            result,
            Err(HomeSimError::Validation(ValidationError::InvalidActionName(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_live_action_and_skip_completion() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (action_id, _) = manager
            .start_device_action(device_id, "open")
            .await
            .unwrap();
        assert!(manager.cancel_action(device_id, &action_id).await.unwrap());
        tokio::time::sleep(Duration::from_secs(10)).await;

        let device = registry.get_device(device_id).await.unwrap().unwrap();
        let action = &device.active_actions[&action_id];
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(device.state, DeviceState::Curtain { position: 0 });
        assert!(manager.get_running_actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_cancel_twice_or_after_completion() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (cancelled, _) = manager
            .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
            .await
            .unwrap();
        assert!(manager.cancel_action(device_id, &cancelled).await.unwrap());
        assert!(!manager.cancel_action(device_id, &cancelled).await.unwrap());

        let (completed, _) = manager
            .start_action(device_id, "close", Duration::from_secs(1), ActionHooks::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!manager.cancel_action(device_id, &completed).await.unwrap());
        assert_eq!(
            stored_action(&registry, device_id, &completed).await.status,
            ActionStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_cancel_action_of_another_device() {
        let (manager, registry) = manager();
        let owner = curtain(&registry).await;
        let other = curtain(&registry).await;

        let (action_id, _) = manager
            .start_action(owner, "open", Duration::from_secs(5), ActionHooks::default())
            .await
            .unwrap();
        assert!(!manager.cancel_action(other, &action_id).await.unwrap());
        assert_eq!(manager.get_running_actions(), vec![action_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_track_same_action_id_separately_per_device() {
        let (manager, registry) = manager();
        let first = curtain(&registry).await;
        let second = curtain(&registry).await;

        let mut started = Vec::new();
        for device_id in [first, second] {
            let (action_id, _) = manager
                .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
                .await
                .unwrap();
            started.push(action_id);
        }
        assert_eq!(manager.get_running_actions().len(), 2);

        assert!(manager.cancel_action(first, &started[0]).await.unwrap());
        assert_eq!(manager.get_running_actions(), vec![started[1].clone()]);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let cancelled = stored_action(&registry, first, &started[0]).await;
        assert_eq!(cancelled.status, ActionStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(
            stored_action(&registry, second, &started[1]).await.status,
            ActionStatus::Completed
        );
        assert!(manager.get_running_actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_each_action_of_one_device_its_own_id() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (action_id, _) = manager
                .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
                .await
                .unwrap();
            ids.push(action_id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert_eq!(manager.get_running_actions(), ids);

        for action_id in &ids {
            assert!(manager.cancel_action(device_id, action_id).await.unwrap());
        }
        let device = registry.get_device(device_id).await.unwrap().unwrap();
        assert_eq!(device.active_actions.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_move_curtain_when_builtin_action_completes() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (action_id, action) = manager
            .start_device_action(device_id, "open")
            .await
            .unwrap();
        assert_eq!(action.name, "open");
        tokio::time::sleep(Duration::from_secs(6)).await;

        let device = registry.get_device(device_id).await.unwrap().unwrap();
        assert_eq!(device.state, DeviceState::Curtain { position: 100 });
        assert_eq!(
            device.active_actions[&action_id].status,
            ActionStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_builtin_action_unsupported_by_type() {
        let (manager, registry) = manager();
        let device_id = registry
            .create_device(NewDevice::new(
                "Hall",
                DeviceState::initial(DeviceType::BulbOnOff),
            ))
            .await
            .unwrap()
            .id;

        let result = manager.start_device_action(device_id, "open").await;
        assert!(matches!(
            result,
            Err(HomeSimError::Validation(ValidationError::UnsupportedAction { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_history_of_finished_actions() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        manager.start_device_action(device_id, "open").await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        manager.start_device_action(device_id, "close").await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let device = registry.get_device(device_id).await.unwrap().unwrap();
        assert_eq!(device.active_actions.len(), 2);
        assert!(
            device
                .active_actions
                .values()
                .all(|action| action.status == ActionStatus::Completed)
        );
        assert_eq!(device.state, DeviceState::Curtain { position: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn should_abort_every_timer_on_shutdown() {
        let (manager, registry) = manager();
        let device_id = curtain(&registry).await;

        let (action_id, _) = manager
            .start_action(device_id, "open", Duration::from_secs(5), ActionHooks::default())
            .await
            .unwrap();
        manager.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(manager.get_running_actions().is_empty());
        assert_eq!(
            stored_action(&registry, device_id, &action_id).await.status,
            ActionStatus::InProgress
        );
    }

    #[test]
    fn should_describe_error_with_its_sources() {
        let err: HomeSimError = ValidationError::EmptyName.into();
        assert_eq!(describe(&err), "validation error: name must not be empty");
    }
}
