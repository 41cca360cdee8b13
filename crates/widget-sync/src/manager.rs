//! Model registry and view factory seam.
//!
//! The manager owns the id → model table that reference resolution goes
//! through, and knows how to build views. Models only hold a weak handle to
//! it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::error::Result;
use crate::model::SyncedModel;
use crate::view::View;

/// Registry and view factory used by models and codecs.
#[async_trait]
pub trait WidgetManager: Send + Sync {
    /// Look up a model by id.
    async fn get_model(&self, id: &widget_sync_comm::ModelId) -> Result<SyncedModel>;

    /// Build a view for `model`.
    async fn create_view(&self, model: &SyncedModel) -> Result<Arc<dyn View>>;

    /// Handle a `display` request for `model`. The payload is passed through.
    async fn display_model(&self, payload: &Map<String, JsonValue>, model: &SyncedModel)
        -> Result<()>;

    /// Forget a closed model.
    ///
    /// Only removes the registry entry if it still points at `model`; a
    /// newer model registered under the same id stays.
    fn unregister_model(&self, model: &SyncedModel);
}

/// In-memory manager.
pub mod memory {
    use super::*;

    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError, RwLock, Weak};

    use futures::future::BoxFuture;
    use widget_sync_comm::{Channel, ModelId};

    use crate::class::ModelClass;
    use crate::config::SyncConfig;
    use crate::error::WidgetError;
    use crate::value::State;
    use crate::view::{ready_view, spawn_view, ViewFuture};

    /// Builds a view for a model.
    pub type ViewFactory =
        Arc<dyn Fn(&SyncedModel) -> BoxFuture<'static, Result<Arc<dyn View>>> + Send + Sync>;

    /// A `display` request that was handled.
    #[derive(Debug, Clone)]
    pub struct DisplayRecord {
        pub model_id: ModelId,
        pub payload: Map<String, JsonValue>,
    }

    /// Manager keeping every model in a hash map.
    pub struct InMemoryManager {
        config: SyncConfig,
        weak_self: Weak<InMemoryManager>,
        models: RwLock<HashMap<ModelId, SyncedModel>>,
        view_factory: RwLock<Option<ViewFactory>>,
        displayed: Mutex<Vec<DisplayRecord>>,
    }

    impl InMemoryManager {
        /// Create an empty manager.
        pub fn new(config: SyncConfig) -> Arc<Self> {
            Arc::new_cyclic(|weak_self| Self {
                config,
                weak_self: weak_self.clone(),
                models: RwLock::new(HashMap::new()),
                view_factory: RwLock::new(None),
                displayed: Mutex::new(Vec::new()),
            })
        }

        pub fn config(&self) -> &SyncConfig {
            &self.config
        }

        /// Install the function used to build views.
        pub fn set_view_factory<F>(&self, factory: F)
        where
            F: Fn(&SyncedModel) -> BoxFuture<'static, Result<Arc<dyn View>>>
                + Send
                + Sync
                + 'static,
        {
            *self
                .view_factory
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(factory));
        }

        /// Create a model and register it under `id`.
        ///
        /// An existing model with the same id is replaced in the registry.
        pub fn create_model(
            &self,
            class: &'static ModelClass,
            id: ModelId,
            channel: Option<Arc<dyn Channel>>,
            initial: State,
        ) -> SyncedModel {
            let manager: Weak<dyn WidgetManager> = self.weak_self.clone();
            let model = SyncedModel::new(
                id.clone(),
                class,
                self.config.clone(),
                manager,
                channel,
                initial,
            );

            let previous = self
                .models
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, model.clone());
            if let Some(previous) = previous {
                tracing::warn!(model_id = %previous.id(), "replacing registered model");
            }
            model
        }

        /// Create a model under a fresh random id and register it.
        pub fn new_model(
            &self,
            class: &'static ModelClass,
            channel: Option<Arc<dyn Channel>>,
            initial: State,
        ) -> SyncedModel {
            self.create_model(class, ModelId::random(), channel, initial)
        }

        /// Registered model by id, without waiting.
        pub fn model(&self, id: &ModelId) -> Option<SyncedModel> {
            self.models
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned()
        }

        pub fn model_count(&self) -> usize {
            self.models
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// Every `display` request handled so far.
        pub fn displayed(&self) -> Vec<DisplayRecord> {
            self.displayed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Start building a view for `model` and bind it to the model.
        pub fn create_child_view(&self, model: &SyncedModel) -> ViewFuture {
            let factory = self.factory();
            let target = model.clone();
            let view = spawn_view(async move { build_view(factory, &target).await });
            model.bind_view(view.clone());
            view
        }

        /// Close every registered model.
        pub async fn clear_state(&self) {
            let models: Vec<SyncedModel> = self
                .models
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for model in models {
                model.close(false).await;
            }
        }

        fn factory(&self) -> Option<ViewFactory> {
            self.view_factory
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    async fn build_view(
        factory: Option<ViewFactory>,
        model: &SyncedModel,
    ) -> Result<Arc<dyn View>> {
        match factory {
            Some(factory) => factory(model).await,
            None => Err(WidgetError::ViewCreation {
                model: model.id().clone(),
                reason: "no view factory installed".into(),
            }),
        }
    }

    #[async_trait]
    impl WidgetManager for InMemoryManager {
        async fn get_model(&self, id: &ModelId) -> Result<SyncedModel> {
            self.model(id)
                .ok_or_else(|| WidgetError::ModelNotFound(id.clone()))
        }

        async fn create_view(&self, model: &SyncedModel) -> Result<Arc<dyn View>> {
            build_view(self.factory(), model).await
        }

        async fn display_model(
            &self,
            payload: &Map<String, JsonValue>,
            model: &SyncedModel,
        ) -> Result<()> {
            if model.is_closed() {
                return Err(WidgetError::Closed(model.id().clone()));
            }
            if self.factory().is_some() {
                let view = self.create_view(model).await?;
                model.bind_view(ready_view(view));
            }
            self.displayed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DisplayRecord {
                    model_id: model.id().clone(),
                    payload: payload.clone(),
                });
            Ok(())
        }

        fn unregister_model(&self, model: &SyncedModel) {
            let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
            match models.get(model.id()) {
                Some(registered) if registered.ptr_eq(model) => {
                    models.remove(model.id());
                }
                Some(_) => {
                    tracing::debug!(model_id = %model.id(), "id reassigned, registry entry kept");
                }
                None => {
                    tracing::debug!(model_id = %model.id(), "unregister of unknown model");
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::class::WIDGET_MODEL;
        use futures::FutureExt;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingView(Arc<AtomicUsize>);

        impl View for CountingView {
            fn remove(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[tokio::test]
        async fn test_register_lookup_unregister() {
            let manager = InMemoryManager::new(SyncConfig::default());
            let model = manager.create_model(&WIDGET_MODEL, ModelId::new("a"), None, State::new());

            let found = manager.get_model(&ModelId::new("a")).await.unwrap();
            assert!(found.ptr_eq(&model));
            assert_eq!(manager.model_count(), 1);

            manager.unregister_model(&model);
            assert!(matches!(
                manager.get_model(&ModelId::new("a")).await,
                Err(WidgetError::ModelNotFound(_))
            ));
        }

        #[tokio::test]
        async fn test_closing_replaced_model_keeps_replacement() {
            let manager = InMemoryManager::new(SyncConfig::default());
            let first = manager.create_model(&WIDGET_MODEL, ModelId::new("x"), None, State::new());
            let second = manager.create_model(&WIDGET_MODEL, ModelId::new("x"), None, State::new());

            first.close(false).await;

            let registered = manager.model(&ModelId::new("x")).unwrap();
            assert!(registered.ptr_eq(&second));
            assert_eq!(manager.model_count(), 1);

            second.close(false).await;
            assert_eq!(manager.model_count(), 0);
        }

        #[tokio::test]
        async fn test_new_model_gets_distinct_random_ids() {
            let manager = InMemoryManager::new(SyncConfig::default());
            let a = manager.new_model(&WIDGET_MODEL, None, State::new());
            let b = manager.new_model(&WIDGET_MODEL, None, State::new());

            assert_ne!(a.id(), b.id());
            assert_eq!(manager.model_count(), 2);
            let found = manager.get_model(a.id()).await.unwrap();
            assert!(found.ptr_eq(&a));
            assert_eq!(ModelId::from_reference(&a.to_reference()).as_ref(), Some(a.id()));
        }

        #[tokio::test]
        async fn test_child_view_without_factory_resolves_to_none() {
            let manager = InMemoryManager::new(SyncConfig::default());
            let model = manager.create_model(&WIDGET_MODEL, ModelId::new("a"), None, State::new());

            let view = manager.create_child_view(&model);
            assert!(view.await.is_none());
            assert_eq!(model.view_count(), 1);
        }

        #[tokio::test]
        async fn test_display_binds_view_and_records() {
            let manager = InMemoryManager::new(SyncConfig::default());
            let removed = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&removed);
            manager.set_view_factory(move |_| {
                let view: Arc<dyn View> = Arc::new(CountingView(Arc::clone(&counter)));
                async move { Ok(view) }.boxed()
            });
            let model = manager.create_model(&WIDGET_MODEL, ModelId::new("a"), None, State::new());

            let mut payload = Map::new();
            payload.insert("target".into(), JsonValue::from("output"));
            manager.display_model(&payload, &model).await.unwrap();

            assert_eq!(model.view_count(), 1);
            let displayed = manager.displayed();
            assert_eq!(displayed.len(), 1);
            assert_eq!(displayed[0].model_id, ModelId::new("a"));

            manager.clear_state().await;
            assert_eq!(manager.model_count(), 0);
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            assert_eq!(removed.load(Ordering::SeqCst), 1);
            assert!(manager.display_model(&payload, &model).await.is_err());
        }
    }
}
