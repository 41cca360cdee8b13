//! Keeping a list of child views in step with a list of child models.
//!
//! [`ViewList`] compares the new model list with the current one, keeps the
//! views for the longest common prefix (compared by identity), tears down the
//! views of the old suffix and starts creating views for the new suffix.
//!
//! ```text
//! old:  A B C      views: vA vB vC
//! new:  A B D E
//!       └─┘ prefix kept
//!           C      removed once vC resolves
//!           D E    created, appended
//! result views:   vA vB vD vE
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::model::SyncedModel;
use crate::view::{spawn_view, ViewFuture};

/// Identity comparison used to find the shared prefix.
pub trait SameIdentity {
    fn same_identity(&self, other: &Self) -> bool;
}

impl SameIdentity for SyncedModel {
    fn same_identity(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> SameIdentity for Arc<T> {
    fn same_identity(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

/// Builds a view for a model.
pub type CreateView<M, V> = Arc<dyn Fn(&M) -> BoxFuture<'static, Result<V>> + Send + Sync>;

/// Tears a view down.
pub type RemoveView<V> = Arc<dyn Fn(V) + Send + Sync>;

/// An ordered list of views mirroring an ordered list of models.
pub struct ViewList<M, V> {
    models: Vec<M>,
    views: Vec<ViewFuture<V>>,
    create: CreateView<M, V>,
    remove: RemoveView<V>,
}

impl<M, V> ViewList<M, V>
where
    M: SameIdentity + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<C, R>(create: C, remove: R) -> Self
    where
        C: Fn(&M) -> BoxFuture<'static, Result<V>> + Send + Sync + 'static,
        R: Fn(V) + Send + Sync + 'static,
    {
        Self {
            models: Vec::new(),
            views: Vec::new(),
            create: Arc::new(create),
            remove: Arc::new(remove),
        }
    }

    /// Reconcile with `new_models`.
    ///
    /// Views past the shared prefix are removed in their original order as
    /// each one finishes creation; the returned handle completes once all of
    /// them have been removed. Views for the new suffix start creating
    /// immediately.
    pub fn update(&mut self, new_models: &[M]) -> JoinHandle<()> {
        let keep = self
            .models
            .iter()
            .zip(new_models)
            .take_while(|(old, new)| old.same_identity(new))
            .count();

        let stale: FuturesOrdered<ViewFuture<V>> = self.views.split_off(keep).into_iter().collect();
        self.models.truncate(keep);

        let remove = Arc::clone(&self.remove);
        let removals = tokio::spawn(async move {
            let mut stale = stale;
            while let Some(view) = stale.next().await {
                if let Some(view) = view {
                    remove(view);
                }
            }
        });

        for model in &new_models[keep..] {
            let creation = (self.create)(model);
            self.views.push(spawn_view(creation));
            self.models.push(model.clone());
        }

        removals
    }

    /// Remove every view, in order, and empty the list.
    ///
    /// Each view is removed as soon as it and every view before it have
    /// resolved.
    pub async fn remove(&mut self) {
        let mut pending: FuturesOrdered<ViewFuture<V>> = self.views.drain(..).collect();
        self.models.clear();
        while let Some(view) = pending.next().await {
            if let Some(view) = view {
                (self.remove)(view);
            }
        }
    }

    /// View futures, index-aligned with [`models`](Self::models).
    pub fn views(&self) -> &[ViewFuture<V>] {
        &self.views
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
