//! Views bound to models.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::Result;

/// A rendered view of a model.
///
/// Views read model state, react to model events and mutate the model only
/// through its public API. Rendering itself lives outside this crate.
pub trait View: Send + Sync {
    /// Detach the view and release what it holds.
    fn remove(&self);
}

/// A view that may still be under construction.
///
/// Resolves to `None` if creation failed. Cloning shares the same future.
pub type ViewFuture<V = Arc<dyn View>> = Shared<BoxFuture<'static, Option<V>>>;

/// Start creating a view now and return a shared handle to the result.
///
/// Creation runs eagerly on the runtime whether or not anyone awaits the
/// handle. A failure is reported and resolves the handle to `None`.
pub fn spawn_view<V, F>(creation: F) -> ViewFuture<V>
where
    V: Clone + Send + Sync + 'static,
    F: Future<Output = Result<V>> + Send + 'static,
{
    let handle = tokio::spawn(creation);
    async move {
        match handle.await {
            Ok(Ok(view)) => Some(view),
            Ok(Err(e)) => {
                tracing::warn!("Couldn't create child view: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("View creation task failed: {}", e);
                None
            }
        }
    }
    .boxed()
    .shared()
}

/// A view future that is already resolved.
pub fn ready_view<V>(view: V) -> ViewFuture<V>
where
    V: Clone + Send + Sync + 'static,
{
    futures::future::ready(Some(view)).boxed().shared()
}
