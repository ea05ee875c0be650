//! Config change listener trait and a closure-based adapter.

use async_trait::async_trait;

use crate::model::ConfigChangedEvent;

/// Receives notifications when a subscribed config's content changes.
#[async_trait]
pub trait ConfigChangeListener: Send + Sync + 'static {
    async fn on_change(&self, event: ConfigChangedEvent);
}

/// Adapts a closure into a `ConfigChangeListener`, for callers who don't want
/// to name a type.
pub struct FnConfigChangeListener<F> {
    f: F,
}

impl<F> FnConfigChangeListener<F>
where
    F: Fn(ConfigChangedEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ConfigChangeListener for FnConfigChangeListener<F>
where
    F: Fn(ConfigChangedEvent) + Send + Sync + 'static,
{
    async fn on_change(&self, event: ConfigChangedEvent) {
        (self.f)(event);
    }
}
