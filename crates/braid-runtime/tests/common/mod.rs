#![allow(dead_code)] // each integration binary uses a subset
//! Shared fixtures for the integration suites.

use async_trait::async_trait;
use braid_component::{
    Component, ComponentContext, ComponentError, ComponentFactory, ComponentInfo,
};
use braid_event::Message;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Records every value a flow delivers to it; terminal stage.
struct Recorder {
    info: ComponentInfo,
    values: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Component for Recorder {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        self.values.lock().push(data);
        Ok(None)
    }
}

/// A `recorder` component factory plus the buffer it fills.
pub fn recorder() -> (ComponentFactory, Arc<Mutex<Vec<Value>>>) {
    let values: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = values.clone();
    let factory: ComponentFactory = Arc::new(move |_ctx| {
        Ok(Box::new(Recorder {
            info: ComponentInfo::new("recorder", "Records received values"),
            values: captured.clone(),
        }) as Box<dyn Component>)
    });
    (factory, values)
}

/// Prefixes its (string) input per the `prefix` config key.
struct Prefixer {
    info: ComponentInfo,
}

#[async_trait]
impl Component for Prefixer {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        let prefix = ctx.get_config_str("prefix")?.unwrap_or_default();
        let text = data.as_str().unwrap_or_default();
        Ok(Some(serde_json::json!({
            "processed_text": format!("{prefix}{text}")
        })))
    }
}

/// A `prefixer` component factory.
pub fn prefixer() -> ComponentFactory {
    Arc::new(|_ctx| {
        Ok(Box::new(Prefixer {
            info: ComponentInfo::new("prefixer", "Prefixes text input"),
        }) as Box<dyn Component>)
    })
}

/// Fails every invoke with the configured reason.
struct AlwaysFails {
    info: ComponentInfo,
}

#[async_trait]
impl Component for AlwaysFails {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        _message: &mut Message,
        _data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Err(ComponentError::Invoke("deliberate test failure".to_string()))
    }
}

/// An `always_fails` component factory.
pub fn always_fails() -> ComponentFactory {
    Arc::new(|_ctx| {
        Ok(Box::new(AlwaysFails {
            info: ComponentInfo::new("always_fails", "Fails every invoke"),
        }) as Box<dyn Component>)
    })
}

/// Discards every message.
struct DiscardAll {
    info: ComponentInfo,
}

#[async_trait]
impl Component for DiscardAll {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        message.discard();
        Ok(Some(data))
    }
}

/// A `discard_all` component factory.
pub fn discard_all() -> ComponentFactory {
    Arc::new(|_ctx| {
        Ok(Box::new(DiscardAll {
            info: ComponentInfo::new("discard_all", "Discards every message"),
        }) as Box<dyn Component>)
    })
}

/// Sleeps `delay_ms` per message, then records it.
struct SlowRecorder {
    info: ComponentInfo,
    values: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Component for SlowRecorder {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        let delay = ctx.get_config_u64("delay_ms")?.unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.values.lock().push(data);
        Ok(None)
    }
}

/// A `slow_recorder` component factory plus its buffer.
pub fn slow_recorder() -> (ComponentFactory, Arc<Mutex<Vec<Value>>>) {
    let values: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = values.clone();
    let factory: ComponentFactory = Arc::new(move |_ctx| {
        Ok(Box::new(SlowRecorder {
            info: ComponentInfo::new("slow_recorder", "Records slowly"),
            values: captured.clone(),
        }) as Box<dyn Component>)
    });
    (factory, values)
}

/// Polls until `check` passes or two seconds elapse.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within deadline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
