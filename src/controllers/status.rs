//! Persists computed status and reports it as a Kubernetes Event.

use std::fmt::Debug;

use kube::api::{Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::api::condition::{ConditionStatus, Transition};

/// Ready condition that was just computed for an object.
pub struct ReadyChange<'a> {
    pub status: ConditionStatus,
    pub reason: &'a str,
    pub message: &'a str,
    pub transition: Transition,
}

pub fn event_type(status: ConditionStatus) -> EventType {
    match status {
        ConditionStatus::True => EventType::Normal,
        ConditionStatus::False | ConditionStatus::Unknown => EventType::Warning,
    }
}

#[derive(Clone)]
pub struct StatusWriter {
    client: Client,
    field_manager: String,
}

impl StatusWriter {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Replaces the object's status in one merge patch, then publishes an
    /// event for the Ready condition. Event failures are logged only.
    pub async fn write<K, S>(
        &self,
        api: &Api<K>,
        object: &K,
        status: &S,
        ready: ReadyChange<'_>,
    ) -> Result<(), crate::error::Error>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
        S: Serialize,
    {
        let name = object.name_any();
        let patch = serde_json::json!({ "status": serde_json::to_value(status)? });
        api.patch_status(
            &name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&patch),
        )
        .await?;

        if ready.transition.is_transition() {
            info!(
                "[status] {} {}: Ready={} ({}) {}",
                K::kind(&()),
                display_name(object),
                ready.status,
                ready.reason,
                ready.message
            );
        }
        self.publish_event(object, &ready).await;
        Ok(())
    }

    async fn publish_event<K>(&self, object: &K, ready: &ReadyChange<'_>)
    where
        K: Resource<DynamicType = ()>,
    {
        let reporter = Reporter {
            controller: self.field_manager.clone(),
            instance: None,
        };
        let recorder = Recorder::new(self.client.clone(), reporter, object.object_ref(&()));
        let event = Event {
            type_: event_type(ready.status),
            reason: ready.reason.to_string(),
            note: Some(ready.message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            warn!(
                "[status] failed to publish event for {}: {err}",
                display_name(object)
            );
        }
    }
}

fn display_name<K: Resource>(object: &K) -> String {
    match object.meta().namespace.as_deref() {
        Some(namespace) => format!("{namespace}/{}", object.name_any()),
        None => object.name_any(),
    }
}
