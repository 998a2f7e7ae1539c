//! The change notification sink consumed by the registry.
//!
//! The registry reports every mutation of the instance graph through a
//! [`ChangeNotifier`]. Calls for one provider arrive in the order the
//! [`ChangeEvent`]s were computed, while the provider is still locked, so an
//! observer never sees events of one provider interleaved.
//!
//! An error returned by the sink stops delivery of the remaining events of
//! that mutation and is propagated to the caller. The state change itself is
//! not rolled back.

use parking_lot::Mutex;
use sensorgate_types::{ChangeEvent, MetadataMap, ProviderRef, Timestamp, Value, ValueType};
use std::error::Error as StdError;
use thiserror::Error;
use tracing::debug;

/// Result type for notifier calls.
pub type NotifyResult = Result<(), NotifierError>;

/// Failure reported by a notification sink.
#[derive(Debug, Error)]
#[error("change notifier failed: {message}")]
pub struct NotifierError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl NotifierError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Address of a resource within a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePath<'a> {
    pub service: &'a str,
    pub resource: &'a str,
}

/// Receives change events from the registry.
///
/// All methods default to doing nothing, so sinks only implement what they
/// care about. `None` values and metadata mean unset.
pub trait ChangeNotifier: Send + Sync {
    fn add_provider(&self, _target: &ProviderRef) -> NotifyResult {
        Ok(())
    }

    fn remove_provider(&self, _target: &ProviderRef) -> NotifyResult {
        Ok(())
    }

    fn add_service(&self, _target: &ProviderRef, _service: &str) -> NotifyResult {
        Ok(())
    }

    fn remove_service(&self, _target: &ProviderRef, _service: &str) -> NotifyResult {
        Ok(())
    }

    fn add_resource(&self, _target: &ProviderRef, _path: ResourcePath<'_>) -> NotifyResult {
        Ok(())
    }

    fn remove_resource(&self, _target: &ProviderRef, _path: ResourcePath<'_>) -> NotifyResult {
        Ok(())
    }

    fn resource_value_update(
        &self,
        _target: &ProviderRef,
        _path: ResourcePath<'_>,
        _value_type: ValueType,
        _old: Option<&Value>,
        _new: Option<&Value>,
        _timestamp: Timestamp,
    ) -> NotifyResult {
        Ok(())
    }

    fn metadata_value_update(
        &self,
        _target: &ProviderRef,
        _path: ResourcePath<'_>,
        _old: Option<&MetadataMap>,
        _new: Option<&MetadataMap>,
        _timestamp: Timestamp,
    ) -> NotifyResult {
        Ok(())
    }
}

/// Dispatches one event to the matching notifier method.
pub fn deliver(notifier: &dyn ChangeNotifier, event: &ChangeEvent) -> NotifyResult {
    match event {
        ChangeEvent::ProviderAdded { target } => notifier.add_provider(target),
        ChangeEvent::ProviderRemoved { target } => notifier.remove_provider(target),
        ChangeEvent::ServiceAdded { target, service } => notifier.add_service(target, service),
        ChangeEvent::ServiceRemoved { target, service } => {
            notifier.remove_service(target, service)
        }
        ChangeEvent::ResourceAdded {
            target,
            service,
            resource,
        } => notifier.add_resource(target, ResourcePath { service, resource }),
        ChangeEvent::ResourceRemoved {
            target,
            service,
            resource,
        } => notifier.remove_resource(target, ResourcePath { service, resource }),
        ChangeEvent::ResourceValueUpdated {
            target,
            service,
            resource,
            value_type,
            old,
            new,
            timestamp,
        } => notifier.resource_value_update(
            target,
            ResourcePath { service, resource },
            *value_type,
            old.as_ref(),
            new.as_ref(),
            *timestamp,
        ),
        ChangeEvent::MetadataValueUpdated {
            target,
            service,
            resource,
            old,
            new,
            timestamp,
        } => notifier.metadata_value_update(
            target,
            ResourcePath { service, resource },
            old.as_ref(),
            new.as_ref(),
            *timestamp,
        ),
    }
}

/// Delivers events in order, stopping at the first failure.
pub fn deliver_all(notifier: &dyn ChangeNotifier, events: &[ChangeEvent]) -> NotifyResult {
    events.iter().try_for_each(|event| deliver(notifier, event))
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {}

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl ChangeNotifier for TracingNotifier {
    fn add_provider(&self, target: &ProviderRef) -> NotifyResult {
        debug!(provider = %target, "addProvider");
        Ok(())
    }

    fn remove_provider(&self, target: &ProviderRef) -> NotifyResult {
        debug!(provider = %target, "removeProvider");
        Ok(())
    }

    fn add_service(&self, target: &ProviderRef, service: &str) -> NotifyResult {
        debug!(provider = %target, service, "addService");
        Ok(())
    }

    fn remove_service(&self, target: &ProviderRef, service: &str) -> NotifyResult {
        debug!(provider = %target, service, "removeService");
        Ok(())
    }

    fn add_resource(&self, target: &ProviderRef, path: ResourcePath<'_>) -> NotifyResult {
        debug!(provider = %target, service = path.service, resource = path.resource, "addResource");
        Ok(())
    }

    fn remove_resource(&self, target: &ProviderRef, path: ResourcePath<'_>) -> NotifyResult {
        debug!(
            provider = %target,
            service = path.service,
            resource = path.resource,
            "removeResource"
        );
        Ok(())
    }

    fn resource_value_update(
        &self,
        target: &ProviderRef,
        path: ResourcePath<'_>,
        value_type: ValueType,
        old: Option<&Value>,
        new: Option<&Value>,
        timestamp: Timestamp,
    ) -> NotifyResult {
        debug!(
            provider = %target,
            service = path.service,
            resource = path.resource,
            %value_type,
            ?old,
            ?new,
            %timestamp,
            "resourceValueUpdate"
        );
        Ok(())
    }

    fn metadata_value_update(
        &self,
        target: &ProviderRef,
        path: ResourcePath<'_>,
        _old: Option<&MetadataMap>,
        new: Option<&MetadataMap>,
        timestamp: Timestamp,
    ) -> NotifyResult {
        debug!(
            provider = %target,
            service = path.service,
            resource = path.resource,
            ?new,
            %timestamp,
            "metadataValueUpdate"
        );
        Ok(())
    }
}

/// Keeps every event it receives, in order.
///
/// Used by tests and by the CLI to print what a command changed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the recorded events.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Operation names of the recorded events.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ChangeEvent::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn record(&self, event: ChangeEvent) -> NotifyResult {
        self.events.lock().push(event);
        Ok(())
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn add_provider(&self, target: &ProviderRef) -> NotifyResult {
        self.record(ChangeEvent::ProviderAdded {
            target: target.clone(),
        })
    }

    fn remove_provider(&self, target: &ProviderRef) -> NotifyResult {
        self.record(ChangeEvent::ProviderRemoved {
            target: target.clone(),
        })
    }

    fn add_service(&self, target: &ProviderRef, service: &str) -> NotifyResult {
        self.record(ChangeEvent::ServiceAdded {
            target: target.clone(),
            service: service.to_string(),
        })
    }

    fn remove_service(&self, target: &ProviderRef, service: &str) -> NotifyResult {
        self.record(ChangeEvent::ServiceRemoved {
            target: target.clone(),
            service: service.to_string(),
        })
    }

    fn add_resource(&self, target: &ProviderRef, path: ResourcePath<'_>) -> NotifyResult {
        self.record(ChangeEvent::ResourceAdded {
            target: target.clone(),
            service: path.service.to_string(),
            resource: path.resource.to_string(),
        })
    }

    fn remove_resource(&self, target: &ProviderRef, path: ResourcePath<'_>) -> NotifyResult {
        self.record(ChangeEvent::ResourceRemoved {
            target: target.clone(),
            service: path.service.to_string(),
            resource: path.resource.to_string(),
        })
    }

    fn resource_value_update(
        &self,
        target: &ProviderRef,
        path: ResourcePath<'_>,
        value_type: ValueType,
        old: Option<&Value>,
        new: Option<&Value>,
        timestamp: Timestamp,
    ) -> NotifyResult {
        self.record(ChangeEvent::ResourceValueUpdated {
            target: target.clone(),
            service: path.service.to_string(),
            resource: path.resource.to_string(),
            value_type,
            old: old.cloned(),
            new: new.cloned(),
            timestamp,
        })
    }

    fn metadata_value_update(
        &self,
        target: &ProviderRef,
        path: ResourcePath<'_>,
        old: Option<&MetadataMap>,
        new: Option<&MetadataMap>,
        timestamp: Timestamp,
    ) -> NotifyResult {
        self.record(ChangeEvent::MetadataValueUpdated {
            target: target.clone(),
            service: path.service.to_string(),
            resource: path.resource.to_string(),
            old: old.cloned(),
            new: new.cloned(),
            timestamp,
        })
    }
}
