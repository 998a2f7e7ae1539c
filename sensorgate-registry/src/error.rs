//! Error types for the registry.

use crate::notifier::NotifierError;
use sensorgate_storage::StorageError;
use sensorgate_types::ValueType;
use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A model, service or resource of that name already exists in its scope.
    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName { scope: String, name: String },

    /// The provider id is already used, possibly by another model.
    #[error("provider id '{id}' already used by model '{model}'")]
    DuplicateId { id: String, model: String },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unknown service '{service}' in model '{model}'")]
    UnknownService { model: String, service: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The model came from a type package and cannot grow at runtime.
    #[error("model '{model}' is not extensible: cannot add {element}")]
    NotExtensible { model: String, element: String },

    /// A value does not match the declared type of its resource.
    #[error("resource '{model}/{service}/{resource}' expects {expected}, got {actual}")]
    TypeMismatch {
        model: String,
        service: String,
        resource: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// The built-in self provider cannot be deleted.
    #[error("provider '{0}' is protected")]
    ProtectedProvider(String),

    /// The registry has been shut down.
    #[error("registry is shut down")]
    ShutDown,

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// The notification sink rejected an event. State changes made before
    /// the failure are kept.
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl RegistryError {
    pub(crate) fn duplicate(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            scope: scope.into(),
            name: name.into(),
        }
    }

    pub(crate) fn not_extensible(model: impl Into<String>, element: impl Into<String>) -> Self {
        Self::NotExtensible {
            model: model.into(),
            element: element.into(),
        }
    }
}
