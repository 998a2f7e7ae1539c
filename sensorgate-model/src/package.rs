use crate::schema::{ModelDef, ModelOrigin};
use serde::{Deserialize, Serialize};

/// A bundle of externally authored model definitions registered in bulk.
///
/// Models keep the package URI as their origin, which makes them
/// discoverable by URI and fixes their shape at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypePackage {
    pub uri: String,
    #[serde(default)]
    pub models: Vec<ModelDef>,
}

impl TypePackage {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            models: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    /// Parses a package from its JSON form and normalizes it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut package: Self = serde_json::from_str(json)?;
        package.normalize();
        Ok(package)
    }

    /// Stamps every model with this package's origin and fills derived
    /// fields (names from keys, admin service).
    pub fn normalize(&mut self) {
        for model in &mut self.models {
            model.origin = ModelOrigin::Package {
                uri: self.uri.clone(),
            };
            model.normalize();
        }
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name.as_str())
    }
}
