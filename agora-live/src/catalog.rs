//! Presentation lookup.
//!
//! The gateway does not own presentation definitions; it resolves an access
//! code or id through a [`PresentationCatalog`] when the first connection
//! for a presentation arrives.

use std::collections::HashMap;
use std::path::Path;

use agora_core::{LiveError, Presentation};
use thiserror::Error;
use uuid::Uuid;

pub trait PresentationCatalog: Send + Sync {
    fn by_access_code(&self, access_code: &str) -> Option<Presentation>;
    fn by_id(&self, id: Uuid) -> Option<Presentation>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid presentation: {0}")]
    Invalid(#[from] LiveError),

    #[error("Access code {0} is used twice")]
    DuplicateCode(String),
}

/// Access codes are matched case-insensitively and without surrounding
/// whitespace.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    presentations: HashMap<Uuid, Presentation>,
    codes: HashMap<String, Uuid>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a presentation. The definition is validated first.
    pub fn insert(&mut self, presentation: Presentation) -> Result<(), CatalogError> {
        presentation.validate()?;
        let code = normalize_code(&presentation.access_code);
        if let Some(owner) = self.codes.get(&code) {
            if *owner != presentation.id {
                return Err(CatalogError::DuplicateCode(code));
            }
        }
        if let Some(previous) = self.presentations.get(&presentation.id) {
            self.codes.remove(&normalize_code(&previous.access_code));
        }
        self.codes.insert(code, presentation.id);
        self.presentations.insert(presentation.id, presentation);
        Ok(())
    }

    /// Parse a JSON array of presentations.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let presentations: Vec<Presentation> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for p in presentations {
            catalog.insert(p)?;
        }
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&json)?;
        log::info!(
            "Loaded {} presentation(s) from {}",
            catalog.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.presentations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presentations.is_empty()
    }
}

impl PresentationCatalog for MemoryCatalog {
    fn by_access_code(&self, access_code: &str) -> Option<Presentation> {
        let id = self.codes.get(&normalize_code(access_code))?;
        self.presentations.get(id).cloned()
    }

    fn by_id(&self, id: Uuid) -> Option<Presentation> {
        self.presentations.get(&id).cloned()
    }
}
