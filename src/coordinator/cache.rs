use std::collections::HashMap;

/// Owner name → CPF/CNPJ, valid for a single run
#[derive(Debug, Default)]
pub struct IdentifierCache {
    entries: HashMap<String, String>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner_name: &str) -> Option<&str> {
        self.entries.get(owner_name.trim()).map(String::as_str)
    }

    /// Stores the first non-empty identifier seen for a name.
    pub fn remember(&mut self, owner_name: &str, identifier: &str) -> bool {
        let name = owner_name.trim();
        if name.is_empty() || identifier.is_empty() || self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), identifier.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
