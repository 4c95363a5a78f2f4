use std::collections::HashMap;

use crate::errors::{PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::playbook_error;

/// Command and target names share one namespace.
#[derive(Debug, Default)]
pub struct NameRegistry {
    claimed: HashMap<String, &'static str>,
}

impl NameRegistry {
    pub fn claim(&mut self, section: &'static str, name: &str) -> PlaybookResult<()> {
        if let Some(owner) = self.claimed.get(name) {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "name '{}' in {} is already used in {}",
                name,
                section,
                owner
            ))
            .with_site(section, name);
        }
        self.claimed.insert(name.to_string(), section);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.claimed.contains_key(name)
    }
}
