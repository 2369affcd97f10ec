//! Feature flag storage
//!
//! A small in-memory key-value service. It exists so the enforcement layer has
//! business handlers to guard; persistence of flags is out of scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{FlagGateError, Result};

const MAX_FLAG_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn validate_flag_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FlagGateError::Validation("flag name must be provided".to_string()));
    }
    if name.chars().count() > MAX_FLAG_NAME_LEN {
        return Err(FlagGateError::Validation(format!(
            "flag name must be at most {} characters",
            MAX_FLAG_NAME_LEN
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct FlagService {
    flags: RwLock<HashMap<String, Flag>>,
}

impl FlagService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, name: &str, description: &str, enabled: bool) -> Result<Flag> {
        validate_flag_name(name)?;
        let mut flags = self.flags.write().await;
        if flags.values().any(|f| f.name == name.trim()) {
            return Err(FlagGateError::Validation(format!(
                "flag '{}' already exists",
                name.trim()
            )));
        }

        let now = Utc::now();
        let flag = Flag {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description: description.to_string(),
            enabled,
            created_at: now,
            updated_at: now,
        };
        flags.insert(flag.id.clone(), flag.clone());
        log::info!("Created flag {} ({})", flag.name, flag.id);
        Ok(flag)
    }

    pub async fn update(
        &self,
        id: &str,
        name: &str,
        description: &str,
        enabled: bool,
    ) -> Result<Flag> {
        validate_flag_name(name)?;
        let mut flags = self.flags.write().await;
        if flags.values().any(|f| f.id != id && f.name == name.trim()) {
            return Err(FlagGateError::Validation(format!(
                "flag '{}' already exists",
                name.trim()
            )));
        }
        let flag = flags
            .get_mut(id)
            .ok_or_else(|| FlagGateError::NotFound(format!("flag {}", id)))?;
        flag.name = name.trim().to_string();
        flag.description = description.to_string();
        flag.enabled = enabled;
        flag.updated_at = Utc::now();
        Ok(flag.clone())
    }

    pub async fn get(&self, id: &str) -> Result<Flag> {
        self.flags
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FlagGateError::NotFound(format!("flag {}", id)))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        match self.flags.write().await.remove(id) {
            Some(flag) => {
                log::info!("Deleted flag {} ({})", flag.name, flag.id);
                Ok(())
            }
            None => Err(FlagGateError::NotFound(format!("flag {}", id))),
        }
    }

    /// All flags, ordered by name
    pub async fn list(&self) -> Vec<Flag> {
        let mut flags: Vec<Flag> = self.flags.read().await.values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }
}
