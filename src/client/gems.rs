//! Gem management composed over a session's batch-execute channel.

use crate::client::core::CredentialedSession;
use crate::constants::GrpcId;
use crate::pipeline::extract_json;
use crate::types::{Gem, GemJar, GemRef, RpcData};
use crate::utils::NestedPath;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Gem catalog of one session. Fetched gems are cached until the next fetch.
#[derive(Debug)]
pub struct GemCatalog {
    session: CredentialedSession,
    jar: Mutex<Option<GemJar>>,
}

fn gem_fields(name: &str, description: &str, prompt: &str) -> Vec<Value> {
    vec![
        json!(name),
        json!(description),
        json!(prompt),
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
        Value::Null,
        json!(0),
        Value::Null,
        json!(1),
        Value::Null,
        Value::Null,
        Value::Null,
        json!([]),
    ]
}

/// Gem lists of a list-gems batch response, by the identifier each call was sent with.
fn parse_gem_lists(body: &str) -> Option<(Vec<Value>, Vec<Value>)> {
    let parts = extract_json(body).ok()?;
    let mut system = Vec::new();
    let mut custom = Vec::new();
    for part in &parts {
        let Some(identifier) = NestedPath::get_str(part, &[-1]) else {
            continue;
        };
        let Some(raw) = NestedPath::get_non_empty_str(part, &[2]) else {
            continue;
        };
        let Ok(inner) = serde_json::from_str::<Value>(raw) else {
            continue;
        };
        let gems = NestedPath::get_array(&inner, &[2]).cloned().unwrap_or_default();
        match identifier {
            "system" => system = gems,
            "custom" => custom = gems,
            _ => {}
        }
    }
    (!system.is_empty() || !custom.is_empty()).then_some((system, custom))
}

impl GemCatalog {
    pub fn new(session: CredentialedSession) -> Self {
        Self {
            session,
            jar: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &CredentialedSession {
        &self.session
    }

    fn jar(&self) -> MutexGuard<'_, Option<GemJar>> {
        self.jar.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gems cached by the last [`fetch_gems`](Self::fetch_gems).
    pub fn gems(&self) -> Result<GemJar> {
        self.jar().clone().ok_or_else(|| {
            Error::Validation("Gems not fetched yet. Call fetch_gems first.".to_string())
        })
    }

    /// Fetch predefined and custom gems. `include_hidden` adds predefined
    /// gems the web app does not list.
    pub async fn fetch_gems(&self, include_hidden: bool, language: &str) -> Result<GemJar> {
        let system_kind = if include_hidden { 4 } else { 3 };
        let calls = [
            RpcData::new(GrpcId::ListGems, format!("[{},['{}'],0]", system_kind, language))
                .with_identifier("system"),
            RpcData::new(GrpcId::ListGems, format!("[2,['{}'],0]", language))
                .with_identifier("custom"),
        ];
        let body = self.session.batch_execute(&calls).await?;

        let Some((system, custom)) = parse_gem_lists(&body) else {
            self.session.close_now();
            return Err(self.session.inner.tag(
                Error::protocol("unexpected list-gems response structure").with_source("gems"),
            ));
        };

        let jar: GemJar = system
            .iter()
            .filter_map(|g| Gem::from_wire(g, true))
            .chain(custom.iter().filter_map(|g| Gem::from_wire(g, false)))
            .collect();
        debug!(count = jar.len(), "gems fetched");
        *self.jar() = Some(jar.clone());
        Ok(jar)
    }

    pub async fn create_gem(&self, name: &str, prompt: &str, description: &str) -> Result<Gem> {
        let payload = json!([gem_fields(name, description, prompt)]).to_string();
        let body = self
            .session
            .batch_execute(&[RpcData::new(GrpcId::CreateGem, payload)])
            .await?;

        let gem_id = extract_json(&body)
            .ok()
            .and_then(|parts| {
                let raw = NestedPath::get_non_empty_str(&Value::Array(parts), &[0, 2])?.to_string();
                let inner: Value = serde_json::from_str(&raw).ok()?;
                NestedPath::get_non_empty_str(&inner, &[0]).map(str::to_string)
            });
        let Some(id) = gem_id else {
            self.session.close_now();
            return Err(self.session.inner.tag(
                Error::protocol("unexpected create-gem response structure").with_source("gems"),
            ));
        };

        let gem = Gem {
            id,
            name: name.to_string(),
            description: Some(description.to_string()),
            prompt: Some(prompt.to_string()),
            predefined: false,
        };
        if let Some(jar) = self.jar().as_mut() {
            jar.insert(gem.clone());
        }
        Ok(gem)
    }

    pub async fn update_gem(
        &self,
        gem: impl Into<GemRef>,
        name: &str,
        prompt: &str,
        description: &str,
    ) -> Result<Gem> {
        let gem_id = gem.into().id().to_string();
        let mut fields = gem_fields(name, description, prompt);
        fields.push(json!(0));
        let payload = json!([gem_id, fields]).to_string();
        self.session
            .batch_execute(&[RpcData::new(GrpcId::UpdateGem, payload)])
            .await?;

        let gem = Gem {
            id: gem_id,
            name: name.to_string(),
            description: Some(description.to_string()),
            prompt: Some(prompt.to_string()),
            predefined: false,
        };
        if let Some(jar) = self.jar().as_mut() {
            jar.insert(gem.clone());
        }
        Ok(gem)
    }

    pub async fn delete_gem(&self, gem: impl Into<GemRef>) -> Result<()> {
        let gem_id = gem.into().id().to_string();
        self.session
            .batch_execute(&[RpcData::new(GrpcId::DeleteGem, json!([gem_id]).to_string())])
            .await?;
        if let Some(jar) = self.jar().as_mut() {
            jar.remove(&gem_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(identifier: &str, gems: Value) -> Value {
        json!(["wrb.fr", "CNgdBe", json!([null, null, gems]).to_string(), null, null, null, identifier])
    }

    #[test]
    fn test_parse_gem_lists() {
        let parts = json!([
            part("system", json!([["coding-partner", ["Coding partner", "Helps with code"], ["You code."]]])),
            part("custom", json!([["c1", ["Mine", ""], null]])),
        ]);
        let text = parts.to_string();
        let body = format!(")]}}'\n\n{}\n{}\n", text.encode_utf16().count() + 1, text);
        let (system, custom) = parse_gem_lists(&body).unwrap();
        assert_eq!(system.len(), 1);
        assert_eq!(custom.len(), 1);
        assert_eq!(Gem::from_wire(&custom[0], false).unwrap().name, "Mine");
    }

    #[test]
    fn test_empty_lists_are_rejected() {
        let text = json!([part("system", json!([])), part("custom", json!([]))]).to_string();
        assert!(parse_gem_lists(&text).is_none());
    }

    #[test]
    fn test_gem_fields_shape() {
        let f = gem_fields("n", "d", "p");
        assert_eq!(f.len(), 15);
        assert_eq!(f[8], json!(0));
        assert_eq!(f[10], json!(1));
        assert_eq!(f[14], json!([]));
    }
}
