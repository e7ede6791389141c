use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{KeyValueStore, LAST_USED_PROMPT_KEY, PROMPTS_KEY, PROMPT_STATS_KEY};
use crate::errors::{DockError, Result};

/// A saved, reusable prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id:         String,
    pub title:      String,
    pub content:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags:       Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host:       Option<String>,
    /// Fields written by other versions of the extension, kept verbatim
    #[serde(flatten)]
    pub extra:      Map<String, Value>,
}

impl Prompt {
    /// Create a prompt with a fresh UUID and the current time
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Prompt {
            id:         Uuid::new_v4().to_string(),
            title:      title.into(),
            content:    content.into(),
            tags:       None,
            created_at: Some(Utc::now()),
            source_url: None,
            host:       None,
            extra:      Map::new(),
        }
    }

    /// Decode one untrusted record. Shape errors (missing fields, a tag that
    /// is not a string) are reported as validation failures.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(DockError::validation("Prompt must be a plain object."));
        }
        serde_json::from_value(value).map_err(|e| DockError::validation(e.to_string()))
    }

    /// Trim the identifying fields; content is kept byte for byte.
    pub fn normalized(mut self) -> Self {
        let id = self.id.trim();
        if id.len() != self.id.len() {
            self.id = id.to_string();
        }
        let title = self.title.trim();
        if title.len() != self.title.len() {
            self.title = title.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DockError::validation("Prompt id must be a non-empty string."));
        }
        if self.title.is_empty() {
            return Err(DockError::validation("Prompt title must be a non-empty string."));
        }
        if self.content.is_empty() {
            return Err(DockError::validation("Prompt content must be a non-empty string."));
        }
        Ok(())
    }
}

/// Partial update for [`PromptStore::update_prompt`]; absent fields are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags:       Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host:       Option<String>,
    /// Other fields, merged into [`Prompt::extra`]. `id` and `createdAt`
    /// never change.
    #[serde(flatten)]
    pub extra:      Map<String, Value>,
}

impl PromptPatch {
    pub fn title(title: impl Into<String>) -> Self {
        PromptPatch {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Decode untrusted changes; shape errors are validation failures
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(DockError::validation("Update data must be a plain object."));
        }
        serde_json::from_value(value).map_err(|e| DockError::validation(e.to_string()))
    }

    fn apply_to(self, prompt: &mut Prompt) {
        if let Some(title) = self.title {
            prompt.title = title;
        }
        if let Some(content) = self.content {
            prompt.content = content;
        }
        if let Some(tags) = self.tags {
            prompt.tags = Some(tags);
        }
        if let Some(source_url) = self.source_url {
            prompt.source_url = Some(source_url);
        }
        if let Some(host) = self.host {
            prompt.host = Some(host);
        }
        for (key, value) in self.extra {
            if key != "id" && key != "createdAt" {
                prompt.extra.insert(key, value);
            }
        }
    }
}

/// How often, and how recently, a prompt has been injected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStat {
    pub prompt_id: String,
    pub count:     u64,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Usage stats keyed by prompt id
pub type PromptStats = BTreeMap<String, UsageStat>;

/// Result of [`PromptStore::import_prompts`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    /// The full collection after the import
    pub prompts: Vec<Prompt>,
    /// Records that were not already present
    pub added:   Vec<Prompt>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportBundle {
    prompts: Vec<Prompt>,
    #[serde(default)]
    stats:   PromptStats,
}

/// Prompt records and usage stats laid out over a key-value store
#[derive(Debug)]
pub struct PromptStore<S> {
    store: S,
}

impl<S: KeyValueStore> PromptStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    pub async fn get_prompts(&self) -> Result<Vec<Prompt>> {
        match self.store.get(PROMPTS_KEY).await? {
            Some(value @ Value::Array(_)) => Ok(serde_json::from_value(value)?),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>> {
        Ok(self.get_prompts().await?.into_iter().find(|p| p.id == id))
    }

    async fn write_prompts(&self, prompts: &[Prompt]) -> Result<()> {
        self.store.set(PROMPTS_KEY, serde_json::to_value(prompts)?).await
    }

    pub async fn get_prompt_stats(&self) -> Result<PromptStats> {
        match self.store.get(PROMPT_STATS_KEY).await? {
            Some(value @ Value::Object(_)) => Ok(serde_json::from_value(value)?),
            _ => Ok(PromptStats::new()),
        }
    }

    async fn write_stats(&self, stats: &PromptStats) -> Result<()> {
        self.store.set(PROMPT_STATS_KEY, serde_json::to_value(stats)?).await
    }

    /// Insert or replace a prompt by id
    pub async fn save_prompt(&self, prompt: Prompt) -> Result<Prompt> {
        let prompt = prompt.normalized();
        prompt.validate()?;

        let mut prompts = self.get_prompts().await?;
        match prompts.iter_mut().find(|p| p.id == prompt.id) {
            Some(existing) => *existing = prompt.clone(),
            None => prompts.push(prompt.clone()),
        }

        self.write_prompts(&prompts).await?;
        debug!(prompt_id = %prompt.id, "Saved prompt");
        Ok(prompt)
    }

    pub async fn update_prompt(&self, id: &str, patch: PromptPatch) -> Result<Prompt> {
        require_id(id)?;

        let mut prompts = self.get_prompts().await?;
        let index = prompts
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DockError::NotFound(id.to_string()))?;

        let mut candidate = prompts[index].clone();
        patch.apply_to(&mut candidate);
        let candidate = candidate.normalized();
        candidate.validate()?;

        prompts[index] = candidate.clone();
        self.write_prompts(&prompts).await?;
        Ok(candidate)
    }

    /// Remove a prompt and its usage stat. Returns `false` if the id is absent.
    pub async fn delete_prompt(&self, id: &str) -> Result<bool> {
        require_id(id)?;

        let prompts = self.get_prompts().await?;
        let before = prompts.len();
        let remaining: Vec<Prompt> = prompts.into_iter().filter(|p| p.id != id).collect();

        if remaining.len() == before {
            return Ok(false);
        }

        self.write_prompts(&remaining).await?;

        let mut stats = self.get_prompt_stats().await?;
        if stats.remove(id).is_some() {
            self.write_stats(&stats).await?;
        }

        if self.last_used_prompt_id().await?.as_deref() == Some(id) {
            self.store.remove(LAST_USED_PROMPT_KEY).await?;
        }

        Ok(true)
    }

    /// Drop every prompt, stat and the last-used marker
    pub async fn clear_prompts(&self) -> Result<()> {
        self.write_prompts(&[]).await?;
        self.write_stats(&PromptStats::new()).await?;
        self.store.remove(LAST_USED_PROMPT_KEY).await
    }

    /// Create or increment the usage stat of a stored prompt
    pub async fn record_prompt_usage(&self, id: &str, at: DateTime<Utc>) -> Result<UsageStat> {
        require_id(id)?;
        if self.get_prompt(id).await?.is_none() {
            return Err(DockError::NotFound(id.to_string()));
        }

        let mut stats = self.get_prompt_stats().await?;
        let stat = stats.entry(id.to_string()).or_insert_with(|| UsageStat {
            prompt_id: id.to_string(),
            count:     0,
            last_used: None,
        });
        stat.count += 1;
        stat.last_used = Some(at);
        let stat = stat.clone();

        self.write_stats(&stats).await?;
        Ok(stat)
    }

    pub async fn last_used_prompt_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(LAST_USED_PROMPT_KEY)
            .await?
            .and_then(|v| v.as_str().map(String::from))
            .filter(|id| !id.is_empty()))
    }

    pub async fn set_last_used_prompt_id(&self, id: &str) -> Result<()> {
        require_id(id)?;
        self.store.set(LAST_USED_PROMPT_KEY, Value::from(id)).await
    }

    /// Serialize `{ prompts, stats }` as pretty JSON
    pub async fn export_prompts(&self) -> Result<String> {
        let bundle = ExportBundle {
            prompts: self.get_prompts().await?,
            stats:   self.get_prompt_stats().await?,
        };
        Ok(serde_json::to_string_pretty(&bundle)?)
    }

    /// Merge an exported payload (a bare list or `{ prompts, stats }`)
    ///
    /// Every incoming record is validated before anything is written. Ids
    /// already stored are skipped; stats merge by max count and latest use.
    pub async fn import_prompts(&self, payload: Value) -> Result<ImportOutcome> {
        let (items, incoming_stats) = split_payload(payload)?;

        let incoming = items
            .into_iter()
            .map(|item| {
                let prompt = Prompt::from_value(item)?.normalized();
                prompt.validate()?;
                Ok(prompt)
            })
            .collect::<Result<Vec<_>>>()?;

        let incoming_stats: PromptStats = match incoming_stats {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| DockError::validation(format!("Invalid stats: {}", e)))?,
            None => PromptStats::new(),
        };

        let mut prompts = self.get_prompts().await?;
        let mut known: HashSet<String> = prompts.iter().map(|p| p.id.clone()).collect();

        let mut added = Vec::new();
        for prompt in incoming {
            if known.insert(prompt.id.clone()) {
                prompts.push(prompt.clone());
                added.push(prompt);
            }
        }

        if !added.is_empty() {
            self.write_prompts(&prompts).await?;
        }

        let mut stats = self.get_prompt_stats().await?;
        let mut stats_changed = false;
        for (id, theirs) in incoming_stats {
            if !known.contains(&id) {
                continue;
            }
            let merged = match stats.get(&id) {
                Some(ours) => UsageStat {
                    prompt_id: id.clone(),
                    count:     ours.count.max(theirs.count),
                    last_used: ours.last_used.max(theirs.last_used),
                },
                None => UsageStat {
                    prompt_id: id.clone(),
                    ..theirs
                },
            };
            if stats.get(&id) != Some(&merged) {
                stats.insert(id, merged);
                stats_changed = true;
            }
        }

        if stats_changed {
            self.write_stats(&stats).await?;
        }

        info!(added = added.len(), total = prompts.len(), "Imported prompts");
        Ok(ImportOutcome { prompts, added })
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DockError::validation("Prompt id must be a non-empty string."));
    }
    Ok(())
}

fn split_payload(payload: Value) -> Result<(Vec<Value>, Option<Value>)> {
    match payload {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut map) => match map.remove("prompts") {
            Some(Value::Array(items)) => Ok((items, map.remove("stats"))),
            _ => Err(DockError::validation("Import payload must contain a prompts list.")),
        },
        _ => Err(DockError::validation(
            "Import payload must be a list of prompts or an object with a prompts list.",
        )),
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds; always writes RFC 3339.
mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Millis(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(D::Error::custom),
        }
    }
}
