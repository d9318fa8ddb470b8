//! Chat memories stored as pages in a Notion database.
//!
//! Three databases are involved: chat memories (one page per memory), memory
//! areas (pages titled by `Area`) and memory groups (`GroupName` title plus a
//! `Groupcode` derived from keywords).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::instrument;

use crate::client::NotionClient;
use crate::error::NotionError;

/// Database ids the memory operations write to.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabases {
    pub chat_memories: String,
    pub memory_areas: Option<String>,
    pub memory_groups: Option<String>,
}

/// A memory to store.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    pub message: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub inference: String,
    #[serde(default)]
    pub hexcode: String,
    #[serde(default)]
    pub memory_area_id: Option<String>,
    #[serde(default)]
    pub groupcode: Option<String>,
    /// Defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Filters for `retrieve_memories`. Empty means "everything, newest first".
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryQuery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub memory_area_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn title(content: &str) -> Value {
    json!({ "title": [{ "text": { "content": content } }] })
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Page properties for a chat memory.
pub fn memory_properties(memory: &NewMemory, timestamp: DateTime<Utc>) -> Value {
    let mut props = Map::new();
    props.insert("chat_message".into(), title(&memory.message));
    let keywords: Vec<Value> = memory.keywords.iter().map(|k| json!({ "name": k })).collect();
    props.insert("key_words".into(), json!({ "multi_select": keywords }));
    props.insert("inference".into(), rich_text(&memory.inference));
    props.insert("hexcode".into(), rich_text(&memory.hexcode));
    props.insert("timestamp".into(), json!({ "date": { "start": iso(timestamp) } }));
    if let Some(area) = memory.memory_area_id.as_deref().filter(|a| !a.is_empty()) {
        props.insert("memory_area_id".into(), json!({ "relation": [{ "id": area }] }));
    }
    if let Some(code) = memory.groupcode.as_deref().filter(|c| !c.is_empty()) {
        props.insert("groupcode".into(), rich_text(code));
    }
    Value::Object(props)
}

/// Query body for `retrieve_memories`: optional `and` filter, newest first.
///
/// Only the first keyword is matched.
pub fn memory_query_body(query: &MemoryQuery) -> Value {
    let mut filters = Vec::new();

    if let Some(keyword) = query.keywords.first() {
        filters.push(json!({
            "property": "key_words",
            "multi_select": { "contains": keyword },
        }));
    }

    if let Some(area) = &query.memory_area_id {
        filters.push(json!({
            "property": "memory_area_id",
            "relation": { "contains": area },
        }));
    }

    if query.start_date.is_some() || query.end_date.is_some() {
        let mut date = Map::new();
        if let Some(start) = query.start_date {
            date.insert("after".into(), Value::String(iso(start)));
        }
        if let Some(end) = query.end_date {
            date.insert("before".into(), Value::String(iso(end)));
        }
        filters.push(json!({ "property": "timestamp", "date": date }));
    }

    let mut body = json!({
        "sorts": [{ "property": "timestamp", "direction": "descending" }],
    });
    if !filters.is_empty() {
        body["filter"] = json!({ "and": filters });
    }
    body
}

/// Group code from the first three keywords, joined by `-`, lowercased.
pub fn generate_group_code(keywords: &[String]) -> String {
    keywords
        .iter()
        .take(3)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Outcome of `assign_memory_to_group`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupAssignment {
    Existing { group_id: String },
    Created { group_id: String },
}

fn page_id(page: &Value) -> Result<String, NotionError> {
    page.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| NotionError::Decode("page without id".into()))
}

fn first_result_id(response: &Value) -> Option<String> {
    response
        .pointer("/results/0/id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub struct MemoryService {
    client: NotionClient,
    databases: MemoryDatabases,
}

impl MemoryService {
    pub fn new(client: NotionClient, databases: MemoryDatabases) -> Self {
        Self { client, databases }
    }

    fn areas_db(&self) -> Result<&str, NotionError> {
        self.databases
            .memory_areas
            .as_deref()
            .ok_or_else(|| NotionError::Config("memory areas database id".into()))
    }

    fn groups_db(&self) -> Result<&str, NotionError> {
        self.databases
            .memory_groups
            .as_deref()
            .ok_or_else(|| NotionError::Config("memory groups database id".into()))
    }

    #[instrument(skip(self, memory), fields(keywords = memory.keywords.len()))]
    pub async fn store_memory(&self, memory: &NewMemory) -> Result<Value, NotionError> {
        let timestamp = memory.timestamp.unwrap_or_else(Utc::now);
        let page = self
            .client
            .create_page(&self.databases.chat_memories, memory_properties(memory, timestamp))
            .await?;
        tracing::info!(page_id = ?page.get("id"), "Memory stored");
        Ok(page)
    }

    pub async fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<Value>, NotionError> {
        let response = self
            .client
            .query_database(&self.databases.chat_memories, memory_query_body(query))
            .await?;
        match response.get("results") {
            Some(Value::Array(results)) => Ok(results.clone()),
            _ => Err(NotionError::Decode("query response without results".into())),
        }
    }

    /// Id of the area titled `area_name`, creating it if needed.
    #[instrument(skip(self))]
    pub async fn assign_memory_area(&self, area_name: &str) -> Result<String, NotionError> {
        let db = self.areas_db()?;
        let existing = self
            .client
            .query_database(
                db,
                json!({ "filter": { "property": "Area", "title": { "equals": area_name } } }),
            )
            .await?;
        if let Some(id) = first_result_id(&existing) {
            return Ok(id);
        }

        let created = self
            .client
            .create_page(db, json!({ "Area": title(area_name) }))
            .await?;
        tracing::info!("Memory area created");
        page_id(&created)
    }

    pub async fn create_memory_group(
        &self,
        group_name: &str,
        keywords: &[String],
    ) -> Result<Value, NotionError> {
        let code = generate_group_code(keywords);
        self.client
            .create_page(
                self.groups_db()?,
                json!({
                    "GroupName": title(group_name),
                    "Groupcode": rich_text(&code),
                }),
            )
            .await
    }

    /// Link `memory_id` to the group with `group_code`, creating the group
    /// when none exists yet.
    #[instrument(skip(self))]
    pub async fn assign_memory_to_group(
        &self,
        memory_id: &str,
        group_code: &str,
    ) -> Result<GroupAssignment, NotionError> {
        let existing = self
            .client
            .query_database(
                self.groups_db()?,
                json!({ "filter": { "property": "Groupcode", "rich_text": { "equals": group_code } } }),
            )
            .await?;

        let (group_id, created) = match first_result_id(&existing) {
            Some(id) => (id, false),
            None => {
                let group = self
                    .create_memory_group(group_code, &[group_code.to_string()])
                    .await?;
                (page_id(&group)?, true)
            }
        };

        self.client
            .update_page(
                &group_id,
                json!({ "ChatMemories": { "relation": [{ "id": memory_id }] } }),
            )
            .await?;

        Ok(if created {
            GroupAssignment::Created { group_id }
        } else {
            GroupAssignment::Existing { group_id }
        })
    }
}
