//! Persisted start-page widgets.
//!
//! Widgets are user-authored panels unrelated to feed aggregation. Only their
//! persisted shape lives here: a record per widget in the `widgets-data`
//! document, discriminated by `type`.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{Database, WIDGETS_KEY};

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("No widget with id '{0}'")]
    NotFound(String),

    #[error("Widget title cannot be empty")]
    EmptyTitle,

    #[error("Widget position {index} out of range (have {len})")]
    OutOfRange { index: usize, len: usize },
}

// ============================================================================
// Widget Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub body: WidgetBody,
}

/// Per-type payload, tagged by the `type` field of the widget record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WidgetBody {
    Bookmarks {
        #[serde(default)]
        links: Vec<Link>,
    },
    Launchpad {
        #[serde(default)]
        sites: Vec<Site>,
    },
    Notes {
        #[serde(default)]
        notes: String,
    },
    Weather {
        #[serde(default)]
        location: String,
        /// Last fetched reading. Transient: never exported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weather: Option<WeatherReading>,
    },
    Todo {
        #[serde(default)]
        todos: Vec<Todo>,
    },
}

impl WidgetBody {
    pub fn kind(&self) -> &'static str {
        match self {
            WidgetBody::Bookmarks { .. } => "bookmarks",
            WidgetBody::Launchpad { .. } => "launchpad",
            WidgetBody::Notes { .. } => "notes",
            WidgetBody::Weather { .. } => "weather",
            WidgetBody::Todo { .. } => "todo",
        }
    }

    /// Copy of the payload without transient fetched data.
    fn exportable(&self) -> Self {
        match self {
            WidgetBody::Weather { location, .. } => WidgetBody::Weather {
                location: location.clone(),
                weather: None,
            },
            WidgetBody::Bookmarks { .. }
            | WidgetBody::Launchpad { .. }
            | WidgetBody::Notes { .. }
            | WidgetBody::Todo { .. } => self.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherReading {
    pub temp: f64,
    pub conditions: String,
}

/// Widgets as they should be written to an export file.
pub fn export_widgets(widgets: &[Widget]) -> Vec<Widget> {
    widgets
        .iter()
        .map(|w| Widget {
            id: w.id.clone(),
            title: w.title.clone(),
            body: w.body.exportable(),
        })
        .collect()
}

// ============================================================================
// WidgetStore
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetStore {
    widgets: Vec<Widget>,
    /// Records this build cannot read, written back untouched on save.
    unreadable: Vec<serde_json::Value>,
}

impl WidgetStore {
    /// Load saved widgets, skipping records that do not parse.
    ///
    /// Skipped records are kept aside and survive the next [`save`](Self::save).
    /// An absent or malformed document yields an empty store.
    pub async fn load(db: &Database) -> Result<Self> {
        let records: Vec<serde_json::Value> =
            db.load_document(WIDGETS_KEY).await?.unwrap_or_default();

        let mut store = Self::default();
        for record in records {
            match serde_json::from_value::<Widget>(record.clone()) {
                Ok(widget) => store.widgets.push(widget),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable widget record");
                    store.unreadable.push(record);
                }
            }
        }

        Ok(store)
    }

    pub async fn save(&self, db: &Database) -> Result<()> {
        let mut records = self
            .widgets
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        records.extend(self.unreadable.iter().cloned());
        db.store_document(WIDGETS_KEY, &records).await
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn get(&self, id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Widget> {
        self.widgets.iter_mut().find(|w| w.id == id)
    }

    /// Append a widget with a fresh timestamp id.
    pub fn add(&mut self, title: &str, body: WidgetBody) -> Result<&Widget, WidgetError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WidgetError::EmptyTitle);
        }

        let id = self.next_id(chrono::Utc::now().timestamp_millis());
        self.widgets.push(Widget {
            id,
            title: title.to_string(),
            body,
        });
        Ok(&self.widgets[self.widgets.len() - 1])
    }

    /// Remove a widget. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.widgets.len();
        self.widgets.retain(|w| w.id != id);
        before != self.widgets.len()
    }

    /// Retitle a widget. Returns whether the title changed.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<bool, WidgetError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WidgetError::EmptyTitle);
        }
        let widget = self
            .get_mut(id)
            .ok_or_else(|| WidgetError::NotFound(id.to_string()))?;
        if widget.title == title {
            return Ok(false);
        }
        widget.title = title.to_string();
        Ok(true)
    }

    /// Move the widget at `from` so it ends up at `to`.
    pub fn move_widget(&mut self, from: usize, to: usize) -> Result<bool, WidgetError> {
        let len = self.widgets.len();
        for index in [from, to] {
            if index >= len {
                return Err(WidgetError::OutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(false);
        }
        let widget = self.widgets.remove(from);
        self.widgets.insert(to, widget);
        Ok(true)
    }

    /// Pretty JSON of the exportable widgets.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&export_widgets(&self.widgets))?)
    }

    fn next_id(&self, now_ms: i64) -> String {
        (now_ms..)
            .map(|n| n.to_string())
            .find(|id| self.get(id).is_none())
            .unwrap_or_default()
    }
}
