use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Basic,
    Timed,
    Checklist,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Basic => "basic",
            TaskType::Timed => "timed",
            TaskType::Checklist => "checklist",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(TaskType::Basic),
            "timed" => Ok(TaskType::Timed),
            "checklist" => Ok(TaskType::Checklist),
            other => Err(format!("unknown task type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    #[serde(default)]
    pub checked: bool,
}

impl ChecklistItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            checked: false,
        }
    }
}

/// Per-type payload of a task. The variant is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Basic,
    Timed {
        #[serde(default, deserialize_with = "lenient_due_date")]
        due_date: Option<DateTime<Utc>>,
    },
    Checklist {
        #[serde(default)]
        items: Vec<ChecklistItem>,
    },
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::Basic => TaskType::Basic,
            TaskKind::Timed { .. } => TaskType::Timed,
            TaskKind::Checklist { .. } => TaskType::Checklist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub kind: TaskKind,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            TaskKind::Timed { due_date } => *due_date,
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[ChecklistItem]> {
        match &self.kind {
            TaskKind::Checklist { items } => Some(items),
            _ => None,
        }
    }

    /// Completion implied by the checklist items. `None` for non-checklist
    /// tasks and for checklists without items.
    pub fn derived_completion(&self) -> Option<bool> {
        match &self.kind {
            TaskKind::Checklist { items } if !items.is_empty() => {
                Some(items.iter().all(|item| item.checked))
            }
            _ => None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date().is_some_and(|due| due < now)
    }

    /// Case-insensitive substring match on title or description.
    /// A blank query matches everything.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }

    /// Merges `patch` over this task. Nothing is written when the merged
    /// result fails validation.
    pub fn apply_patch(&mut self, patch: TaskPatch) -> Result<(), ValidationError> {
        let mut merged = self.clone();

        if let Some(title) = patch.title {
            merged.title = title;
        }
        if let Some(description) = patch.description {
            merged.description = normalize_description(description);
        }
        if let Some(completed) = patch.completed {
            merged.completed = completed;
        }
        if let Some(new_due) = patch.due_date {
            match &mut merged.kind {
                TaskKind::Timed { due_date } => *due_date = new_due,
                other => {
                    return Err(ValidationError::FieldNotApplicable {
                        field: "due_date",
                        task_type: other.task_type(),
                    });
                }
            }
        }
        if let Some(new_items) = patch.items {
            match &mut merged.kind {
                TaskKind::Checklist { items } => *items = new_items,
                other => {
                    return Err(ValidationError::FieldNotApplicable {
                        field: "items",
                        task_type: other.task_type(),
                    });
                }
            }
        }

        validate_fields(&merged.title, &merged.kind)?;
        *self = merged;
        Ok(())
    }
}

/// Input for creating a task. The store assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl NewTask {
    pub fn basic(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            kind: TaskKind::Basic,
        }
    }

    pub fn timed(title: impl Into<String>, due_date: Option<DateTime<Utc>>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            kind: TaskKind::Timed { due_date },
        }
    }

    pub fn checklist(title: impl Into<String>, items: Vec<ChecklistItem>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            kind: TaskKind::Checklist { items },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.title, &self.kind)
    }

    /// Validates and canonicalizes the input (blank description becomes none).
    pub fn normalized(mut self) -> Result<Self, ValidationError> {
        self.validate()?;
        self.description = normalize_description(self.description);
        Ok(self)
    }

    pub fn into_task(self, id: String, now: String) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            kind: self.kind,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Partial update. `id` and the task type can never be patched.
///
/// For the nullable fields, `None` leaves the value alone and `Some(None)`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_due_date_patch",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ChecklistItem>>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn items(items: Vec<ChecklistItem>) -> Self {
        Self {
            items: Some(items),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,

    #[error("checklist item {0} must have text")]
    EmptyChecklistItem(usize),

    #[error("`{field}` does not apply to {task_type} tasks")]
    FieldNotApplicable {
        field: &'static str,
        task_type: TaskType,
    },
}

fn validate_fields(title: &str, kind: &TaskKind) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if let TaskKind::Checklist { items } = kind {
        if let Some(index) = items.iter().position(|item| item.text.trim().is_empty()) {
            return Err(ValidationError::EmptyChecklistItem(index));
        }
    }
    Ok(())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

/// Parses a due date the way form inputs send it: RFC 3339, a naive
/// `YYYY-MM-DDTHH:MM[:SS]` (taken as UTC) or a bare date (midnight UTC).
/// Anything else means "no date".
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn lenient_due_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_due_date))
}

fn lenient_due_date_patch<'de, D>(
    deserializer: D,
) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_due_date(deserializer).map(Some)
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
