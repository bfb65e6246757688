use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMethod {
    #[default]
    Date,
    Name,
    Id,
    Completion,
}

impl SortMethod {
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        match self {
            SortMethod::Date => sort_by_date(tasks),
            SortMethod::Name => sort_by_name(tasks),
            SortMethod::Id => sort_by_id(tasks),
            SortMethod::Completion => sort_by_completion(tasks),
        }
    }
}

impl FromStr for SortMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(SortMethod::Date),
            "name" => Ok(SortMethod::Name),
            "id" => Ok(SortMethod::Id),
            "completion" => Ok(SortMethod::Completion),
            other => Err(format!("unknown sort method: {}", other)),
        }
    }
}

/// Earliest due date first. Tasks without a due date keep their relative
/// order and go last.
pub fn sort_by_date(tasks: &[Task]) -> Vec<Task> {
    sorted(tasks, |a, b| match (a.due_date(), b.due_date()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

/// Case-insensitive title order. Titles equal up to case put the
/// lowercase spelling first ("apple" before "Apple").
pub fn sort_by_name(tasks: &[Task]) -> Vec<Task> {
    sorted(tasks, |a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| b.title.cmp(&a.title))
    })
}

pub fn sort_by_id(tasks: &[Task]) -> Vec<Task> {
    sorted(tasks, |a, b| a.id.cmp(&b.id))
}

pub fn sort_by_completion(tasks: &[Task]) -> Vec<Task> {
    sorted(tasks, |a, b| a.completed.cmp(&b.completed))
}

fn sorted<F>(tasks: &[Task], compare: F) -> Vec<Task>
where
    F: FnMut(&Task, &Task) -> Ordering,
{
    let mut out = tasks.to_vec();
    // sort_by is stable
    out.sort_by(compare);
    out
}
