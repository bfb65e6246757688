pub mod task;

pub use task::{
    ChecklistItem, NewTask, Task, TaskKind, TaskPatch, TaskType, ValidationError, parse_due_date,
};
