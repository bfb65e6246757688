pub mod board;
pub mod feed;
pub mod scheduler;

pub use board::{BoardError, MutationState, TaskBoard};
pub use feed::spawn_change_listener;
pub use scheduler::OverdueScheduler;
