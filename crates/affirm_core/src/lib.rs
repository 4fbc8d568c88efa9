pub mod adapter;
pub mod clock;
pub mod error;
pub mod history;
pub mod local;
pub mod pending;
mod persisted;
pub mod record;
pub mod scheduler;
pub mod storage;
pub mod subscription;
pub mod transport;
pub mod validation;

pub use crate::scheduler::{SchedulerState, SchedulerStateBuilder};
