//! Task lifecycle: configuration model, registry and per-task worker

mod model;
mod registry;
pub mod worker;

pub use model::{
    new_task_id, MarketMakerConfig, SellSharesConfig, SplitAndSellConfig, TaskConfig, TaskId, TaskKind,
    TaskStatus, TaskView,
};
pub use registry::TaskRegistry;
pub use worker::{StrategyContext, WorkerExit};
