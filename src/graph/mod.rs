//! Task graph: tasks, pipelines and debates as a dependency DAG

pub mod builder;
pub mod queries;

pub use builder::TaskGraph;
pub use queries::{
    next_id, parse_timestamp, BlockedTask, DEBATE_PREFIX, PIPELINE_PREFIX, TASK_PREFIX,
};
