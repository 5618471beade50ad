// Webhook signal -> order pipeline
pub mod planner;
pub mod processor;
pub mod queue;

pub use planner::{OrderAction, OrderDecision, OrderPlanner};
pub use processor::SignalProcessor;
pub use queue::SignalQueue;
