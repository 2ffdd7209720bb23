pub mod orchestrator;
pub mod recorder;
pub mod timer;
