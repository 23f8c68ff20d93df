pub mod captioner;
pub mod dispatcher;
pub mod memory_queue;
pub mod normalizer;
pub mod poller;
pub mod queue;
pub mod worker;
