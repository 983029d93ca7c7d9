//! Load stage core: script rendering and job orchestration

pub mod orchestrator;
pub mod script;

pub use orchestrator::{LoadOrchestrator, LoadReceipt};
pub use script::{
    LoadJobSpec, LoadScript, LoadScriptBuilder, ParameterValue, ScriptParameter, StagingId,
};
