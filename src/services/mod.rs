pub mod gemini;
pub mod prompt;
pub mod references;
pub mod script;
pub mod setup;
pub mod workflow;
