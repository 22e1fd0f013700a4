// Configuration module
pub mod config;

// Workflow state persistence module
pub mod state;

// Gate state machine module
pub mod gates;

// Completion guard module
pub mod completion;

// Model tier router module
pub mod router;

// Staleness detection module
pub mod staleness;

// Swarm dispatcher module
pub mod swarm;

// Orchestrator service module
pub mod orchestrator;

// Agent-session service client module
pub mod session;

// Tool surface module
pub mod tools;
