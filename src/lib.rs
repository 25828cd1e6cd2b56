// Public API - discovery engine, graph types and export functions
pub mod config;
pub mod export;
pub mod probe;
pub mod state;
pub mod trace;

// CLI surface, shared with the binary
pub mod cli;
