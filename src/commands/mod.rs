// ABOUTME: Command implementations behind the CLI
// ABOUTME: Exports run (one replication pass) and status (checkpoint report)

pub mod run;
pub mod status;

pub use run::run;
pub use status::status;
