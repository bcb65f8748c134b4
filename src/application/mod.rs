pub mod capabilities;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod orchestrator;
pub mod registry;
pub mod repos;
pub mod share_links;
