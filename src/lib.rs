pub mod audit;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod pipeline;
pub mod questions; // Default research question set
pub mod report;
pub mod session;
pub mod store;
