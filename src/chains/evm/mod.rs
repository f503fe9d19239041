pub mod bloom;
pub mod client;
