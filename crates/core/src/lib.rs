pub mod classifier;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod inventory;
pub mod naming;
pub mod reorganize;
pub mod report;
pub mod signature;
pub mod stats;
pub mod workflow;

#[cfg(test)]
mod test_support;
