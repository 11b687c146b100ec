pub mod sentence;
pub mod topic;

pub use sentence::{ReviewAnalysis, Sentence};
pub use topic::Topic;
