pub mod hybrid;
pub mod keywords;
pub mod segmenter;

pub use hybrid::{ClassificationPath, HybridClassifier};
