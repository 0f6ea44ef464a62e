pub mod ml_model;
pub mod inference;

pub use ml_model::{SketchMlp, SketchMlpConfig};
pub use inference::{export_model, load_classifier, mlp_config, InferenceEngine, SketchClassifier};
