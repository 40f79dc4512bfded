pub mod ml_model;
pub mod backbone;
pub mod dataset;
pub mod augmentation;
pub mod batcher;
pub mod artifact;
pub mod training;
pub mod evaluation;
pub mod inference;
pub mod display;

pub use ml_model::{
    class_index, class_name, count_correct, image_to_tensor, rescale_image, resize_image,
    ModelConfig, WasteClassifier, CLASS_NAMES, IMAGE_SIZE, NUM_CLASSES, RESCALE,
};
pub use backbone::{Vgg16Config, Vgg16Features};
pub use dataset::{WasteDataset, WasteItem};
pub use augmentation::Augmenter;
pub use batcher::{BatchSequence, WasteBatch, WasteBatcher};
pub use artifact::{load_classifier, save_classifier};
pub use training::{train_model, EpochMetrics, TrainingPlan, TrainingReport};
pub use evaluation::{evaluate_batches, evaluate_model, EvaluationReport};
pub use inference::{predict, InferenceEngine, Prediction};
pub use display::{display_predictions, display_saved_predictions, DisplayEntry};
