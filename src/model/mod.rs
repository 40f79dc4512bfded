pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use model_metadata::{ModelMetadata, METADATA_FORMAT_VERSION};
pub use model_storage::{
    latest_artifact, load_metadata, load_model_binary, load_model_with_metadata,
    resolve_output_path, save_model_with_metadata,
};
pub use config::{
    AppConfig, ArtifactSettings, AugmentationSettings, DataSettings, DeviceType,
    DisplaySettings, ModelSettings, TrainingSettings,
};
