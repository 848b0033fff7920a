use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown interpolation {0:?}.")]
    UnknownInterpolation(String),
    #[error("Unknown extraction preset {0:?}.")]
    UnknownPreset(String),
    #[error("Could not find any image in root: {0}.")]
    NoImagesFound(PathBuf),
    #[error("Image {name:?} does not exist in root: {root}.")]
    ImageNotFound { name: String, root: PathBuf },
    #[error("Could not decode the image payload for {0:?}.")]
    InvalidPayload(String),
    #[error("Either an export directory or an explicit feature path is required.")]
    NoOutputPath,
    #[error("Out of disk space while writing {name:?} to the feature store.")]
    StorageFull {
        name: String,
        #[source]
        source: hdf5::Error,
    },
    #[error("Feature store write failed for {name:?}.")]
    Storage {
        name: String,
        #[source]
        source: hdf5::Error,
    },
    #[error("Could not canonicalize the extractor configuration.")]
    ConfigKey(#[source] serde_json::Error),
    #[error(transparent)]
    Store(#[from] hdf5::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Inference(#[from] ort::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
