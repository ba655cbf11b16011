//! Upload and retrieval pipelines and the staging area they share.

pub mod retrieval;
pub mod stage;
pub mod upload;

pub use retrieval::{Download, RetrievalError, RetrievalPipeline};
pub use stage::{DownloadStream, StageArea, StageError, StagePurpose, StagedFile};
pub use upload::{UploadError, UploadPipeline, UploadReceipt, UploadSettings};
