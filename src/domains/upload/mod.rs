pub mod codec;
pub mod repository;
pub mod service;
pub mod types;
pub mod uploader;

pub use codec::{Base64Codec, FileCodec, RawBytesCodec};
pub use repository::{FileQueueRepository, KvFileQueueRepository, FILE_QUEUE_KEY};
pub use service::FileUploadQueue;
pub use types::{
    AdmissionDecision, AdmissionRejection, FileDescriptor, FileQueueStats, FileUploadStatus,
    NewFile, QueuedFile, UploadPassReport,
};
pub use uploader::{ApiFileUploader, FileUploader};
