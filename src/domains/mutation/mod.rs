pub mod registry;
pub mod repository;
pub mod service;
pub mod transaction;
pub mod types;

pub use registry::{MutationDefinition, MutationRegistry, MutationReplayHandler};
pub use repository::{KvMutationQueueRepository, MutationQueueRepository, MUTATION_QUEUE_KEY};
pub use service::{MutationQueueService, OptimisticMutation};
pub use transaction::OptimisticTransaction;
pub use types::{
    MutationFlushReport, MutationOutcome, MutationPriority, MutationQueueStats, MutationStatus,
    QueuedMutation,
};
