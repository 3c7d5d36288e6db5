pub mod job;
pub mod paper_flow;
pub mod title;

pub use job::{JobStatus, ProcessingJob, ProcessingResult};
pub use paper_flow::{PaperFlow, PipelineDeps};
pub use title::{extract_title, DEFAULT_TITLE};
