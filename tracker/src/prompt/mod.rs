pub mod hugging_face;
pub mod job_extraction;
