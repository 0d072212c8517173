pub mod job_application;
pub mod normalize;
pub mod record;
