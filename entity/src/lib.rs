pub mod prelude;

pub mod job_application;
