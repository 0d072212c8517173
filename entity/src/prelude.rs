pub use super::job_application::Entity as JobApplication;
