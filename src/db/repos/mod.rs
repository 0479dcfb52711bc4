pub mod admin_config;
pub mod job_postings;
pub mod metering;
pub mod persona_jobs;
pub mod personas;
pub mod resumes;
pub mod sources;
pub mod users;
