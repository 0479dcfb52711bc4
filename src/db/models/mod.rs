mod admin_config;
mod job_posting;
mod metering;
mod persona;
mod persona_job;
mod resume;
mod user;

pub use admin_config::*;
pub use job_posting::*;
pub use metering::*;
pub use persona::*;
pub use persona_job::*;
pub use resume::*;
pub use user::*;
