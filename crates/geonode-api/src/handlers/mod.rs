pub mod assets;
pub mod executions;
pub mod health;
pub mod limits;
pub mod remote_hosts;
pub mod resources;
pub mod uploads;
