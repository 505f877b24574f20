pub mod feedback;
pub mod session;
pub mod settings;
pub mod sink;
pub mod snapshot;
pub mod telemetry;
pub mod util;
pub mod worker;
