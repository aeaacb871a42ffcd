pub mod indicator;
pub mod response;

pub use indicator::Indicator;
pub use response::ErrorEnvelope;
