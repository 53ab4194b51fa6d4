pub mod event_cloud;

pub use event_cloud::EventCloud;
