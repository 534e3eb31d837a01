//! Production implementations of the collaborator seams.

pub mod http_detector;
pub mod log_sender;
pub mod proc_sampler;
pub mod webhook;

pub use http_detector::HttpShiftDetector;
pub use log_sender::LogNotificationSender;
pub use proc_sampler::ProcResourceSampler;
pub use webhook::WebhookNotificationSender;
