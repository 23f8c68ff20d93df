//! Asynchronous image captioning service
//!
//! A gateway accepts an image reference (URL, inline base64, or file upload),
//! queues a caption job and returns its id at once. Worker processes take jobs
//! off the shared queue, normalize the image, run the captioning model and
//! store a terminal SUCCESS or FAILURE record that clients poll for.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
