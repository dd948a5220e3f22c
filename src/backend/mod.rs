//! Backend Module
//!
//! Transport adapter for the code-generation backend. The backend is an
//! external collaborator; only its request/response contract lives here.

mod client;

pub use client::{BackendHttpClient, request_timeout, TIMEOUT_COMPLEX, TIMEOUT_MASSIVE, TIMEOUT_SIMPLE};
