//! TripWithU API Client Library
//!
//! This crate provides the client-side auth and transport layer for the
//! TripWithU API: a session token store with automatic refresh, an
//! authenticated request dispatcher, and the TripClient agent tying the
//! two together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod http;
pub mod jwt;
pub mod session;

pub use client::{LoginData, LoginRequest, TripClient};
pub use http::{
    api_retry, ApiError, AuthMode, Body, Envelope, ErrorBody, HttpClient, HttpClientConfig,
    Method, RequestOptions, RetryConfig,
};
pub use session::{AccessToken, AuthRecord, SessionStore, AUTH_STORAGE_KEY};
