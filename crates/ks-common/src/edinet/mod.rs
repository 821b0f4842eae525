pub mod client;
pub mod models;

pub use client::{DocumentFetchType, EdinetClient, EdinetConfig, EdinetError};
pub use models::{DocumentListResponse, EdinetDocument, ListMetadata};
