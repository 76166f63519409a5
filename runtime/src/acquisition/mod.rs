//! Network acquisition for sitemap documents.

pub mod http_client;
