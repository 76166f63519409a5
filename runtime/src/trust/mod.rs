//! Trust and safety: which URLs may be loaded at all.

pub mod url_policy;
