//! Resolution of node parameters and interface paths against earlier results.

pub mod params;
pub mod reference;
pub mod url;

pub use params::{FormField, FormPayload, Payload, process_params};
pub use reference::{Reference, ResultSource};
pub use url::process_url_template;
