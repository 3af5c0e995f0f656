//! Loading and sharing of the read-mostly state kairos-core consumes:
//! pipeline configuration (TOML), phrase libraries (TOML) and learned
//! guidance (JSON).

pub mod config;
pub mod error;
pub mod guidance;
pub mod phrases;

pub use config::{load_config, parse_config, sanitize, to_toml};
pub use error::{Result, StoreError};
pub use guidance::{load_guidance, parse_guidance};
pub use phrases::{SharedPhraseStore, load_phrases, parse_phrases};
