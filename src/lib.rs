//! Facade over the workspace crates

pub use inf::{Error, Result};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub use sqlite;
