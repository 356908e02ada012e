//! Converts MapReduce application names to actual application code.
//!
//! # Example
//!
//! To get the word count application:
//! ```
//! # use mrlite::Result;
//! use mrlite::workload;
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc", &[], 4)?;
//! assert_eq!(wc.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::standalone::JobChain;
use crate::{Error, Result};

pub mod common;
pub mod grep;
pub mod line_count;
pub mod wc;

/// Names accepted by [`named`].
pub const NAMES: &[&str] = &["wc", "line-count", "grep", "grep-sort"];

/// Gets the application named `name`, configured from `args`, as a chain
/// of one or more stages. `reducers` applies to the counting stage.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str, args: &[String], reducers: u32) -> Option<Result<JobChain>> {
    let chain = match name {
        "wc" => Ok(JobChain::new("wc").stage(wc::job(reducers))),
        "line-count" => Ok(JobChain::new("line-count").stage(line_count::job())),
        "grep" => grep::from_args(args, reducers),
        "grep-sort" => grep::sorted_from_args(args, reducers),
        _ => return None,
    };
    Some(chain)
}

/// Gets the application named `name`.
///
/// Returns [`Error::Usage`] if no application with the given name was found.
pub fn named(name: &str, args: &[String], reducers: u32) -> Result<JobChain> {
    match try_named(name, args, reducers) {
        Some(chain) => chain,
        None => Err(Error::Usage(format!(
            "no workload named `{name}` (expected one of: {})",
            NAMES.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        let grep_args = vec!["-t".to_string(), "a+".to_string()];
        for name in NAMES {
            let chain = named(name, &grep_args, 2).unwrap();
            assert!(chain.validate().is_ok(), "{name}");
        }
        assert_eq!(named("grep-sort", &grep_args, 2).unwrap().len(), 2);
        assert!(matches!(named("nope", &[], 1), Err(Error::Usage(_))));
        assert!(matches!(named("grep", &[], 1), Err(Error::Usage(_))));
    }
}
