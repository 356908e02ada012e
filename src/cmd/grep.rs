use clap::Parser;

use super::{EngineArgs, StorageArgs};

/// Count the matches of a regular expression and list them by decreasing
/// frequency.
#[derive(Parser, Debug)]
#[command(name = "grep", version, about, long_about = None)]
pub struct Args {
    /// Input object, directory or glob
    pub input: String,

    /// Output directory; must not exist yet
    pub output: String,

    /// Regular expression to count
    #[arg(allow_hyphen_values = true)]
    pub pattern: String,

    /// Capture group to count instead of the whole match
    pub group: Option<usize>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn needs_three_positionals() {
        let err = Args::try_parse_from(["grep", "in", "out"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);

        let args = Args::try_parse_from(["grep", "in", "out", "th(e)", "1"]).unwrap();
        assert_eq!(args.pattern, "th(e)");
        assert_eq!(args.group, Some(1));
    }

    #[test]
    fn pattern_may_start_with_a_dash() {
        let args = Args::try_parse_from(["grep", "in", "out", "-[0-9]+"]).unwrap();
        assert_eq!(args.pattern, "-[0-9]+");
        assert_eq!(args.group, None);

        let args = Args::try_parse_from(["grep", "in", "out", "-(\\d)", "1", "-r", "2"]).unwrap();
        assert_eq!(args.pattern, "-(\\d)");
        assert_eq!(args.group, Some(1));
        assert_eq!(args.engine.reducers, 2);
    }

    #[test]
    fn group_must_be_a_number() {
        let err = Args::try_parse_from(["grep", "in", "out", "x", "one"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
