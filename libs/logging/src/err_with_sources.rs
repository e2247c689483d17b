use core::fmt;
use std::error::Error;

/// Returns a [`fmt::Display`] adapter that prints the error and all its sources,
/// joined with `: `, instead of just the outermost message.
pub fn err_with_sources<'a>(e: &'a (dyn Error + 'static)) -> ErrorWithSources<'a> {
    ErrorWithSources { e }
}

pub struct ErrorWithSources<'a> {
    e: &'a (dyn Error + 'static),
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.e)?;

        let mut source = self.e.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("oh no!")]
    struct Error1;

    #[derive(thiserror::Error, Debug)]
    #[error("failed to do the thing")]
    struct Error2(#[source] Error1);

    #[derive(thiserror::Error, Debug)]
    #[error("argh")]
    struct Error3(#[source] Error2);

    #[test]
    fn prints_errors_with_sources() {
        let error = Error3(Error2(Error1));

        let display = err_with_sources(&error);

        assert_eq!(display.to_string(), "argh: failed to do the thing: oh no!");
    }
}
