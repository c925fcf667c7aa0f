//! Status lines for the vimd commands.
//!
//! Status lines go to stderr, the same stream as the tracing output, so the
//! two interleave in order.

use console::{Style, Term};

/// How a status line is coloured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tone {
    Plain,
    Done,
    Caution,
    Failure,
    Address,
}

impl Tone {
    fn style(self) -> Option<Style> {
        match self {
            Self::Plain => None,
            Self::Done => Some(Style::new().green()),
            Self::Caution => Some(Style::new().yellow()),
            Self::Failure => Some(Style::new().red()),
            Self::Address => Some(Style::new().cyan().bold()),
        }
    }
}

/// Progress reporter shared by `dev`, `build` and `kill`.
///
/// Write failures are ignored: a closed stderr must not abort a preview.
pub(crate) struct Output {
    term: Term,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }

    /// Progress step, e.g. "Converting markdown...".
    pub(crate) fn info(&self, msg: &str) {
        self.line(Tone::Plain, msg);
    }

    /// Completed step.
    pub(crate) fn success(&self, msg: &str) {
        self.line(Tone::Done, msg);
    }

    /// Something the user should know about but that didn't stop the command,
    /// such as a port change.
    pub(crate) fn warning(&self, msg: &str) {
        self.line(Tone::Caution, msg);
    }

    pub(crate) fn error(&self, msg: &str) {
        self.line(Tone::Failure, msg);
    }

    /// The preview URL.
    pub(crate) fn link(&self, msg: &str) {
        self.line(Tone::Address, msg);
    }

    fn line(&self, tone: Tone, msg: &str) {
        let _ = match tone.style() {
            Some(style) => self.term.write_line(&style.apply_to(msg).to_string()),
            None => self.term.write_line(msg),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tone_is_unstyled() {
        assert!(Tone::Plain.style().is_none());
        assert!(Tone::Failure.style().is_some());
    }

    #[test]
    fn test_output_methods_do_not_panic() {
        let output = Output::new();

        output.info("info");
        output.success("success");
        output.warning("warning");
        output.error("error");
        output.link("http://localhost:38080/");
    }
}
