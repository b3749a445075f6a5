//! Command parser (C2): split a line into an uppercased verb and a raw,
//! unparsed argument.

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb, ASCII-uppercased.
    pub verb: String,
    /// Everything after the verb and its separating whitespace, verbatim.
    /// Individual handlers are responsible for further parsing.
    pub arg: String,
}

impl Command {
    /// Parses a single command line (already stripped of its CR LF).
    pub fn parse(line: &str) -> Command {
        let trimmed = line.trim_start_matches([' ', '\t']);
        let verb_end = trimmed
            .find(|c: char| c == ' ' || c == '\t')
            .unwrap_or(trimmed.len());
        let (verb, rest) = trimmed.split_at(verb_end);
        let arg = rest.trim_start_matches([' ', '\t']);

        Command {
            verb: verb.to_ascii_uppercase(),
            arg: arg.to_string(),
        }
    }
}
