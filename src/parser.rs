//! Command line parsing.
//!
//! A line is first cut into segments at unquoted operators (`|`, `>`, `>>`, `<`), then
//! the primary segment is variable-expanded and split into words. Quote characters are
//! kept in the words; [`unquote`] strips them when a command needs the grouped text.

use crate::env::Environment;
use crate::error::{Result, ShellError};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)|%(\w+)%").unwrap());

/// Result of parsing one command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    pub raw_input: String,
    pub command: String,
    /// Arguments with their quote characters still in place.
    pub arguments: Vec<String>,
    /// Commands that follow a `|`, each parsed on its own.
    pub piped: Vec<ParsedCommand>,
    pub output_redirect: Option<String>,
    pub input_redirect: Option<String>,
    /// `>>` rather than `>`.
    pub append: bool,
}

impl ParsedCommand {
    pub fn is_piped(&self) -> bool {
        !self.piped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Pipe,
    Output,
    Append,
    Input,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '|' => Some(Operator::Pipe),
            '>' => Some(Operator::Output),
            '<' => Some(Operator::Input),
            _ => None,
        }
    }

    /// Operator spelled with its character doubled (`>>`, `||`, `<<`).
    fn doubled(self) -> Self {
        match self {
            Operator::Output => Operator::Append,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Op(Operator, String),
}

/// Tracks whether the scanner is inside a quoted span.
///
/// Both `"` and `'` open a span, which is closed only by the same character. A quote
/// preceded by a backslash never toggles.
#[derive(Debug, Default, Clone, Copy)]
struct QuoteState {
    open: Option<char>,
}

impl QuoteState {
    /// Feeds one character; returns `true` if it opened or closed a quoted span.
    fn feed(&mut self, c: char, prev: Option<char>) -> bool {
        if !matches!(c, '"' | '\'') || prev == Some('\\') {
            return false;
        }
        match self.open {
            None => {
                self.open = Some(c);
                true
            }
            Some(q) if q == c => {
                self.open = None;
                true
            }
            Some(_) => false,
        }
    }

    fn inside(&self) -> bool {
        self.open.is_some()
    }
}

/// Parse a command line. Returns `None` only for blank input.
pub fn parse(input: &str, env: &Environment) -> Option<ParsedCommand> {
    if input.trim().is_empty() {
        return None;
    }

    let mut result = ParsedCommand {
        raw_input: input.to_string(),
        ..ParsedCommand::default()
    };

    let segments = split_segments(input);
    let mut primary = String::new();
    let mut seen_operator = false;
    let mut i = 0;
    while i < segments.len() {
        match &segments[i] {
            Segment::Text(text) => {
                if !seen_operator {
                    primary.push_str(text);
                }
            }
            Segment::Op(Operator::Pipe, _) => {
                let rest: String = segments[i + 1..].iter().map(segment_text).collect();
                if let Some(sub) = parse(&rest, env) {
                    result.piped.push(sub);
                }
                break;
            }
            Segment::Op(op, _) => {
                seen_operator = true;
                let target = match segments.get(i + 1) {
                    Some(Segment::Text(text)) if !text.trim().is_empty() => {
                        i += 1;
                        Some(expand_variables(text.trim(), env))
                    }
                    _ => None,
                };
                match op {
                    Operator::Input => result.input_redirect = target,
                    Operator::Append => {
                        result.output_redirect = target;
                        result.append = true;
                    }
                    _ => {
                        result.output_redirect = target;
                        result.append = false;
                    }
                }
            }
        }
        i += 1;
    }

    let mut words = tokenize(&expand_variables(&primary, env)).into_iter();
    if let Some(command) = words.next() {
        result.command = command;
        result.arguments = words.collect();
    }
    Some(result)
}

fn segment_text(segment: &Segment) -> &str {
    match segment {
        Segment::Text(text) | Segment::Op(_, text) => text,
    }
}

/// Cut `input` at every unquoted operator. Each operator becomes its own segment.
fn split_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quotes = QuoteState::default();
    let mut prev = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        let toggled = quotes.feed(c, prev);
        match Operator::from_char(c) {
            Some(op) if !toggled && !quotes.inside() => {
                if !current.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut current)));
                }
                let mut spelled = c.to_string();
                let op = if chars.peek() == Some(&c) {
                    chars.next();
                    spelled.push(c);
                    op.doubled()
                } else {
                    op
                };
                segments.push(Segment::Op(op, spelled));
            }
            _ => current.push(c),
        }
        prev = Some(c);
    }
    if !current.is_empty() {
        segments.push(Segment::Text(current));
    }
    segments
}

/// Replace `${name}`, `$name` and `%name%` with variable values. Unknown names are
/// left untouched.
pub fn expand_variables(input: &str, env: &Environment) -> String {
    VARIABLE
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            match env.get_var(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Split on unquoted whitespace. Quote characters stay in the words.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quotes = QuoteState::default();
    let mut prev = None;

    for c in input.chars() {
        quotes.feed(c, prev);
        if c.is_whitespace() && !quotes.inside() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Remove quote delimiters from a word; `\"` and `\'` become the bare quote.
pub fn unquote(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut quotes = QuoteState::default();
    let mut prev = None;
    let mut chars = word.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && matches!(chars.peek(), Some('"' | '\'')) {
            prev = Some(c);
            continue;
        }
        if !quotes.feed(c, prev) {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// One command of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
    pub command: String,
    pub arguments: Vec<String>,
    /// Resolved once when the pipeline is built.
    pub builtin: bool,
}

/// Two or more stages, each feeding the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    pub fn new(stages: Vec<PipelineStage>) -> Result<Self> {
        if stages.len() < 2 {
            return Err(ShellError::Parse(
                "Invalid pipeline - at least two commands required".to_string(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<PipelineStage> {
        self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn env() -> Environment {
        let mut env = Environment::new(&EngineConfig::default());
        env.set_var("A", "1");
        env.set_var("NAME", "world");
        env
    }

    fn words(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn blank_input_is_none() {
        assert!(parse("", &env()).is_none());
        assert!(parse("   \t ", &env()).is_none());
    }

    #[test]
    fn simple_command() {
        let cmd = parse("echo hello world", &env()).unwrap();
        assert_eq!(cmd.raw_input, "echo hello world");
        assert_eq!(cmd.command, "echo");
        assert_eq!(cmd.arguments, words(&["hello", "world"]));
        assert!(!cmd.is_piped());
        assert_eq!(cmd.output_redirect, None);
    }

    #[test]
    fn quotes_group_words_and_are_kept() {
        let cmd = parse(r#"echo "hello   world" 'a b' c"#, &env()).unwrap();
        assert_eq!(
            cmd.arguments,
            words(&[r#""hello   world""#, "'a b'", "c"])
        );
    }

    #[test]
    fn expands_all_variable_forms() {
        let cmd = parse("echo %A% $A ${A} $NAME!", &env()).unwrap();
        assert_eq!(cmd.arguments, words(&["1", "1", "1", "world!"]));
    }

    #[test]
    fn unknown_variables_stay_verbatim() {
        let cmd = parse("echo %NOPE_XYZ% $NOPE_XYZ ${NOPE_XYZ}", &env()).unwrap();
        assert_eq!(
            cmd.arguments,
            words(&["%NOPE_XYZ%", "$NOPE_XYZ", "${NOPE_XYZ}"])
        );
    }

    #[test]
    fn output_redirection() {
        let cmd = parse("echo hi > out.txt", &env()).unwrap();
        assert_eq!(cmd.command, "echo");
        assert_eq!(cmd.arguments, words(&["hi"]));
        assert_eq!(cmd.output_redirect.as_deref(), Some("out.txt"));
        assert!(!cmd.append);
    }

    #[test]
    fn append_redirection() {
        let cmd = parse("echo hi >> out.txt", &env()).unwrap();
        assert_eq!(cmd.output_redirect.as_deref(), Some("out.txt"));
        assert!(cmd.append);
    }

    #[test]
    fn input_redirection() {
        let cmd = parse("sort < data.txt", &env()).unwrap();
        assert_eq!(cmd.command, "sort");
        assert!(cmd.arguments.is_empty());
        assert_eq!(cmd.input_redirect.as_deref(), Some("data.txt"));
    }

    #[test]
    fn redirection_without_target() {
        let cmd = parse("echo hi >", &env()).unwrap();
        assert_eq!(cmd.command, "echo");
        assert_eq!(cmd.output_redirect, None);
    }

    #[test]
    fn pipe_parses_rest_as_sub_command() {
        let cmd = parse("dir | sort /r | more", &env()).unwrap();
        assert_eq!(cmd.command, "dir");
        assert!(cmd.arguments.is_empty());
        assert_eq!(cmd.piped.len(), 1);
        let sort = &cmd.piped[0];
        assert_eq!(sort.command, "sort");
        assert_eq!(sort.arguments, words(&["/r"]));
        assert_eq!(sort.piped[0].command, "more");
    }

    #[test]
    fn quoted_operators_are_literal() {
        let cmd = parse(r#"echo "a | b > c""#, &env()).unwrap();
        assert!(!cmd.is_piped());
        assert_eq!(cmd.output_redirect, None);
        assert_eq!(cmd.arguments, words(&[r#""a | b > c""#]));
    }

    #[test]
    fn escaped_quote_does_not_open_span() {
        let cmd = parse(r#"echo \"a | b"#, &env()).unwrap();
        assert!(cmd.is_piped());
        assert_eq!(cmd.arguments, words(&[r#"\"a"#]));
    }

    #[test]
    fn doubled_operator_is_one_segment() {
        assert_eq!(
            split_segments("a>>b"),
            vec![
                Segment::Text("a".into()),
                Segment::Op(Operator::Append, ">>".into()),
                Segment::Text("b".into()),
            ]
        );
    }

    #[test]
    fn unquote_strips_delimiters() {
        assert_eq!(unquote(r#""hello world""#), "hello world");
        assert_eq!(unquote("'it'"), "it");
        assert_eq!(unquote(r#""it's""#), "it's");
        assert_eq!(unquote(r#"say\"hi\""#), r#"say"hi""#);
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn pipeline_requires_two_stages() {
        let stage = PipelineStage {
            command: "echo".into(),
            arguments: vec![],
            builtin: true,
        };
        let err = Pipeline::new(vec![stage.clone()]).unwrap_err();
        assert!(matches!(err, ShellError::Parse(_)));
        assert!(err.to_string().contains("at least two commands required"));
        assert_eq!(Pipeline::new(vec![stage.clone(), stage]).unwrap().stages().len(), 2);
    }
}
