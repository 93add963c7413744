use serde::{Deserialize, Serialize};

/// Parsed script: a sequence of command lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Command lines in source order.
    pub lines: Vec<Line>,
    /// Original source text, retained for error reporting.
    pub source: String,
}

impl Script {
    /// Construct a script from parsed lines.
    pub fn new(source: impl Into<String>, lines: Vec<Line>) -> Self {
        Self {
            lines,
            source: source.into(),
        }
    }

    /// Whether the script has no commands.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One command: a command word followed by its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// 1-based source line the command starts on.
    pub number: usize,
    /// Words of the command; never empty.
    pub words: Vec<Word>,
}

/// A single word of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Word {
    /// Bare literal text.
    Literal(String),
    /// `$name` variable reference.
    Variable(String),
    /// `[script]` command substitution.
    Substitution(Script),
    /// `{text}` block, kept verbatim.
    Block(String),
    /// Word assembled from several parts (`"quoted"` or mixed bare words).
    Quoted(Vec<Part>),
}

/// Piece of a quoted or mixed word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Part {
    /// Plain text.
    Text(String),
    /// `$name` variable reference.
    Variable(String),
    /// `[script]` command substitution.
    Substitution(Script),
}
