use super::ast::{Line, Part, Script, Word};
use super::{Result, ScriptError};

/// Parse script source text into a [`Script`].
///
/// Commands are separated by newlines or `;`; words by spaces and tabs.
/// `#` at the start of a command comments out the rest of the line.
pub fn parse_script(source: &str) -> Result<Script> {
    let mut parser = Parser::new(source);
    let lines = parser.parse_body(None)?;
    Ok(Script::new(source, lines))
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
    line: usize,
}

type ParseResult<T> = std::result::Result<T, ScriptError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
            line: 1,
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            if ch == b'\n' {
                self.line += 1;
            }
            self.index += 1;
        }
    }

    // Step over one full UTF-8 character.
    fn advance_char(&mut self) {
        let len = self.src[self.index..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        for _ in 0..len {
            self.advance();
        }
    }

    fn skip_blanks(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                b' ' | b'\t' | b'\r' => self.advance(),
                b'\\' if self.peek_char() == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn parse_body(&mut self, terminator: Option<u8>) -> ParseResult<Vec<Line>> {
        let mut lines = Vec::new();
        loop {
            while let Some(ch) = self.current() {
                if ch.is_ascii_whitespace() || ch == b';' {
                    self.advance();
                } else {
                    break;
                }
            }
            let Some(ch) = self.current() else {
                if terminator.is_some() {
                    return Err(self.error("unterminated command substitution"));
                }
                break;
            };
            if Some(ch) == terminator {
                self.advance();
                break;
            }
            if ch == b'#' {
                while let Some(ch) = self.current() {
                    if ch == b'\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            let number = self.line;
            let mut words = Vec::new();
            loop {
                self.skip_blanks();
                match self.current() {
                    None | Some(b'\n') | Some(b';') => break,
                    Some(ch) if Some(ch) == terminator => break,
                    Some(_) => words.push(self.parse_word(terminator)?),
                }
            }
            if !words.is_empty() {
                lines.push(Line { number, words });
            }
        }
        Ok(lines)
    }

    fn parse_word(&mut self, terminator: Option<u8>) -> ParseResult<Word> {
        match self.current() {
            Some(b'{') => self.parse_block().map(Word::Block),
            Some(b'"') => {
                self.advance();
                self.parse_parts(true, terminator).map(Word::Quoted)
            }
            _ => {
                let mut parts = self.parse_parts(false, terminator)?;
                if parts.len() != 1 {
                    return Ok(Word::Quoted(parts));
                }
                Ok(match parts.remove(0) {
                    Part::Text(text) => Word::Literal(text),
                    Part::Variable(name) => Word::Variable(name),
                    Part::Substitution(script) => Word::Substitution(script),
                })
            }
        }
    }

    fn parse_parts(&mut self, quoted: bool, terminator: Option<u8>) -> ParseResult<Vec<Part>> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let Some(ch) = self.current() else {
                if quoted {
                    return Err(self.error("unterminated quoted word"));
                }
                break;
            };
            if quoted && ch == b'"' {
                self.advance();
                break;
            }
            if !quoted
                && (matches!(ch, b' ' | b'\t' | b'\r' | b'\n' | b';') || Some(ch) == terminator)
            {
                break;
            }
            match ch {
                b'$' => match self.parse_variable_name()? {
                    Some(name) => {
                        flush_text(&mut parts, &mut text);
                        parts.push(Part::Variable(name));
                    }
                    None => text.push('$'),
                },
                b'[' => {
                    flush_text(&mut parts, &mut text);
                    parts.push(Part::Substitution(self.parse_substitution()?));
                }
                b'\\' => {
                    self.advance();
                    match self.current() {
                        None => return Err(self.error("incomplete escape")),
                        Some(b'n') => text.push('\n'),
                        Some(b't') => text.push('\t'),
                        Some(b'r') => text.push('\r'),
                        Some(b'\n') => text.push(' '),
                        Some(_) => {
                            let start = self.index;
                            self.advance_char();
                            text.push_str(&self.src[start..self.index]);
                            continue;
                        }
                    }
                    self.advance();
                }
                _ => {
                    let start = self.index;
                    self.advance_char();
                    text.push_str(&self.src[start..self.index]);
                }
            }
        }
        flush_text(&mut parts, &mut text);
        if quoted && parts.is_empty() {
            parts.push(Part::Text(String::new()));
        }
        Ok(parts)
    }

    // Consumes `$` and the name after it; `None` when no name follows.
    fn parse_variable_name(&mut self) -> ParseResult<Option<String>> {
        self.advance();
        if self.current() == Some(b'{') {
            self.advance();
            let start = self.index;
            while let Some(ch) = self.current() {
                if ch == b'}' {
                    let name = self.src[start..self.index].to_string();
                    self.advance();
                    return Ok(Some(name));
                }
                self.advance();
            }
            return Err(self.error("unterminated variable name"));
        }
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.index {
            return Ok(None);
        }
        Ok(Some(self.src[start..self.index].to_string()))
    }

    fn parse_substitution(&mut self) -> ParseResult<Script> {
        self.advance(); // consume '['
        let start = self.index;
        let lines = self.parse_body(Some(b']'))?;
        let source = &self.src[start..self.index.saturating_sub(1)];
        Ok(Script::new(source, lines))
    }

    fn parse_block(&mut self) -> ParseResult<String> {
        self.advance(); // consume '{'
        let start = self.index;
        let mut depth = 1usize;
        while let Some(ch) = self.current() {
            match ch {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let text = self.src[start..self.index].to_string();
                        self.advance();
                        return Ok(text);
                    }
                }
                b'\\' => self.advance(),
                _ => {}
            }
            self.advance();
        }
        Err(self.error("unterminated block"))
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::Syntax(format!("{} at line {}", message, self.line))
    }
}

fn flush_text(parts: &mut Vec<Part>, text: &mut String) {
    if !text.is_empty() {
        parts.push(Part::Text(std::mem::take(text)));
    }
}
