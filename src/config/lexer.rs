//! Tokenizer for the configuration file.
//!
//! The grammar only needs four token kinds: bare words, `{`, `}` and `;`.
//! Braces and semicolons delimit themselves even when glued to a word, and
//! `#` starts a comment running to end of line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    OpenBrace,
    CloseBrace,
    Semicolon,
}

/// A token plus the line it started on, for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub fn tokenize(input: &str) -> Vec<Spanned> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut line = 1;
    let mut word_line = 1;
    let mut in_comment = false;

    let mut flush = |word: &mut String, tokens: &mut Vec<Spanned>, line| {
        if !word.is_empty() {
            tokens.push(Spanned {
                token: Token::Word(std::mem::take(word)),
                line,
            });
        }
    };

    for c in input.chars() {
        if c == '\n' {
            in_comment = false;
        }
        if in_comment {
            if c == '\n' {
                line += 1;
            }
            continue;
        }
        match c {
            '#' => {
                flush(&mut word, &mut tokens, word_line);
                in_comment = true;
            }
            '{' | '}' | ';' => {
                flush(&mut word, &mut tokens, word_line);
                let token = match c {
                    '{' => Token::OpenBrace,
                    '}' => Token::CloseBrace,
                    _ => Token::Semicolon,
                };
                tokens.push(Spanned { token, line });
            }
            c if c.is_whitespace() => {
                flush(&mut word, &mut tokens, word_line);
                if c == '\n' {
                    line += 1;
                }
            }
            c => {
                if word.is_empty() {
                    word_line = line;
                }
                word.push(c);
            }
        }
    }
    flush(&mut word, &mut tokens, word_line);
    tokens
}
