//! Chat line wrapping: one logical message in, wire-ready Message packets
//! out.
//!
//! Lines are packed greedily at word boundaries into the 64-byte Message
//! text field. Color codes count toward line width, carry over across
//! line breaks, and semantic aliases resolve against the server's color
//! table at wrap time. Each [`LineWrapper`] is an independent iterator;
//! wrapping the same input twice yields identical sequences.

use std::collections::VecDeque;

use crate::color::{ColorCodes, COLOR_ESCAPE};
use crate::packet::{Packet, STRING_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Color(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(Vec<Piece>),
    Newline,
}

/// Wire length of a word: printable characters plus two bytes per
/// embedded color code.
fn word_len(pieces: &[Piece]) -> usize {
    pieces
        .iter()
        .map(|p| match p {
            Piece::Text(t) => t.chars().count(),
            Piece::Color(_) => 2,
        })
        .sum()
}

fn push_char(word: &mut Vec<Piece>, ch: char) {
    if let Some(Piece::Text(t)) = word.last_mut() {
        t.push(ch);
    } else {
        word.push(Piece::Text(ch.to_string()));
    }
}

fn flush_word(tokens: &mut VecDeque<Token>, word: &mut Vec<Piece>) {
    if !word.is_empty() {
        tokens.push_back(Token::Word(std::mem::take(word)));
    }
}

/// Split a message into words, resolved color codes, and newline markers.
/// `&&` escapes a literal ampersand, `&n` is a manual newline, and an `&`
/// followed by anything unrecognized is dropped silently.
fn tokenize(message: &str, colors: &ColorCodes) -> VecDeque<Token> {
    let mut tokens = VecDeque::new();
    let mut word: Vec<Piece> = Vec::new();
    let mut chars = message.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                flush_word(&mut tokens, &mut word);
                tokens.push_back(Token::Newline);
            }
            ' ' => flush_word(&mut tokens, &mut word),
            COLOR_ESCAPE => match chars.next() {
                Some(COLOR_ESCAPE) => push_char(&mut word, COLOR_ESCAPE),
                Some('n') | Some('N') => {
                    flush_word(&mut tokens, &mut word);
                    tokens.push_back(Token::Newline);
                }
                Some(code) => {
                    if let Some(color) = colors.resolve(code) {
                        word.push(Piece::Color(color));
                    }
                }
                None => {}
            },
            other => push_char(&mut word, other),
        }
    }
    flush_word(&mut tokens, &mut word);
    tokens
}

/// Lazily wraps one chat message into Message packets.
///
/// The prefix goes in front of the first produced line. Manual newlines
/// (`&n` or `\n`) start a fresh segment; with `prefix_each_segment` set,
/// the first wrapped line of every segment is prefixed, but continuation
/// lines within a segment never are.
#[derive(Debug)]
pub struct LineWrapper {
    tokens: VecDeque<Token>,
    prefix: String,
    prefix_each_segment: bool,
    sender: i8,
    carry_color: Option<char>,
    at_segment_start: bool,
    first_segment: bool,
}

impl LineWrapper {
    pub fn new(prefix: &str, message: &str, colors: &ColorCodes) -> Self {
        Self::with_options(prefix, message, colors, false)
    }

    pub fn with_options(
        prefix: &str,
        message: &str,
        colors: &ColorCodes,
        prefix_each_segment: bool,
    ) -> Self {
        Self {
            tokens: tokenize(message, colors),
            prefix: prefix.to_string(),
            prefix_each_segment,
            sender: 0,
            carry_color: None,
            at_segment_start: true,
            first_segment: true,
        }
    }

    /// Stamp produced packets with a sender entity ID instead of 0.
    pub fn from_sender(mut self, sender: i8) -> Self {
        self.sender = sender;
        self
    }

    fn strip_trailing(line: &mut Vec<Piece>) {
        loop {
            let drop_last = match line.last_mut() {
                Some(Piece::Color(_)) => true,
                Some(Piece::Text(t)) => {
                    while t.ends_with(' ') {
                        t.pop();
                    }
                    t.is_empty()
                }
                None => return,
            };
            if drop_last {
                line.pop();
            } else {
                return;
            }
        }
    }
}

impl Iterator for LineWrapper {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        loop {
            if self.tokens.is_empty() {
                return None;
            }

            let use_prefix =
                self.at_segment_start && (self.first_segment || self.prefix_each_segment);
            let mut line: Vec<Piece> = Vec::new();
            let mut line_len = if use_prefix {
                self.prefix.chars().count()
            } else {
                0
            };
            if let Some(color) = self.carry_color {
                line.push(Piece::Color(color));
                line_len += 2;
            }

            let mut placed_word = false;
            let mut saw_newline = false;
            loop {
                let next_word_len = match self.tokens.front() {
                    None => break,
                    Some(Token::Newline) => None,
                    Some(Token::Word(pieces)) => Some(word_len(pieces)),
                };
                let wlen = match next_word_len {
                    None => {
                        self.tokens.pop_front();
                        saw_newline = true;
                        break;
                    }
                    Some(len) => len,
                };
                if placed_word && line_len + 1 + wlen > STRING_LEN {
                    // Wrap here; the word stays queued for the next line.
                    // A word that is alone on a line is placed regardless
                    // of width.
                    break;
                }
                let pieces = match self.tokens.pop_front() {
                    Some(Token::Word(pieces)) => pieces,
                    _ => unreachable!("front token was a word"),
                };
                if placed_word {
                    line.push(Piece::Text(" ".to_string()));
                    line_len += 1;
                }
                for piece in pieces {
                    match piece {
                        Piece::Text(t) => {
                            line_len += t.chars().count();
                            line.push(Piece::Text(t));
                        }
                        Piece::Color(c) => {
                            line_len += 2;
                            self.carry_color = Some(c);
                            line.push(Piece::Color(c));
                        }
                    }
                }
                placed_word = true;
            }

            Self::strip_trailing(&mut line);
            if saw_newline {
                self.first_segment = false;
            }

            let has_text = line.iter().any(|p| matches!(p, Piece::Text(_)));
            if !has_text {
                // Nothing printable survived stripping; drop the line.
                if saw_newline {
                    self.at_segment_start = true;
                }
                continue;
            }

            let mut text = if use_prefix {
                self.prefix.clone()
            } else {
                String::new()
            };
            for piece in &line {
                match piece {
                    Piece::Text(t) => text.push_str(t),
                    Piece::Color(c) => {
                        text.push(COLOR_ESCAPE);
                        text.push(*c);
                    }
                }
            }
            self.at_segment_start = saw_newline;
            return Some(Packet::message(self.sender, &text));
        }
    }
}
