//! Extraction of embedded UI directives from streamed assistant text.
//!
//! The generation engine embeds `{{choice:LABEL}}` and `{{link:URL|LABEL}}`
//! tokens in its output. [`parse`] pulls them out and returns cleaned display
//! text. It is pure and total: malformed-but-closed syntax stays literal, and
//! an unterminated opener at the tail of the text (a streamed token boundary
//! can fall mid-directive) is suppressed from the display until it closes.
//! Because the result is a function of the full accumulated text only, any
//! chunking of a given final text converges to the same result.

const CHOICE_OPEN: &str = "{{choice:";
const LINK_OPEN: &str = "{{link:";
const CLOSE: &str = "}}";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Re-submits `label` as a new user message when activated.
    Choice { label: String },
    /// Opens `url`; never re-enters the conversation.
    Link { url: String, label: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    pub display: String,
    pub directives: Vec<Directive>,
}

enum Token {
    Choice { consumed: usize, label: String },
    Link { consumed: usize, url: String, label: String },
    /// Unterminated opener running to the end of the text.
    Dangling,
    /// Not a directive; the braces stay in the display text.
    Literal,
}

/// Extract directives from `raw` in left-to-right order of first full
/// appearance. Duplicate choice labels are dropped, keeping the first
/// occurrence. Safe to call on every successive prefix of a streamed text.
pub fn parse(raw: &str) -> Parsed {
    let mut display = String::with_capacity(raw.len());
    let mut directives = Vec::new();
    let mut i = 0;

    while let Some(offset) = raw[i..].find("{{") {
        let start = i + offset;
        display.push_str(&raw[i..start]);
        match classify(&raw[start..]) {
            Token::Choice { consumed, label } => {
                let duplicate = directives
                    .iter()
                    .any(|d| matches!(d, Directive::Choice { label: seen } if *seen == label));
                if !duplicate {
                    directives.push(Directive::Choice { label });
                }
                i = start + consumed;
            }
            Token::Link {
                consumed,
                url,
                label,
            } => {
                directives.push(Directive::Link { url, label });
                i = start + consumed;
            }
            Token::Dangling => {
                // Suppress the partial span; it resolves on a later chunk
                // or stays hidden if the text ends mid-directive.
                i = raw.len();
            }
            Token::Literal => {
                // Advance a single brace so an opener overlapping this pair
                // (`{{{choice:` opens at the second `{`) is still scanned.
                display.push('{');
                i = start + 1;
            }
        }
    }
    display.push_str(&raw[i..]);

    Parsed {
        display: tidy(&display),
        directives,
    }
}

/// Classify the span beginning at a `{{`. `tail` always runs to the end of
/// the raw text.
fn classify(tail: &str) -> Token {
    if let Some(body) = tail.strip_prefix(CHOICE_OPEN) {
        return match body.find(CLOSE) {
            Some(end) => {
                let label = &body[..end];
                // A stray `}` inside the body means the closer we found does
                // not delimit a well-formed token; leave it all literal.
                if label.contains('}') || label.trim().is_empty() {
                    Token::Literal
                } else {
                    Token::Choice {
                        consumed: CHOICE_OPEN.len() + end + CLOSE.len(),
                        label: label.trim().to_string(),
                    }
                }
            }
            None => Token::Dangling,
        };
    }

    if let Some(body) = tail.strip_prefix(LINK_OPEN) {
        return match body.find(CLOSE) {
            Some(end) => {
                let body = &body[..end];
                match body.split_once('|') {
                    Some((url, label))
                        if !label.contains('}')
                            && !url.trim().is_empty()
                            && !label.trim().is_empty() =>
                    {
                        Token::Link {
                            consumed: LINK_OPEN.len() + end + CLOSE.len(),
                            url: url.trim().to_string(),
                            label: label.trim().to_string(),
                        }
                    }
                    _ => Token::Literal,
                }
            }
            None => Token::Dangling,
        };
    }

    // The text ends in the middle of an opener (`{{cho`); hold it back until
    // more of the stream arrives.
    if CHOICE_OPEN.starts_with(tail) || LINK_OPEN.starts_with(tail) {
        return Token::Dangling;
    }

    Token::Literal
}

/// Collapse any whitespace run containing 3+ newlines down to a blank line,
/// then trim the ends. Removing directive spans tends to leave these behind.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    let mut newlines = 0;

    for ch in text.chars() {
        if ch.is_whitespace() {
            run.push(ch);
            if ch == '\n' {
                newlines += 1;
            }
        } else {
            if newlines >= 3 {
                out.push_str("\n\n");
            } else {
                out.push_str(&run);
            }
            run.clear();
            newlines = 0;
            out.push(ch);
        }
    }
    if newlines >= 3 {
        out.push_str("\n\n");
    } else {
        out.push_str(&run);
    }

    out.trim().to_string()
}
