//! Post-generation cleanup of leaked template scaffolding.
//!
//! Small models regularly echo role markers, header blocks and other chat-template
//! debris into their replies. `sanitize` strips that debris and leaves ordinary prose
//! alone. It never fails and is idempotent.

use tracing::trace;

/// Replies longer than this (in chars) may be re-anchored at a sentence opener.
const REANCHOR_MIN_CHARS: usize = 200;

const HEADER_OPEN: &str = "<|start_header_id|>";
const HEADER_CLOSE: &str = "<|end_header_id|>";

/// Tokens that may be followed by a bare role word.
const ROLE_OPENERS: &[&str] = &["<|im_start|>", "<start_of_turn>"];
const ROLE_WORDS: &[&str] = &["system", "user", "assistant", "model"];

const STRAY_TOKENS: &[&str] = &[
    "<|eot_id|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|end|>",
    "<|user|>",
    "<|assistant|>",
    "<|system|>",
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<s>",
    "</s>",
    "[INST]",
    "[/INST]",
    "<end_of_turn>",
];

const DELIMITER_FRAGMENTS: &[&str] = &["<|", "|>", "[INST", "<start_of_turn", "<end_of_turn"];

const OPENERS: &[&str] = &[
    "Sure",
    "Certainly",
    "Of course",
    "Here is",
    "Here's",
    "Hello",
    "Hi",
    "Yes",
    "No",
    "The ",
    "I ",
];

/// Strip chat-template debris from a model reply.
///
/// Text without any debris comes back exactly as given, whitespace included.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    let mut n = 0usize;
    loop {
        let next = pass(&current);
        // Every rule only removes text, so a changed pass is strictly shorter.
        if next.len() >= current.len() {
            return current;
        }
        trace!(pass = n, before = current.len(), after = next.len(), "sanitize pass");
        current = next;
        n += 1;
    }
}

fn pass(text: &str) -> String {
    let mut out = strip_header_blocks(text);
    out = strip_stray_tokens(&out);
    out = strip_brace_runs(&out);
    out = collapse_newlines(&out);
    out = drop_lines(&out);
    let mut changed = out != text;
    if let Some(at) = reanchor(&out) {
        out = out[at..].to_string();
        changed = true;
    }
    if changed {
        out = out.trim().to_string();
    }
    out
}

/// Remove `<|start_header_id|>…<|end_header_id|>` including the body.
fn strip_header_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(HEADER_OPEN) {
        let after_open = &rest[open + HEADER_OPEN.len()..];
        let Some(close) = after_open.find(HEADER_CLOSE) else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &after_open[close + HEADER_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

fn strip_stray_tokens(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let before = out.len();
        for opener in ROLE_OPENERS {
            out = strip_role_opener(&out, opener);
        }
        for tok in STRAY_TOKENS {
            if out.contains(tok) {
                out = out.replace(tok, "");
            }
        }
        if out.len() == before {
            return out;
        }
    }
}

/// Remove `opener` and a role word directly after it.
fn strip_role_opener(text: &str, opener: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find(opener) {
        out.push_str(&rest[..at]);
        rest = &rest[at + opener.len()..];
        if let Some(word) = ROLE_WORDS.iter().find(|w| starts_with_word(rest, w)) {
            rest = &rest[word.len()..];
        }
    }
    out.push_str(rest);
    out
}

/// Remove every run of four or more `{`.
fn strip_brace_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '{' {
            run += 1;
            continue;
        }
        if (1..4).contains(&run) {
            out.extend(std::iter::repeat_n('{', run));
        }
        run = 0;
        out.push(c);
    }
    if (1..4).contains(&run) {
        out.extend(std::iter::repeat_n('{', run));
    }
    out
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            run += 1;
            if run > 2 {
                continue;
            }
        } else {
            run = 0;
        }
        out.push(c);
    }
    out
}

fn drop_lines(text: &str) -> String {
    if !text.lines().any(|l| is_delimiter_line(l) || is_noise_line(l)) {
        return text.to_string();
    }
    text.split('\n')
        .filter(|l| !is_delimiter_line(l) && !is_noise_line(l))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_delimiter_line(line: &str) -> bool {
    DELIMITER_FRAGMENTS.iter().any(|f| line.contains(f))
}

/// More than half of the visible chars are symbols that do not occur in prose.
fn is_noise_line(line: &str) -> bool {
    let mut visible = 0usize;
    let mut noise = 0usize;
    for c in line.chars().filter(|c| !c.is_whitespace()) {
        visible += 1;
        if is_noise_char(c) {
            noise += 1;
        }
    }
    visible > 0 && noise * 2 > visible
}

fn is_noise_char(c: char) -> bool {
    if c == '\u{FFFD}' || c.is_control() {
        return true;
    }
    if !c.is_ascii() || c.is_ascii_alphanumeric() {
        return false;
    }
    !matches!(
        c,
        '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' | '(' | ')' | '-' | '/' | '%' | '&' | '*' | '$' | '#' | '@' | '+' | '='
    )
}

/// Byte offset of the first sentence opener in the first third of a long reply,
/// unless the reply already begins with one.
fn reanchor(text: &str) -> Option<usize> {
    let n_chars = text.chars().count();
    if n_chars <= REANCHOR_MIN_CHARS {
        return None;
    }
    let limit = text
        .char_indices()
        .nth(n_chars / 3)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let mut prev: Option<char> = None;
    for (i, c) in text.char_indices() {
        if i >= limit {
            break;
        }
        let at_boundary = prev.is_none_or(|p| !p.is_alphanumeric());
        prev = Some(c);
        if !at_boundary {
            continue;
        }
        if OPENERS.iter().any(|o| starts_with_word(&text[i..], o)) {
            return (i > 0).then_some(i);
        }
    }
    None
}

/// `text` starts with `word`, and the match does not end in the middle of a longer word.
fn starts_with_word(text: &str, word: &str) -> bool {
    if !text.starts_with(word) {
        return false;
    }
    if word.ends_with(' ') {
        return true;
    }
    text[word.len()..]
        .chars()
        .next()
        .is_none_or(|c| !c.is_alphanumeric())
}
