//! Splitting raw markup into text and equation components.

use std::borrow::Cow;

use super::types::{Block, Component, MathStyle, ParseMode};

/// Turns raw input into blocks. Implementations must be pure: identical
/// input yields identical blocks.
pub trait MarkupParser: Send + Sync {
    fn parse(&self, raw_text: &str, mode: ParseMode) -> Vec<Block>;
}

/// Parser for TeX-style math delimiters embedded in plain text.
///
/// Inline: `$…$`, `\(…\)`. Display: `$$…$$`, `\[…\]` and the
/// `equation`, `align`, `gather` and `multline` environments (starred or not).
/// `\$` is a literal dollar sign and unterminated delimiters stay text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterParser;

impl MarkupParser for DelimiterParser {
    fn parse(&self, raw_text: &str, mode: ParseMode) -> Vec<Block> {
        match mode {
            ParseMode::Spans => parse_spans(raw_text),
            ParseMode::AllText => {
                let trimmed = raw_text.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![Block::new(vec![Component::equation(
                        trimmed,
                        MathStyle::Display,
                    )])]
                }
            }
        }
    }
}

const DISPLAY_ENVIRONMENTS: [&str; 8] = [
    "equation", "equation*", "align", "align*", "gather", "gather*", "multline", "multline*",
];

struct Span<'a> {
    body: &'a str,
    style: MathStyle,
    consumed: usize,
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    components: Vec<Component>,
    text: String,
}

impl BlockBuilder {
    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.components.push(Component::text(text));
        }
    }

    fn flush_block(&mut self) {
        self.flush_text();
        let components = std::mem::take(&mut self.components);
        let blank = components
            .iter()
            .all(|component| !component.is_equation() && component.text.trim().is_empty());
        if !blank {
            self.blocks.push(Block::new(components));
        }
    }

    fn push_equation(&mut self, body: &str, style: MathStyle) {
        match style {
            MathStyle::Inline => {
                self.flush_text();
                self.components.push(Component::equation(body, style));
            }
            MathStyle::Display => {
                self.flush_block();
                self.blocks
                    .push(Block::new(vec![Component::equation(body, style)]));
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_block();
        self.blocks
    }
}

fn parse_spans(input: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::default();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\$") {
            builder.text.push('$');
            rest = after;
            continue;
        }

        if let Some(span) = match_span(rest) {
            builder.push_equation(span.body, span.style);
            rest = &rest[span.consumed..];
            continue;
        }

        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            builder.text.push(ch);
        }
        rest = chars.as_str();
    }

    builder.finish()
}

fn match_span(input: &str) -> Option<Span<'_>> {
    if input.starts_with("\\begin{") {
        return match_environment(input);
    }

    let delimiters: [(&str, &str, MathStyle); 4] = [
        ("$$", "$$", MathStyle::Display),
        ("\\[", "\\]", MathStyle::Display),
        ("\\(", "\\)", MathStyle::Inline),
        ("$", "$", MathStyle::Inline),
    ];

    delimiters.into_iter().find_map(|(open, close, style)| {
        let after_open = input.strip_prefix(open)?;
        let end = find_closing(after_open, close)?;
        let body = &after_open[..end];
        if body.trim().is_empty() {
            return None;
        }
        Some(Span {
            body: body.trim(),
            style,
            consumed: open.len() + end + close.len(),
        })
    })
}

fn match_environment(input: &str) -> Option<Span<'_>> {
    DISPLAY_ENVIRONMENTS.into_iter().find_map(|name| {
        let open = format!("\\begin{{{name}}}");
        let close = format!("\\end{{{name}}}");
        let after_open = input.strip_prefix(open.as_str())?;
        let end = after_open.find(close.as_str())?;
        let consumed = open.len() + end + close.len();
        Some(Span {
            body: &input[..consumed],
            style: MathStyle::Display,
            consumed,
        })
    })
}

/// Byte offset of the first unescaped `close` in `haystack`.
fn find_closing(haystack: &str, close: &str) -> Option<usize> {
    let dollar = close.starts_with('$');
    haystack
        .match_indices(close)
        .map(|(index, _)| index)
        .find(|&index| !(dollar && index > 0 && haystack.as_bytes()[index - 1] == b'\\'))
}

/// Decode the HTML entities commonly found in scraped or templated input.
///
/// Unknown or malformed references are left untouched.
pub fn unescape_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest
            .char_indices()
            .take(12)
            .find(|&(_, ch)| ch == ';')
            .and_then(|(end, _)| decode_entity(&rest[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                output.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                output.push('&');
                rest = &rest[1..];
            }
        }
    }
    output.push_str(rest);
    Cow::Owned(output)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric
                .strip_prefix('x')
                .or_else(|| numeric.strip_prefix('X'))
            {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ComponentKind;

    fn parse(input: &str) -> Vec<Block> {
        DelimiterParser.parse(input, ParseMode::Spans)
    }

    fn kinds(block: &Block) -> Vec<ComponentKind> {
        block.components().iter().map(|c| c.kind).collect()
    }

    #[test]
    fn inline_equations_stay_in_the_text_block() {
        let blocks = parse("Let $x^2$ and \\(y\\) be given.");
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            kinds(&blocks[0]),
            vec![
                ComponentKind::Text,
                ComponentKind::Equation(MathStyle::Inline),
                ComponentKind::Text,
                ComponentKind::Equation(MathStyle::Inline),
                ComponentKind::Text,
            ]
        );
        assert_eq!(blocks[0].components()[1].text, "x^2");
        assert_eq!(blocks[0].components()[3].text, "y");
    }

    #[test]
    fn display_equations_get_their_own_block() {
        let blocks = parse("Before\n$$\\int_0^1 f$$\nafter \\[a=b\\]");
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].components()[0].text, "Before\n");
        assert!(blocks[1].is_display_equation());
        assert_eq!(blocks[1].components()[0].text, "\\int_0^1 f");
        assert_eq!(blocks[2].components()[0].text, "\nafter ");
        assert!(blocks[3].is_display_equation());
    }

    #[test]
    fn environments_keep_their_markers() {
        let input = "\\begin{align*}a &= b\\end{align*}";
        let blocks = parse(input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].components()[0].text, input);
        assert_eq!(
            blocks[0].components()[0].kind,
            ComponentKind::Equation(MathStyle::Display)
        );
    }

    #[test]
    fn escaped_and_unterminated_dollars_are_text() {
        let blocks = parse("costs \\$5 or $unterminated");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 1);
        assert_eq!(blocks[0].components()[0].text, "costs $5 or $unterminated");
    }

    #[test]
    fn escaped_dollar_inside_equation_does_not_close_it() {
        let blocks = parse("$a \\$ b$");
        assert_eq!(blocks[0].components()[0].text, "a \\$ b");
    }

    #[test]
    fn whitespace_between_display_blocks_is_dropped() {
        let blocks = parse("$$a$$\n\n$$b$$");
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(Block::is_display_equation));
    }

    #[test]
    fn all_text_mode_is_one_display_equation() {
        let blocks = DelimiterParser.parse("  x + y  ", ParseMode::AllText);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].components()[0].text, "x + y");
        assert!(DelimiterParser.parse("   ", ParseMode::AllText).is_empty());
    }

    #[test]
    fn unescapes_named_and_numeric_entities() {
        assert_eq!(
            unescape_entities("a &lt; b &amp;&amp; c &#62; d &#x3C; &bogus; &"),
            "a < b && c > d < &bogus; &"
        );
        assert!(matches!(unescape_entities("plain"), Cow::Borrowed("plain")));
    }
}
