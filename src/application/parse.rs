//! Single-entry memo in front of the markup parser.
//!
//! Views re-parse their input on every refresh; the memo returns the previous
//! blocks untouched when the inputs have not changed.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cache::lock::mutex_lock;
use crate::domain::markup::{MarkupParser, unescape_entities};
use crate::domain::types::{Block, ParseInputs};

const SOURCE: &str = "application::parse";

type Memo = Option<(ParseInputs, Arc<Vec<Block>>)>;

pub struct ParsedSourceMemo {
    parser: Arc<dyn MarkupParser>,
    last: Mutex<Memo>,
}

impl ParsedSourceMemo {
    pub fn new(parser: Arc<dyn MarkupParser>) -> Self {
        Self {
            parser,
            last: Mutex::new(None),
        }
    }

    /// Blocks for `inputs`, reusing the previous result when `inputs` is
    /// structurally equal to the last call's.
    pub fn parse_or_reuse(&self, inputs: &ParseInputs) -> Arc<Vec<Block>> {
        let mut last = mutex_lock(&self.last, SOURCE, "parse_or_reuse");
        if let Some((previous, blocks)) = last.as_ref()
            && previous == inputs
        {
            debug!(
                target = "application::parse",
                op = "parse_or_reuse",
                result = "reused",
                blocks = blocks.len(),
                "Reusing parsed blocks"
            );
            return Arc::clone(blocks);
        }

        let text = if inputs.unescape_entities {
            unescape_entities(&inputs.raw_text)
        } else {
            inputs.raw_text.as_str().into()
        };
        let blocks = Arc::new(self.parser.parse(&text, inputs.mode));
        debug!(
            target = "application::parse",
            op = "parse_or_reuse",
            result = "parsed",
            blocks = blocks.len(),
            "Parsed source text"
        );
        *last = Some((inputs.clone(), Arc::clone(&blocks)));
        blocks
    }

    pub fn clear(&self) {
        *mutex_lock(&self.last, SOURCE, "clear") = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::markup::DelimiterParser;
    use crate::domain::types::{ComponentKind, MathStyle, ParseMode};

    struct Counting {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl MarkupParser for Counting {
        fn parse(&self, raw_text: &str, mode: ParseMode) -> Vec<Block> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("seen lock").push(raw_text.to_string());
            DelimiterParser.parse(raw_text, mode)
        }
    }

    fn memo() -> (ParsedSourceMemo, Arc<Counting>) {
        let parser = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });
        (ParsedSourceMemo::new(parser.clone()), parser)
    }

    #[test]
    fn identical_inputs_reuse_the_same_blocks() {
        let (memo, parser) = memo();
        let inputs = ParseInputs::new("area $\\pi r^2$", ParseMode::Spans);

        let first = memo.parse_or_reuse(&inputs);
        let second = memo.parse_or_reuse(&inputs.clone());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn any_changed_field_reparses() {
        let (memo, parser) = memo();
        let base = ParseInputs::new("$a &lt; b$", ParseMode::Spans);

        memo.parse_or_reuse(&base);
        memo.parse_or_reuse(&base.clone().with_unescape_entities(true));
        memo.parse_or_reuse(&ParseInputs::new("$a &lt; b$", ParseMode::AllText));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);

        // Only the most recent inputs are remembered.
        memo.parse_or_reuse(&base);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn entities_are_decoded_before_parsing() {
        let (memo, parser) = memo();
        let inputs = ParseInputs::new("$a &lt; b$", ParseMode::Spans).with_unescape_entities(true);

        let blocks = memo.parse_or_reuse(&inputs);

        assert_eq!(parser.seen.lock().expect("seen lock")[0], "$a < b$");
        let equation = blocks[0].equations().next().expect("one equation");
        assert_eq!(equation.text, "a < b");
        assert_eq!(equation.kind, ComponentKind::Equation(MathStyle::Inline));
    }

    #[test]
    fn clear_forgets_the_memo() {
        let (memo, parser) = memo();
        let inputs = ParseInputs::new("$x$", ParseMode::Spans);

        memo.parse_or_reuse(&inputs);
        memo.clear();
        memo.parse_or_reuse(&inputs);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
    }
}
