use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

static UL_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\* (.*)$").unwrap());
static OL_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+\. (.*)$").unwrap());
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(.*?)`").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(String),
    Italic(String),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Code(String),
    List { ordered: bool, items: Vec<Vec<Inline>> },
}

pub type Document = Vec<Block>;

/// Parse the assistant's constrained markdown dialect into a block tree.
///
/// Triple-backtick fences are split off first; outside them parsing is
/// line-oriented, grouping consecutive list lines of one kind into a single
/// list and dropping blank lines. Inline emphasis is non-recursive.
pub fn parse(content: &str) -> Document {
    let mut document = Vec::new();

    for (index, segment) in content.split("```").enumerate() {
        // Fences alternate: odd segments are code.
        if index % 2 == 1 {
            document.push(Block::Code(segment.trim().to_string()));
        } else {
            parse_text_segment(segment, &mut document);
        }
    }

    document
}

fn flush_list(ordered: bool, items: &mut Vec<Vec<Inline>>, document: &mut Document) {
    if !items.is_empty() {
        document.push(Block::List {
            ordered,
            items: std::mem::take(items),
        });
    }
}

fn parse_text_segment(segment: &str, document: &mut Document) {
    let mut list_items: Vec<Vec<Inline>> = Vec::new();
    let mut list_ordered = false;

    for line in segment.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(captures) = UL_ITEM.captures(line) {
            if list_ordered {
                flush_list(list_ordered, &mut list_items, document);
            }
            list_ordered = false;
            list_items.push(parse_inline(&captures[1]));
        } else if let Some(captures) = OL_ITEM.captures(line) {
            if !list_ordered {
                flush_list(list_ordered, &mut list_items, document);
            }
            list_ordered = true;
            list_items.push(parse_inline(&captures[1]));
        } else {
            flush_list(list_ordered, &mut list_items, document);
            document.push(Block::Paragraph(parse_inline(line)));
        }
    }

    flush_list(list_ordered, &mut list_items, document);
}

/// Ordered, non-recursive inline substitution: bold first so a single `*`
/// never eats half of a `**` pair, then italic, then inline code.
pub fn parse_inline(text: &str) -> Vec<Inline> {
    let mut spans = Vec::new();
    split_on(&BOLD, text, &mut spans, Inline::Bold, |rest, out| {
        split_on(&ITALIC, rest, out, Inline::Italic, |rest, out| {
            split_on(&CODE, rest, out, Inline::Code, |rest, out| {
                if !rest.is_empty() {
                    out.push(Inline::Text(rest.to_string()));
                }
            });
        });
    });
    spans
}

fn split_on(
    pattern: &Regex,
    text: &str,
    out: &mut Vec<Inline>,
    wrap: impl Fn(String) -> Inline,
    descend: impl Fn(&str, &mut Vec<Inline>),
) {
    let mut cursor = 0;
    for captures in pattern.captures_iter(text) {
        let whole = captures.get(0).unwrap();
        descend(&text[cursor..whole.start()], out);
        out.push(wrap(captures[1].to_string()));
        cursor = whole.end();
    }
    descend(&text[cursor..], out);
}

/// Flatten a document back into plain terminal text.
pub fn render_text(document: &Document) -> String {
    let mut output = String::new();

    for block in document {
        match block {
            Block::Paragraph(spans) => {
                let _ = writeln!(output, "{}", render_spans(spans));
            }
            Block::Code(code) => {
                for line in code.lines() {
                    let _ = writeln!(output, "    {line}");
                }
            }
            Block::List { ordered, items } => {
                for (index, item) in items.iter().enumerate() {
                    if *ordered {
                        let _ = writeln!(output, "{}. {}", index + 1, render_spans(item));
                    } else {
                        let _ = writeln!(output, "• {}", render_spans(item));
                    }
                }
            }
        }
    }

    output
}

fn render_spans(spans: &[Inline]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Inline::Text(text) | Inline::Bold(text) | Inline::Italic(text) => text.clone(),
            Inline::Code(code) => format!("`{code}`"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_code_blocks_split_out() {
        let document = parse("قبل\n```\nlet x = 1;\n```\nبعد");
        assert_eq!(
            document,
            vec![
                Block::Paragraph(vec![Inline::Text("قبل".to_string())]),
                Block::Code("let x = 1;".to_string()),
                Block::Paragraph(vec![Inline::Text("بعد".to_string())]),
            ]
        );
    }

    #[test]
    fn consecutive_list_lines_group_into_one_list() {
        let document = parse("* أول\n* ثانٍ\n* ثالث");
        assert_eq!(document.len(), 1);
        match &document[0] {
            Block::List { ordered, items } => {
                assert!(!ordered);
                assert_eq!(items.len(), 3);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn list_kind_change_flushes_the_current_list() {
        let document = parse("* نقطة\n1. خطوة\n2. خطوة أخرى\nفقرة");
        assert_eq!(document.len(), 3);
        assert!(matches!(
            document[0],
            Block::List { ordered: false, ref items } if items.len() == 1
        ));
        assert!(matches!(
            document[1],
            Block::List { ordered: true, ref items } if items.len() == 2
        ));
        assert!(matches!(document[2], Block::Paragraph(_)));
    }

    #[test]
    fn bold_is_matched_before_italic() {
        let spans = parse_inline("نص **مهم** و *مائل* عادي");
        assert_eq!(
            spans,
            vec![
                Inline::Text("نص ".to_string()),
                Inline::Bold("مهم".to_string()),
                Inline::Text(" و ".to_string()),
                Inline::Italic("مائل".to_string()),
                Inline::Text(" عادي".to_string()),
            ]
        );
    }

    #[test]
    fn inline_code_inside_a_list_item() {
        let document = parse("* استخدم `cargo run`");
        match &document[0] {
            Block::List { items, .. } => {
                assert_eq!(
                    items[0],
                    vec![
                        Inline::Text("استخدم ".to_string()),
                        Inline::Code("cargo run".to_string()),
                    ]
                );
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_dropped() {
        let document = parse("سطر\n\n\nآخر");
        assert_eq!(document.len(), 2);
    }

    #[test]
    fn render_text_flattens_blocks() {
        let rendered = render_text(&parse("**عنوان**\n1. أولاً\n2. ثانياً"));
        assert_eq!(rendered, "عنوان\n1. أولاً\n2. ثانياً\n");
    }
}
