/// Block layout for slide-like markup: headings and text blocks stacked
/// vertically, text wrapped on an 8px character grid.

use crate::Viewport;
use scraper::{ElementRef, Html, Selector};

/// Character cell width in pixels at scale 1.
pub const CHAR_WIDTH: u32 = 8;
/// Line height in pixels at scale 1.
pub const LINE_HEIGHT: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: u32,
    pub border: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Heading,
    Paragraph,
}

/// A laid-out block: its box, its wrapped text (one entry per line) and the
/// glyph scale it is painted at.
#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    pub lines: Vec<String>,
    pub elem_type: ElementType,
    pub scale: u32,
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn wrap(text: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if !cur.is_empty() && cur.chars().count() + word.chars().count() + 1 > chars_per_line {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

fn heading_scale(tag: &str) -> Option<u32> {
    match tag {
        "h1" => Some(4),
        "h2" => Some(3),
        "h3" | "h4" | "h5" | "h6" => Some(2),
        _ => None,
    }
}

/// Lay out the document's headings, paragraphs and list items in document
/// order. When none are present, the body text is laid out as one block.
///
/// Blocks stop once the viewport height is exhausted.
pub fn layout_document(document: &Html, viewport: Viewport) -> Vec<LayoutNode> {
    let mut y = 8u32;
    let page_width = viewport.width;
    let mut nodes = Vec::new();

    // `Selector::parse` only fails on invalid selector syntax; these are fixed.
    let block_sel = Selector::parse("h1, h2, h3, h4, h5, h6, p, li").expect("static selector");
    let mut blocks: Vec<(ElementType, u32, String)> = document
        .select(&block_sel)
        .map(|el: ElementRef| {
            let tag = el.value().name();
            let text = collapse_whitespace(&el.text().collect::<String>());
            match heading_scale(tag) {
                Some(scale) => (ElementType::Heading, scale, text),
                None => (ElementType::Paragraph, 2, text),
            }
        })
        .filter(|(_, _, text)| !text.is_empty())
        .collect();

    if blocks.is_empty() {
        let body_sel = Selector::parse("body").expect("static selector");
        let text = document
            .select(&body_sel)
            .next()
            .map(|b| collapse_whitespace(&b.text().collect::<String>()))
            .unwrap_or_default();
        if !text.is_empty() {
            blocks.push((ElementType::Paragraph, 2, text));
        }
    }

    for (elem_type, scale, text) in blocks {
        let padding = 4 * scale;
        let margin = 2 * scale;
        let content_w = page_width.saturating_sub(16 + padding * 2);
        let cell = CHAR_WIDTH * scale;
        let chars_per_line = ((content_w / cell) as usize).max(1);
        let lines = wrap(&text, chars_per_line);
        let line_count = (lines.len() as u32).max(1);
        let box_h = line_count * (LINE_HEIGHT * scale + scale) + padding * 2;

        if y + box_h > viewport.height {
            break;
        }

        nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect {
                    x: 8,
                    y: y as i32,
                    width: page_width.saturating_sub(16),
                    height: box_h,
                },
                box_model: BoxModel {
                    margin,
                    border: 0,
                    padding,
                },
            },
            lines,
            elem_type,
            scale,
        });
        y += box_h + margin;
    }

    nodes
}
