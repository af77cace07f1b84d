/// Paint command list produced from a layout.

use super::layout::{ElementType, LayoutNode, LINE_HEIGHT};
use crate::Viewport;

pub type Rgba = (u8, u8, u8, u8);

pub const BACKGROUND: Rgba = (255, 255, 255, 255);
pub const INK: Rgba = (0, 0, 0, 255);
pub const HEADING_BAND: Rgba = (232, 236, 245, 255);

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: Rgba,
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        scale: u32,
        rgba: Rgba,
    },
}

/// Background first, then per block its band (headings only) and text lines.
pub fn paint_layout(nodes: &[LayoutNode], viewport: Viewport) -> Vec<PaintCommand> {
    let mut cmds = vec![PaintCommand::SolidRect {
        x: 0,
        y: 0,
        width: viewport.width,
        height: viewport.height,
        rgba: BACKGROUND,
    }];

    for node in nodes {
        let rect = &node.lb.rect;
        if node.elem_type == ElementType::Heading {
            cmds.push(PaintCommand::SolidRect {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                rgba: HEADING_BAND,
            });
        }
        let pad = node.lb.box_model.padding as i32;
        let line_step = (LINE_HEIGHT * node.scale + node.scale) as i32;
        for (i, line) in node.lines.iter().enumerate() {
            cmds.push(PaintCommand::Text {
                x: rect.x + pad,
                y: rect.y + pad + i as i32 * line_step,
                text: line.clone(),
                scale: node.scale,
                rgba: INK,
            });
        }
    }
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::layout_document;
    use scraper::Html;

    #[test]
    fn paint_starts_with_background_and_emits_text() {
        let doc = Html::parse_document("<h1>Title</h1><p>Body</p>");
        let v = Viewport { width: 300, height: 200 };
        let cmds = paint_layout(&layout_document(&doc, v), v);
        match &cmds[0] {
            PaintCommand::SolidRect { width, rgba, .. } => {
                assert_eq!(*width, 300);
                assert_eq!(*rgba, BACKGROUND);
            }
            other => panic!("unexpected first command {:?}", other),
        }
        let texts: Vec<_> = cmds
            .iter()
            .filter_map(|c| match c {
                PaintCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Title", "Body"]);
    }
}
