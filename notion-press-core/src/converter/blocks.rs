//! Built-in converters, emitting WordPress block-comment markup.

use super::{ConvertContext, Converter};
use crate::block::{
    BlockType, CalloutPayload, CodePayload, MediaPayload, SourceBlock, TablePayload,
    TableRowPayload, TextPayload,
};
use crate::error::ConversionError;
use crate::rich_text::{self, escape, RichTextRun};
use serde_json::{json, Value};
use tracing::warn;

type ConvertResult = Result<String, ConversionError>;

pub fn builtin_converters() -> Vec<Converter> {
    vec![
        Converter::new("paragraph", vec![BlockType::Paragraph], paragraph).needing_children(),
        Converter::new("heading", (1..=6).map(BlockType::Heading).collect(), heading)
            .needing_children(),
        Converter::new(
            "list_item",
            vec![BlockType::BulletedListItem, BlockType::NumberedListItem],
            list_item,
        )
        .needing_children(),
        Converter::new("quote", vec![BlockType::Quote], quote).needing_children(),
        Converter::new("callout", vec![BlockType::Callout], callout).needing_children(),
        Converter::new("toggle", vec![BlockType::Toggle], toggle).needing_children(),
        Converter::new("code", vec![BlockType::Code], code),
        Converter::new("table", vec![BlockType::Table], table).needing_children(),
        Converter::new("table_row", vec![BlockType::TableRow], table_row),
        Converter::new("column_list", vec![BlockType::ColumnList], column_list)
            .needing_children(),
        Converter::new("column", vec![BlockType::Column], column).needing_children(),
        Converter::new("image", vec![BlockType::Image], image),
        Converter::new("file", vec![BlockType::File], file),
        Converter::new("video", vec![BlockType::Video], video),
        Converter::new("embed", vec![BlockType::Embed], embed),
        Converter::new("bookmark", vec![BlockType::Bookmark], bookmark),
        Converter::new("divider", vec![BlockType::Divider], divider),
    ]
}

/// Wraps `inner` in a block comment pair, with optional JSON attributes.
pub fn wrap_block(name: &str, attrs: Option<&Value>, inner: &str) -> String {
    match attrs {
        Some(attrs) => format!(
            "<!-- wp:{name} {} -->\n{inner}\n<!-- /wp:{name} -->",
            block_attrs(attrs)
        ),
        None => format!("<!-- wp:{name} -->\n{inner}\n<!-- /wp:{name} -->"),
    }
}

// Attribute JSON must not contain `--` or raw angle brackets inside a comment.
fn block_attrs(attrs: &Value) -> String {
    attrs
        .to_string()
        .replace("--", "\\u002d\\u002d")
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

fn class_attr(classes: &[&str]) -> String {
    let joined = classes
        .iter()
        .copied()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        String::new()
    } else {
        format!(" class=\"{joined}\"")
    }
}

fn with_children(head: String, children: String) -> String {
    if children.is_empty() {
        head
    } else {
        format!("{head}\n{children}")
    }
}

fn figcaption(caption: &[RichTextRun]) -> String {
    if caption.is_empty() {
        String::new()
    } else {
        format!(
            "<figcaption class=\"wp-element-caption\">{}</figcaption>",
            rich_text::format(caption)
        )
    }
}

fn require_url(block: &SourceBlock, media: &MediaPayload) -> Result<String, ConversionError> {
    media
        .url()
        .map(str::to_string)
        .ok_or_else(|| ConversionError::Malformed {
            block_type: block.block_type.tag(),
            reason: "missing url".to_string(),
        })
}

// Indented children have no WordPress counterpart; they follow the element.
fn paragraph(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let text: TextPayload = block.payload()?;
    let color = text.color.css_class().unwrap_or_default();
    let element = wrap_block(
        "paragraph",
        None,
        &format!(
            "<p{}>{}</p>",
            class_attr(&[&color]),
            rich_text::format(&text.rich_text)
        ),
    );
    Ok(with_children(element, ctx.render_children(block)))
}

fn heading(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let level = match block.block_type {
        BlockType::Heading(level) => level,
        _ => 2,
    };
    let text: TextPayload = block.payload()?;
    let color = text.color.css_class().unwrap_or_default();
    let attrs = (level != 2).then(|| json!({ "level": level }));
    let element = wrap_block(
        "heading",
        attrs.as_ref(),
        &format!(
            "<h{level}{}>{}</h{level}>",
            class_attr(&["wp-block-heading", &color]),
            rich_text::format(&text.rich_text)
        ),
    );
    // Toggleable headings carry their body as children.
    Ok(with_children(element, ctx.render_children(block)))
}

// The surrounding <ul>/<ol> comes from sibling coalescing in the pipeline.
fn list_item(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let text: TextPayload = block.payload()?;
    let nested = ctx.render_children(block);
    Ok(wrap_block(
        "list-item",
        None,
        &format!(
            "<li>{}</li>",
            with_children(rich_text::format(&text.rich_text), nested)
        ),
    ))
}

fn quote(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let text: TextPayload = block.payload()?;
    let body = wrap_block(
        "paragraph",
        None,
        &format!("<p>{}</p>", rich_text::format(&text.rich_text)),
    );
    Ok(wrap_block(
        "quote",
        None,
        &format!(
            "<blockquote class=\"wp-block-quote\">{}</blockquote>",
            with_children(body, ctx.render_children(block))
        ),
    ))
}

fn callout(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let callout: CalloutPayload = block.payload()?;
    let icon = callout
        .icon
        .and_then(|i| i.emoji)
        .map(|emoji| format!("<span class=\"notion-callout-icon\">{}</span> ", escape(&emoji)))
        .unwrap_or_default();
    let color = callout.color.css_class().unwrap_or_default();
    let body = wrap_block(
        "paragraph",
        None,
        &format!("<p>{icon}{}</p>", rich_text::format(&callout.rich_text)),
    );
    Ok(wrap_block(
        "group",
        Some(&json!({ "className": "notion-callout" })),
        &format!(
            "<div{}>{}</div>",
            class_attr(&["wp-block-group", "notion-callout", &color]),
            with_children(body, ctx.render_children(block))
        ),
    ))
}

fn toggle(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    let text: TextPayload = block.payload()?;
    Ok(wrap_block(
        "details",
        None,
        &format!(
            "<details class=\"wp-block-details\"><summary>{}</summary>{}</details>",
            rich_text::format(&text.rich_text),
            ctx.render_children(block)
        ),
    ))
}

fn code(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let code: CodePayload = block.payload()?;
    let language = code
        .language
        .as_deref()
        .map(|l| l.trim().to_lowercase().replace(' ', "-"))
        .filter(|l| !l.is_empty() && l != "plain-text");
    let code_class = language
        .map(|l| format!(" class=\"language-{}\"", escape(&l)))
        .unwrap_or_default();
    Ok(wrap_block(
        "code",
        None,
        &format!(
            "<pre class=\"wp-block-code\"><code{code_class}>{}</code></pre>",
            escape(&rich_text::plain_text(&code.rich_text))
        ),
    ))
}

fn render_row(cells: &[Vec<RichTextRun>], header_row: bool, row_header: bool) -> String {
    let cells: String = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let content = rich_text::format(cell);
            if header_row {
                format!("<th>{content}</th>")
            } else if row_header && i == 0 {
                format!("<th scope=\"row\">{content}</th>")
            } else {
                format!("<td>{content}</td>")
            }
        })
        .collect();
    format!("<tr>{cells}</tr>")
}

fn table_markup(head: Option<String>, body: &[String]) -> String {
    let thead = head
        .map(|row| format!("<thead>{row}</thead>"))
        .unwrap_or_default();
    wrap_block(
        "table",
        None,
        &format!(
            "<figure class=\"wp-block-table\"><table>{thead}<tbody>{}</tbody></table></figure>",
            body.concat()
        ),
    )
}

fn table(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let table: TablePayload = block.payload()?;
    let mut rows = Vec::new();
    for child in block.children() {
        if child.block_type != BlockType::TableRow {
            warn!(table_id = %block.id, child_id = %child.id, child_type = %child.block_type, "Skipping non-row child of table");
            continue;
        }
        rows.push(child.payload::<TableRowPayload>()?.cells);
    }

    let mut rows = rows.into_iter();
    let head = if table.has_column_header {
        rows.next().map(|cells| render_row(&cells, true, false))
    } else {
        None
    };
    let body: Vec<String> = rows
        .map(|cells| render_row(&cells, false, table.has_row_header))
        .collect();
    Ok(table_markup(head, &body))
}

fn table_row(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let row: TableRowPayload = block.payload()?;
    Ok(table_markup(None, &[render_row(&row.cells, false, false)]))
}

fn column_list(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    Ok(wrap_block(
        "columns",
        None,
        &format!(
            "<div class=\"wp-block-columns\">{}</div>",
            ctx.render_children(block)
        ),
    ))
}

fn column(block: &SourceBlock, ctx: &ConvertContext<'_>) -> ConvertResult {
    Ok(wrap_block(
        "column",
        None,
        &format!(
            "<div class=\"wp-block-column\">{}</div>",
            ctx.render_children(block)
        ),
    ))
}

fn image(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let media: MediaPayload = block.payload()?;
    let url = require_url(block, &media)?;
    let alt = rich_text::plain_text(&media.caption);
    Ok(wrap_block(
        "image",
        None,
        &format!(
            "<figure class=\"wp-block-image\"><img src=\"{}\" alt=\"{}\"/>{}</figure>",
            escape(&url),
            escape(&alt),
            figcaption(&media.caption)
        ),
    ))
}

fn file(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let media: MediaPayload = block.payload()?;
    let url = require_url(block, &media)?;
    let label = media
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .map(|n| escape(&n))
        .or_else(|| (!media.caption.is_empty()).then(|| rich_text::format(&media.caption)))
        .unwrap_or_else(|| {
            let tail = url.split('?').next().unwrap_or(url.as_str());
            escape(tail.rsplit('/').next().unwrap_or(tail))
        });
    Ok(wrap_block(
        "file",
        None,
        &format!(
            "<div class=\"wp-block-file\"><a href=\"{}\">{label}</a></div>",
            escape(&url)
        ),
    ))
}

fn embed_markup(url: &str, caption: &[RichTextRun]) -> String {
    wrap_block(
        "embed",
        Some(&json!({ "url": url })),
        &format!(
            "<figure class=\"wp-block-embed\"><div class=\"wp-block-embed__wrapper\">\n{}\n</div>{}</figure>",
            escape(url),
            figcaption(caption)
        ),
    )
}

fn video(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let media: MediaPayload = block.payload()?;
    let url = require_url(block, &media)?;
    if !media.is_hosted() {
        return Ok(embed_markup(&url, &media.caption));
    }
    Ok(wrap_block(
        "video",
        None,
        &format!(
            "<figure class=\"wp-block-video\"><video controls src=\"{}\"></video>{}</figure>",
            escape(&url),
            figcaption(&media.caption)
        ),
    ))
}

fn embed(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let media: MediaPayload = block.payload()?;
    let url = require_url(block, &media)?;
    Ok(embed_markup(&url, &media.caption))
}

fn bookmark(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    let media: MediaPayload = block.payload()?;
    let url = require_url(block, &media)?;
    let label = if media.caption.is_empty() {
        escape(&url)
    } else {
        rich_text::format(&media.caption)
    };
    Ok(wrap_block(
        "paragraph",
        Some(&json!({ "className": "notion-bookmark" })),
        &format!(
            "<p class=\"notion-bookmark\"><a href=\"{}\">{label}</a></p>",
            escape(&url)
        ),
    ))
}

fn divider(_block: &SourceBlock, _ctx: &ConvertContext<'_>) -> ConvertResult {
    Ok(wrap_block(
        "separator",
        None,
        "<hr class=\"wp-block-separator has-alpha-channel-opacity\"/>",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrs_never_contain_comment_terminators() {
        let attrs = block_attrs(&json!({ "url": "https://e.com/a--b?<x>" }));
        assert!(!attrs.contains("--"));
        assert!(!attrs.contains('<'));
        assert!(!attrs.contains('>'));
    }

    #[test]
    fn wrap_block_with_and_without_attrs() {
        assert_eq!(
            wrap_block("separator", None, "<hr/>"),
            "<!-- wp:separator -->\n<hr/>\n<!-- /wp:separator -->"
        );
        assert_eq!(
            wrap_block("heading", Some(&json!({ "level": 3 })), "<h3>x</h3>"),
            "<!-- wp:heading {\"level\":3} -->\n<h3>x</h3>\n<!-- /wp:heading -->"
        );
    }

    #[test]
    fn class_attr_skips_empty_entries() {
        assert_eq!(class_attr(&["", ""]), "");
        assert_eq!(class_attr(&["a", "", "b"]), " class=\"a b\"");
    }
}
