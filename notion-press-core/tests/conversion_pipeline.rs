use notion_press_core::block::{BlockType, SourceBlock};
use notion_press_core::contract::{BlockPage, MockContentFetcher};
use notion_press_core::converter::ConverterRegistry;
use notion_press_core::pipeline::{render_tree, BlockPipeline, DEFAULT_MAX_DEPTH};
use notion_press_core::rich_text::{self, RichTextRun, TextColor};
use mockall::predicate::eq;
use serde_json::json;
use std::sync::Arc;

fn text(id: &str, ty: BlockType, runs: Vec<RichTextRun>) -> SourceBlock {
    SourceBlock::text(id, ty, runs)
}

fn render(blocks: &[SourceBlock]) -> String {
    render_tree(&ConverterRegistry::with_builtins(), blocks, DEFAULT_MAX_DEPTH)
}

#[test]
fn heading_paragraph_and_list_page() {
    let blocks = vec![
        text("h", BlockType::Heading(2), vec![RichTextRun::plain("Intro")]),
        text(
            "p",
            BlockType::Paragraph,
            vec![RichTextRun::plain("Hello "), RichTextRun::plain("world").bold()],
        ),
        text("a", BlockType::BulletedListItem, vec![RichTextRun::plain("A")]),
        text("b", BlockType::BulletedListItem, vec![RichTextRun::plain("B")]),
    ];

    let expected = "<!-- wp:heading -->\n\
<h2 class=\"wp-block-heading\">Intro</h2>\n\
<!-- /wp:heading -->\n\n\
<!-- wp:paragraph -->\n\
<p>Hello <strong>world</strong></p>\n\
<!-- /wp:paragraph -->\n\n\
<!-- wp:list -->\n\
<ul class=\"wp-block-list\"><!-- wp:list-item -->\n\
<li>A</li>\n\
<!-- /wp:list-item -->\n\
<!-- wp:list-item -->\n\
<li>B</li>\n\
<!-- /wp:list-item --></ul>\n\
<!-- /wp:list -->";

    assert_eq!(render(&blocks), expected);
}

#[test]
fn sibling_order_is_preserved() {
    let blocks: Vec<_> = (0..6)
        .map(|i| {
            let ty = if i % 2 == 0 {
                BlockType::Paragraph
            } else {
                BlockType::Quote
            };
            text(&format!("b{i}"), ty, vec![RichTextRun::plain(format!("item-{i}"))])
        })
        .collect();
    let out = render(&blocks);

    let positions: Vec<_> = (0..6)
        .map(|i| out.find(&format!("item-{i}")).expect("item rendered"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{out}");
}

#[test]
fn every_block_type_renders_something() {
    let unknown = ["link_preview", "synced_block", "equation", "breadcrumb", ""];
    for tag in unknown {
        let block = SourceBlock::new("x", BlockType::from_tag(tag), serde_json::Value::Null);
        let out = render(&[block]);
        assert!(out.contains("notion-press:unsupported"), "{tag}: {out}");
        assert!(out.starts_with("<!--") && out.ends_with("-->"));
    }
}

#[test]
fn malformed_payload_degrades_to_fallback_for_that_block_only() {
    let broken = SourceBlock::new("img", BlockType::Image, json!({ "caption": [] }));
    let out = render(&[
        text("p1", BlockType::Paragraph, vec![RichTextRun::plain("before")]),
        broken,
        text("p2", BlockType::Paragraph, vec![RichTextRun::plain("after")]),
    ]);
    assert!(out.contains("before"));
    assert!(out.contains("after"));
    assert!(out.contains("type=\"image\" id=\"img\""));
}

#[test]
fn rich_text_is_independent_of_annotation_order() {
    let a = RichTextRun::plain("x")
        .bold()
        .italic()
        .underline()
        .colored(TextColor::parse("red"))
        .linked("https://example.com");
    let b = RichTextRun::plain("x")
        .linked("https://example.com")
        .underline()
        .colored(TextColor::parse("red"))
        .italic()
        .bold();
    assert_eq!(rich_text::format(&[a.clone()]), rich_text::format(&[b]));
    assert_eq!(
        rich_text::format(&[a]),
        "<a href=\"https://example.com\"><span class=\"has-text-color has-vivid-red-color\"><strong><em><u>x</u></em></strong></span></a>"
    );
}

#[test]
fn source_api_json_converts_end_to_end() {
    let raw = json!([
        {
            "object": "block",
            "id": "c1",
            "type": "callout",
            "has_children": false,
            "callout": {
                "rich_text": [{
                    "type": "text",
                    "text": { "content": "Heads up", "link": null },
                    "plain_text": "Heads up",
                    "annotations": {
                        "bold": true, "italic": false, "strikethrough": false,
                        "underline": false, "code": false, "color": "default"
                    }
                }],
                "icon": { "type": "emoji", "emoji": "💡" },
                "color": "yellow_background"
            }
        },
        {
            "object": "block",
            "id": "k1",
            "type": "code",
            "has_children": false,
            "code": {
                "rich_text": [{ "type": "text", "text": { "content": "a < b" }, "plain_text": "a < b" }],
                "language": "rust"
            }
        }
    ]);
    let blocks: Vec<SourceBlock> = serde_json::from_value(raw).unwrap();
    let out = render(&blocks);

    assert!(out.contains("<!-- wp:group"));
    assert!(out.contains("💡"));
    assert!(out.contains("<strong>Heads up</strong>"));
    assert!(out.contains("<!-- wp:code -->"));
    assert!(out.contains("language-rust"));
    assert!(out.contains("a &lt; b"));
}

#[tokio::test]
async fn children_are_fetched_across_cursor_pages_in_order() {
    let mut fetcher = MockContentFetcher::new();
    fetcher
        .expect_fetch_blocks()
        .with(eq("page"), eq(None::<String>))
        .times(1)
        .returning(|_, _| {
            Ok(BlockPage {
                blocks: vec![
                    SourceBlock::text("i1", BlockType::NumberedListItem, vec![RichTextRun::plain("one")]),
                    SourceBlock::text("i2", BlockType::NumberedListItem, vec![RichTextRun::plain("two")]),
                ],
                next_cursor: Some("cursor-2".into()),
            })
        });
    fetcher
        .expect_fetch_blocks()
        .with(eq("page"), eq(Some("cursor-2".to_string())))
        .times(1)
        .returning(|_, _| {
            Ok(BlockPage {
                blocks: vec![SourceBlock::text(
                    "i3",
                    BlockType::NumberedListItem,
                    vec![RichTextRun::plain("three")],
                )],
                next_cursor: None,
            })
        });

    let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
    let out = pipeline.convert_page("page", DEFAULT_MAX_DEPTH).await.unwrap();

    // Items split across cursor pages still form one ordered list.
    assert_eq!(out.matches("<ol").count(), 1);
    let one = out.find("one").unwrap();
    let two = out.find("two").unwrap();
    let three = out.find("three").unwrap();
    assert!(one < two && two < three);
}

#[tokio::test]
async fn table_rows_are_fetched_without_consuming_depth() {
    let mut fetcher = MockContentFetcher::new();
    fetcher
        .expect_fetch_blocks()
        .with(eq("t1"), eq(None::<String>))
        .returning(|_, _| {
            let row = |id: &str, a: &str, b: &str| {
                SourceBlock::new(
                    id,
                    BlockType::TableRow,
                    json!({ "cells": [
                        [{ "type": "text", "text": { "content": a }, "plain_text": a }],
                        [{ "type": "text", "text": { "content": b }, "plain_text": b }]
                    ]}),
                )
            };
            Ok(BlockPage {
                blocks: vec![row("r1", "Name", "Value"), row("r2", "depth", "ok")],
                next_cursor: None,
            })
        });

    let table = SourceBlock::new(
        "t1",
        BlockType::Table,
        json!({ "table_width": 2, "has_column_header": true, "has_row_header": false }),
    )
    .with_unfetched_children();

    let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
    let out = pipeline.convert_tree(&[table], 0).await.unwrap();

    assert!(out.contains("<thead>"));
    assert!(out.contains("Name"));
    assert!(out.contains("<td>ok</td>") || out.contains(">ok</td>"));
    assert!(!out.contains("notion-press:unsupported"));
}

fn plain(id: &str, ty: BlockType, content: &str) -> SourceBlock {
    text(id, ty, vec![RichTextRun::plain(content)])
}

fn media(id: &str, ty: BlockType, payload: serde_json::Value) -> SourceBlock {
    SourceBlock::new(id, ty, payload)
}

fn row(id: &str, cells: &[&str]) -> SourceBlock {
    let cells: Vec<Vec<RichTextRun>> = cells.iter().map(|c| vec![RichTextRun::plain(*c)]).collect();
    SourceBlock::new(id, BlockType::TableRow, json!({ "cells": cells }))
}

#[test]
fn indented_paragraph_follows_its_parent() {
    let parent = plain("p", BlockType::Paragraph, "parent")
        .with_children(vec![plain("c1", BlockType::Paragraph, "INDENTED")]);
    let expected = "<!-- wp:paragraph -->\n\
<p>parent</p>\n\
<!-- /wp:paragraph -->\n\
<!-- wp:paragraph -->\n\
<p>INDENTED</p>\n\
<!-- /wp:paragraph -->";
    assert_eq!(render(&[parent]), expected);
}

#[test]
fn columns_keep_count_and_order_without_widths() {
    let columns = SourceBlock::new("cl", BlockType::ColumnList, json!({})).with_children(vec![
        SourceBlock::new("c1", BlockType::Column, json!({ "width_ratio": 0.3 }))
            .with_children(vec![plain("l", BlockType::Paragraph, "Left")]),
        SourceBlock::new("c2", BlockType::Column, json!({ "width_ratio": 0.7 }))
            .with_children(vec![plain("r", BlockType::Paragraph, "Right")]),
    ]);
    let expected = "<!-- wp:columns -->\n\
<div class=\"wp-block-columns\"><!-- wp:column -->\n\
<div class=\"wp-block-column\"><!-- wp:paragraph -->\n\
<p>Left</p>\n\
<!-- /wp:paragraph --></div>\n\
<!-- /wp:column -->\n\n\
<!-- wp:column -->\n\
<div class=\"wp-block-column\"><!-- wp:paragraph -->\n\
<p>Right</p>\n\
<!-- /wp:paragraph --></div>\n\
<!-- /wp:column --></div>\n\
<!-- /wp:columns -->";
    let out = render(&[columns]);
    assert_eq!(out, expected);
    assert!(!out.contains("width"));
}

#[test]
fn empty_toggle_still_renders_details() {
    let toggle = plain("t", BlockType::Toggle, "More");
    assert_eq!(
        render(&[toggle]),
        "<!-- wp:details -->\n\
<details class=\"wp-block-details\"><summary>More</summary></details>\n\
<!-- /wp:details -->"
    );
}

#[test]
fn row_headers_render_as_scoped_th() {
    let table = SourceBlock::new(
        "t",
        BlockType::Table,
        json!({ "table_width": 2, "has_column_header": false, "has_row_header": true }),
    )
    .with_children(vec![row("r1", &["a", "1"]), row("r2", &["b", "2"])]);
    assert_eq!(
        render(&[table]),
        "<!-- wp:table -->\n\
<figure class=\"wp-block-table\"><table><tbody>\
<tr><th scope=\"row\">a</th><td>1</td></tr>\
<tr><th scope=\"row\">b</th><td>2</td></tr>\
</tbody></table></figure>\n\
<!-- /wp:table -->"
    );
}

#[test]
fn stray_table_row_renders_as_one_row_table() {
    assert_eq!(
        render(&[row("r", &["x", "y"])]),
        "<!-- wp:table -->\n\
<figure class=\"wp-block-table\"><table><tbody><tr><td>x</td><td>y</td></tr></tbody></table></figure>\n\
<!-- /wp:table -->"
    );
}

#[test]
fn image_with_caption() {
    let image = media(
        "i",
        BlockType::Image,
        json!({
            "type": "external",
            "external": { "url": "https://cdn.example.com/a.png" },
            "caption": [RichTextRun::plain("Cap")]
        }),
    );
    assert_eq!(
        render(&[image]),
        "<!-- wp:image -->\n\
<figure class=\"wp-block-image\"><img src=\"https://cdn.example.com/a.png\" alt=\"Cap\"/>\
<figcaption class=\"wp-element-caption\">Cap</figcaption></figure>\n\
<!-- /wp:image -->"
    );
}

#[test]
fn file_label_prefers_name_then_caption_then_url_tail() {
    let url = "https://files.example.com/x/report.pdf?sig=1";
    let named = media(
        "f1",
        BlockType::File,
        json!({ "file": { "url": url }, "name": "Q3 report", "caption": [RichTextRun::plain("ignored")] }),
    );
    assert_eq!(
        render(&[named]),
        "<!-- wp:file -->\n\
<div class=\"wp-block-file\"><a href=\"https://files.example.com/x/report.pdf?sig=1\">Q3 report</a></div>\n\
<!-- /wp:file -->"
    );

    let captioned = media(
        "f2",
        BlockType::File,
        json!({ "file": { "url": url }, "caption": [RichTextRun::plain("Slides")] }),
    );
    assert!(render(&[captioned]).contains(">Slides</a>"));

    let bare = media("f3", BlockType::File, json!({ "file": { "url": url } }));
    assert!(render(&[bare]).contains(">report.pdf</a>"));
}

#[test]
fn hosted_video_uses_video_block() {
    let video = media(
        "v",
        BlockType::Video,
        json!({ "type": "file", "file": { "url": "https://files.example.com/v.mp4" } }),
    );
    assert_eq!(
        render(&[video]),
        "<!-- wp:video -->\n\
<figure class=\"wp-block-video\"><video controls src=\"https://files.example.com/v.mp4\"></video></figure>\n\
<!-- /wp:video -->"
    );
}

#[test]
fn external_video_and_embed_use_embed_block() {
    let expected = "<!-- wp:embed {\"url\":\"https://youtu.be/abc\"} -->\n\
<figure class=\"wp-block-embed\"><div class=\"wp-block-embed__wrapper\">\n\
https://youtu.be/abc\n\
</div></figure>\n\
<!-- /wp:embed -->";
    let video = media(
        "v",
        BlockType::Video,
        json!({ "type": "external", "external": { "url": "https://youtu.be/abc" } }),
    );
    assert_eq!(render(&[video]), expected);

    let embed = media("e", BlockType::Embed, json!({ "url": "https://youtu.be/abc" }));
    assert_eq!(render(&[embed]), expected);
}

#[test]
fn bookmark_and_divider() {
    let bookmark = media(
        "b",
        BlockType::Bookmark,
        json!({ "url": "https://www.rust-lang.org", "caption": [] }),
    );
    let divider = media("d", BlockType::Divider, json!({}));
    assert_eq!(
        render(&[bookmark, divider]),
        "<!-- wp:paragraph {\"className\":\"notion-bookmark\"} -->\n\
<p class=\"notion-bookmark\"><a href=\"https://www.rust-lang.org\">https://www.rust-lang.org</a></p>\n\
<!-- /wp:paragraph -->\n\n\
<!-- wp:separator -->\n\
<hr class=\"wp-block-separator has-alpha-channel-opacity\"/>\n\
<!-- /wp:separator -->"
    );
}

#[test]
fn nested_list_renders_inside_its_item() {
    let top = plain("a", BlockType::BulletedListItem, "Top")
        .with_children(vec![plain("b", BlockType::BulletedListItem, "Child")]);
    assert_eq!(
        render(&[top]),
        "<!-- wp:list -->\n\
<ul class=\"wp-block-list\"><!-- wp:list-item -->\n\
<li>Top\n\
<!-- wp:list -->\n\
<ul class=\"wp-block-list\"><!-- wp:list-item -->\n\
<li>Child</li>\n\
<!-- /wp:list-item --></ul>\n\
<!-- /wp:list --></li>\n\
<!-- /wp:list-item --></ul>\n\
<!-- /wp:list -->"
    );
}

#[test]
fn list_nesting_past_max_depth_is_flagged() {
    let top = plain("a", BlockType::NumberedListItem, "one").with_children(vec![plain(
        "b",
        BlockType::NumberedListItem,
        "two",
    )
    .with_children(vec![plain("c", BlockType::NumberedListItem, "three")])]);
    let out = render_tree(&ConverterRegistry::with_builtins(), &[top], 1);
    assert!(out.contains("<li>one"));
    assert!(out.contains("<li>two"));
    assert!(!out.contains("three"));
    assert!(out.contains("type=\"numbered_list_item\" id=\"c\""));
    assert_eq!(out.matches("<ol").count(), 2);
}
