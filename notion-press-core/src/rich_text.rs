//! Rich text runs and their rendering into inline post markup.
//!
//! A block's text is a sequence of [`RichTextRun`]s. [`format`] renders each
//! run independently and concatenates the results, so run order is preserved
//! and overlapping annotations nest the same way no matter how the source
//! listed them. Nesting, outermost to innermost:
//!
//! `<a>` > color `<span>` > `<code>` > `<strong>` > `<em>` > `<s>` > `<u>` > text
//!
//! Content is escaped exactly once, before any wrapping.

use serde::{Deserialize, Serialize};

/// Inline annotations carried by a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub underline: bool,
    #[serde(default)]
    pub code: bool,
}

/// Palette colors the source API knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Gray,
    Brown,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Red,
}

impl NamedColor {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "gray" => NamedColor::Gray,
            "brown" => NamedColor::Brown,
            "orange" => NamedColor::Orange,
            "yellow" => NamedColor::Yellow,
            "green" => NamedColor::Green,
            "blue" => NamedColor::Blue,
            "purple" => NamedColor::Purple,
            "pink" => NamedColor::Pink,
            "red" => NamedColor::Red,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            NamedColor::Gray => "gray",
            NamedColor::Brown => "brown",
            NamedColor::Orange => "orange",
            NamedColor::Yellow => "yellow",
            NamedColor::Green => "green",
            NamedColor::Blue => "blue",
            NamedColor::Purple => "purple",
            NamedColor::Pink => "pink",
            NamedColor::Red => "red",
        }
    }

    /// Palette slug used in the target's color classes.
    pub fn slug(self) -> &'static str {
        match self {
            NamedColor::Gray => "cyan-bluish-gray",
            NamedColor::Brown => "brown",
            NamedColor::Orange => "luminous-vivid-orange",
            NamedColor::Yellow => "luminous-vivid-amber",
            NamedColor::Green => "vivid-green-cyan",
            NamedColor::Blue => "vivid-cyan-blue",
            NamedColor::Purple => "vivid-purple",
            NamedColor::Pink => "pale-pink",
            NamedColor::Red => "vivid-red",
        }
    }
}

/// Text or background color of a run or block. Unknown names parse as `Default`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TextColor {
    #[default]
    Default,
    Foreground(NamedColor),
    Background(NamedColor),
}

impl TextColor {
    pub fn parse(name: &str) -> Self {
        match name.strip_suffix("_background") {
            Some(base) => NamedColor::from_name(base)
                .map(TextColor::Background)
                .unwrap_or_default(),
            None => NamedColor::from_name(name)
                .map(TextColor::Foreground)
                .unwrap_or_default(),
        }
    }

    /// CSS classes for this color, or `None` for the default color.
    pub fn css_class(self) -> Option<String> {
        match self {
            TextColor::Default => None,
            TextColor::Foreground(c) => Some(format!("has-text-color has-{}-color", c.slug())),
            TextColor::Background(c) => Some(format!(
                "has-background has-{}-background-color",
                c.slug()
            )),
        }
    }
}

impl From<String> for TextColor {
    fn from(value: String) -> Self {
        TextColor::parse(&value)
    }
}

impl From<TextColor> for String {
    fn from(value: TextColor) -> Self {
        match value {
            TextColor::Default => "default".to_string(),
            TextColor::Foreground(c) => c.name().to_string(),
            TextColor::Background(c) => format!("{}_background", c.name()),
        }
    }
}

/// One annotated span of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRichText", into = "RawRichText")]
pub struct RichTextRun {
    pub content: String,
    pub annotations: Annotations,
    pub color: TextColor,
    pub link: Option<String>,
}

impl RichTextRun {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn bold(mut self) -> Self {
        self.annotations.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.annotations.italic = true;
        self
    }

    pub fn strikethrough(mut self) -> Self {
        self.annotations.strikethrough = true;
        self
    }

    pub fn underline(mut self) -> Self {
        self.annotations.underline = true;
        self
    }

    pub fn code(mut self) -> Self {
        self.annotations.code = true;
        self
    }

    pub fn colored(mut self, color: TextColor) -> Self {
        self.color = color;
        self
    }

    pub fn linked(mut self, url: impl Into<String>) -> Self {
        self.link = Some(url.into());
        self
    }
}

// Wire shape of a run as the source API sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawRichText {
    #[serde(rename = "type", default = "default_run_type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<RawText>,
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    annotations: RawAnnotations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawText {
    #[serde(default)]
    content: String,
    #[serde(default)]
    link: Option<RawLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLink {
    url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawAnnotations {
    #[serde(flatten)]
    flags: Annotations,
    #[serde(default)]
    color: TextColor,
}

fn default_run_type() -> String {
    "text".to_string()
}

impl From<RawRichText> for RichTextRun {
    fn from(raw: RawRichText) -> Self {
        // Mentions and equations carry no `text` object; plain_text is their rendering.
        let (content, text_link) = match raw.text {
            Some(text) => (text.content, text.link.map(|l| l.url)),
            None => (raw.plain_text.unwrap_or_default(), None),
        };
        RichTextRun {
            content,
            annotations: raw.annotations.flags,
            color: raw.annotations.color,
            link: text_link.or(raw.href),
        }
    }
}

impl From<RichTextRun> for RawRichText {
    fn from(run: RichTextRun) -> Self {
        RawRichText {
            kind: default_run_type(),
            plain_text: Some(run.content.clone()),
            href: run.link.clone(),
            text: Some(RawText {
                content: run.content,
                link: run.link.map(|url| RawLink { url }),
            }),
            annotations: RawAnnotations {
                flags: run.annotations,
                color: run.color,
            },
        }
    }
}

/// Escapes text for use in element content or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders runs into inline markup.
pub fn format(runs: &[RichTextRun]) -> String {
    runs.iter().map(format_run).collect()
}

/// Concatenated run contents without markup or escaping.
pub fn plain_text(runs: &[RichTextRun]) -> String {
    runs.iter().map(|run| run.content.as_str()).collect()
}

fn format_run(run: &RichTextRun) -> String {
    let mut html = escape(&run.content).replace('\n', "<br>");
    if html.is_empty() {
        return html;
    }

    let a = run.annotations;
    // Innermost first.
    let wrappers: [(bool, &str, &str); 5] = [
        (a.underline, "<u>", "</u>"),
        (a.strikethrough, "<s>", "</s>"),
        (a.italic, "<em>", "</em>"),
        (a.bold, "<strong>", "</strong>"),
        (a.code, "<code>", "</code>"),
    ];
    for (active, open, close) in wrappers {
        if active {
            html = format!("{open}{html}{close}");
        }
    }

    if let Some(class) = run.color.css_class() {
        html = format!("<span class=\"{class}\">{html}</span>");
    }

    if let Some(url) = run.link.as_deref().filter(|u| !u.trim().is_empty()) {
        html = format!("<a href=\"{}\">{html}</a>", escape(url));
    }

    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_runs_format_to_empty_string() {
        assert_eq!(format(&[]), "");
    }

    #[test]
    fn escapes_content_once() {
        let runs = vec![RichTextRun::plain("a < b & \"c\"").bold()];
        assert_eq!(
            format(&runs),
            "<strong>a &lt; b &amp; &quot;c&quot;</strong>"
        );
    }

    #[test]
    fn already_escaped_looking_text_is_escaped_literally() {
        let runs = vec![RichTextRun::plain("&amp;")];
        assert_eq!(format(&runs), "&amp;amp;");
    }

    #[test]
    fn nesting_is_canonical() {
        let a = RichTextRun::plain("x").italic().bold().linked("https://e.com");
        let b = RichTextRun::plain("x").linked("https://e.com").bold().italic();
        let expected = "<a href=\"https://e.com\"><strong><em>x</em></strong></a>";
        assert_eq!(format(&[a]), expected);
        assert_eq!(format(&[b]), expected);
    }

    #[test]
    fn all_annotations_nest_in_fixed_order() {
        let run = RichTextRun::plain("t")
            .underline()
            .strikethrough()
            .code()
            .italic()
            .bold()
            .colored(TextColor::Foreground(NamedColor::Red))
            .linked("/x");
        assert_eq!(
            format(&[run]),
            "<a href=\"/x\"><span class=\"has-text-color has-vivid-red-color\">\
             <code><strong><em><s><u>t</u></s></em></strong></code></span></a>"
        );
    }

    #[test]
    fn formatting_is_deterministic() {
        let runs = vec![
            RichTextRun::plain("Hello "),
            RichTextRun::plain("world").bold(),
        ];
        assert_eq!(format(&runs), format(&runs));
        assert_eq!(format(&runs), "Hello <strong>world</strong>");
    }

    #[test]
    fn unknown_color_falls_back_to_default() {
        assert_eq!(TextColor::parse("chartreuse"), TextColor::Default);
        assert_eq!(TextColor::parse("mauve_background"), TextColor::Default);
        assert_eq!(
            TextColor::parse("blue_background"),
            TextColor::Background(NamedColor::Blue)
        );
        let run = RichTextRun::plain("x").colored(TextColor::parse("chartreuse"));
        assert_eq!(format(&[run]), "x");
    }

    #[test]
    fn newlines_become_line_breaks() {
        assert_eq!(format(&[RichTextRun::plain("a\nb")]), "a<br>b");
    }

    #[test]
    fn link_href_is_escaped() {
        let run = RichTextRun::plain("q").linked("https://e.com/?a=1&b=\"2\"");
        assert_eq!(
            format(&[run]),
            "<a href=\"https://e.com/?a=1&amp;b=&quot;2&quot;\">q</a>"
        );
    }

    #[test]
    fn deserializes_source_run_shape() {
        let json = serde_json::json!({
            "type": "text",
            "text": { "content": "docs", "link": { "url": "https://docs.rs" } },
            "annotations": {
                "bold": true, "italic": false, "strikethrough": false,
                "underline": false, "code": false, "color": "green"
            },
            "plain_text": "docs",
            "href": "https://docs.rs"
        });
        let run: RichTextRun = serde_json::from_value(json).unwrap();
        assert_eq!(run.content, "docs");
        assert!(run.annotations.bold);
        assert_eq!(run.color, TextColor::Foreground(NamedColor::Green));
        assert_eq!(run.link.as_deref(), Some("https://docs.rs"));
    }

    #[test]
    fn mention_runs_use_plain_text() {
        let json = serde_json::json!({
            "type": "mention",
            "mention": { "type": "date", "date": { "start": "2024-01-01" } },
            "plain_text": "2024-01-01",
            "href": null
        });
        let run: RichTextRun = serde_json::from_value(json).unwrap();
        assert_eq!(run.content, "2024-01-01");
        assert_eq!(run.link, None);
    }
}
