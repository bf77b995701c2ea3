//! HTML email assembly.
//!
//! An email is an ordered list of blocks wrapped in one fixed style sheet.
//! Text arguments are HTML-escaped; `custom_html` is inserted verbatim.

use handlebars::html_escape;

const STYLE: &str = r#"<style>
    body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
    .header { padding: 20px; background-color: #f8f9fa; text-align: center; }
    .footer { padding: 20px; background-color: #f8f9fa; text-align: center; font-size: 12px; }
    .content { padding: 20px; }
    .button {
        display: inline-block;
        padding: 10px 20px;
        background-color: #007bff;
        color: white;
        text-decoration: none;
        border-radius: 5px;
    }
</style>"#;

#[derive(Debug, Default, Clone)]
pub struct EmailBuilder {
    blocks: Vec<String>,
}

impl EmailBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(self, text: &str) -> Self {
        self.push(format!(r#"<div class="header">{}</div>"#, html_escape(text)))
    }

    pub fn footer(self, text: &str) -> Self {
        self.push(format!(r#"<div class="footer">{}</div>"#, html_escape(text)))
    }

    /// A paragraph.
    pub fn text(self, text: &str) -> Self {
        self.push(format!("<p>{}</p>", html_escape(text)))
    }

    /// A paragraph in bold.
    pub fn bold(self, text: &str) -> Self {
        self.push(format!("<p><strong>{}</strong></p>", html_escape(text)))
    }

    /// Text that does not start a new line.
    pub fn inline_text(self, text: &str) -> Self {
        self.push(format!("<span>{}</span>", html_escape(text)))
    }

    pub fn link(self, text: &str, url: &str) -> Self {
        self.push(format!(r#"<a href="{}">{}</a>"#, html_escape(url), html_escape(text)))
    }

    /// A link styled as a button.
    pub fn button(self, text: &str, url: &str) -> Self {
        self.push(format!(
            r#"<a href="{}" class="button">{}</a>"#,
            html_escape(url),
            html_escape(text)
        ))
    }

    pub fn list<I, S>(self, items: I, ordered: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tag = if ordered { "ol" } else { "ul" };
        let items: String = items
            .into_iter()
            .map(|item| format!("<li>{}</li>", html_escape(item.as_ref())))
            .collect();
        self.push(format!("<{tag}>{items}</{tag}>"))
    }

    pub fn divider(self) -> Self {
        self.push("<hr>".to_string())
    }

    pub fn custom_html(self, html: &str) -> Self {
        self.push(html.to_string())
    }

    pub fn build(self) -> String {
        let content = self.blocks.concat();
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n{STYLE}\n</head>\n<body>\n<div class=\"content\">\n{content}\n</div>\n</body>\n</html>\n"
        )
    }

    fn push(mut self, block: String) -> Self {
        self.blocks.push(block);
        self
    }
}
