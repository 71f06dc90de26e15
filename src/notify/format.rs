//! Telegram message text for a project.

use crate::model::Project;

/// Description characters kept in a notification.
pub const DESCRIPTION_PREVIEW_CHARS: usize = 200;

/// Label of the inline button linking to the project.
pub const OPEN_PROJECT_LABEL: &str = "Відкрити проект";

/// Renders the HTML notification text for `project`.
#[must_use]
pub fn project_message(project: &Project) -> String {
    let description = strip_html(&project.description);
    let description = if description.is_empty() {
        "Опис відсутній".to_owned()
    } else {
        preview(&description, DESCRIPTION_PREVIEW_CHARS)
    };

    let mut text = format!(
        "<b>🔥 Новий проект:</b> {}\n\n<b>Опис:</b> {}\n\n",
        escape_html(&project.title),
        escape_html(&description)
    );

    if let Some(ref budget) = project.budget {
        text.push_str(&format!("<b>Бюджет:</b> {}\n", escape_html(&budget.to_string())));
    }

    if !project.skill_names.is_empty() {
        text.push_str(&format!(
            "<b>Навички:</b> {}\n",
            escape_html(&project.skill_names.join(", "))
        ));
    }

    if let Some(employer) = project.employer.as_ref().and_then(|e| e.display_name()) {
        text.push_str(&format!("<b>Замовник:</b> {}\n", escape_html(&employer)));
    }

    text.push_str(&format!(
        "\n<b>🔗 <a href=\"{}\">{OPEN_PROJECT_LABEL}</a></b>",
        escape_html(&project.web_url())
    ));

    text
}

/// Turns marketplace HTML into plain text; paragraphs and line breaks become
/// newlines, other tags are dropped, common entities are decoded.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('>') else {
            // Unclosed tag: keep the remainder as text.
            text.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let tag = rest[start + 1..start + len]
            .trim()
            .trim_end_matches('/')
            .trim()
            .to_ascii_lowercase();
        if tag == "/p" || tag == "br" {
            text.push('\n');
        }
        rest = &rest[start + len + 1..];
    }
    text.push_str(rest);

    decode_entities(&text).trim().to_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Escapes text for Telegram's HTML parse mode.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// First `max_chars` characters, with an ellipsis when something was cut.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_owned()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>().trim_end())
    }
}
