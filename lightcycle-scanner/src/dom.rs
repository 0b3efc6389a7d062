// DOM enumeration shared by every backend: anchors, forms, actions and
// URLs hidden in comments.

use crate::browser::{Action, FormElement, FormField, PageSnapshot};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// Attribute the chrome backend stamps on elements with event handlers.
pub const ACTION_ATTR: &str = "data-lc-action";
/// Event name stamped next to [`ACTION_ATTR`].
pub const ACTION_EVENT_ATTR: &str = "data-lc-event";

const INLINE_HANDLERS: &[(&str, &str)] = &[
    ("onclick", "click"),
    ("ondblclick", "dblclick"),
    ("onmouseover", "mouseover"),
    ("onmousedown", "mousedown"),
    ("onchange", "change"),
    ("onfocus", "focus"),
    ("onkeyup", "keyup"),
];

static COMMENT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:https?:)?//[-A-Za-z0-9+&@#/%?=~_|!:,.;]+[-A-Za-z0-9+&@#/%=~_|])").unwrap()
});

static COMMENT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s"'(=])(/[A-Za-z0-9_\-./]+\.(?:php|asp|aspx|jsp|do|action|html?|json))\b"#)
        .unwrap()
});

/// Parses rendered HTML into a [`PageSnapshot`].
pub fn parse_page(html: &str, page_url: &Url) -> PageSnapshot {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href], area[href]").unwrap();
    let frame_selector = Selector::parse("iframe[src], frame[src]").unwrap();
    let base_selector = Selector::parse("base[href]").unwrap();
    let form_selector = Selector::parse("form").unwrap();

    let base_url = document
        .select(&base_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut anchors = Vec::new();
    for element in document.select(&anchor_selector) {
        if let Some(href) = element.value().attr("href") {
            anchors.push(href.trim().to_string());
        }
    }
    for element in document.select(&frame_selector) {
        if let Some(src) = element.value().attr("src") {
            anchors.push(src.trim().to_string());
        }
    }

    let forms = document.select(&form_selector).map(parse_form).collect();

    PageSnapshot {
        url: page_url.clone(),
        base_url,
        anchors,
        forms,
        actions: collect_actions(&document),
        comment_urls: collect_comment_urls(&document),
    }
}

fn parse_form(form: ElementRef<'_>) -> FormElement {
    let field_selector = Selector::parse("input, select, textarea, button").unwrap();
    let option_selector = Selector::parse("option").unwrap();
    let attrs = form.value();
    let method = attrs
        .attr("method")
        .map(|m| m.trim().to_ascii_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "GET".to_string());

    let fields = form
        .select(&field_selector)
        .filter_map(|el| {
            let value = el.value();
            let name = value.attr("name")?.to_string();
            let tag = value.name().to_ascii_lowercase();
            let input_type = match tag.as_str() {
                "select" => "select".to_string(),
                "textarea" => "textarea".to_string(),
                "button" => value.attr("type").unwrap_or("submit").to_ascii_lowercase(),
                _ => value.attr("type").unwrap_or("text").to_ascii_lowercase(),
            };
            let options = if tag == "select" {
                el.select(&option_selector)
                    .map(|opt| {
                        opt.value()
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| opt.text().collect::<String>().trim().to_string())
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let field_value = if tag == "textarea" {
                let text: String = el.text().collect();
                (!text.is_empty()).then_some(text)
            } else {
                value.attr("value").map(str::to_string)
            };

            Some(FormField {
                tag,
                name,
                input_type,
                value: field_value,
                id: value.attr("id").map(str::to_string),
                placeholder: value.attr("placeholder").map(str::to_string),
                options,
                disabled: value.attr("disabled").is_some(),
            })
        })
        .collect();

    FormElement {
        action: attrs.attr("action").map(|a| a.trim().to_string()),
        method,
        enctype: attrs.attr("enctype").map(|e| e.trim().to_ascii_lowercase()),
        fields,
    }
}

fn collect_actions(document: &Html) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut seen = HashSet::new();
    let any_selector = Selector::parse("*").unwrap();

    for element in document.select(&any_selector) {
        let attrs = element.value();

        if let Some(marker) = attrs.attr(ACTION_ATTR) {
            let selector = format!("[{}=\"{}\"]", ACTION_ATTR, marker);
            let event = attrs.attr(ACTION_EVENT_ATTR).unwrap_or("click");
            if seen.insert(selector.clone()) {
                actions.push(to_action(selector, event));
            }
            continue;
        }

        // Unstamped markup (static backend): only addressable by id.
        let Some(id) = attrs.attr("id") else {
            continue;
        };
        for (attr, event) in INLINE_HANDLERS {
            if attrs.attr(attr).is_some() {
                let selector = format!("#{}", id);
                if seen.insert(format!("{}:{}", selector, event)) {
                    actions.push(to_action(selector, event));
                }
            }
        }
    }

    actions
}

fn to_action(selector: String, event: &str) -> Action {
    if event == "click" {
        Action::Click { selector }
    } else {
        Action::Trigger {
            selector,
            event: event.to_string(),
        }
    }
}

fn collect_comment_urls(document: &Html) -> Vec<String> {
    let mut urls = Vec::new();
    for node in document.tree.values() {
        if let Node::Comment(comment) = node {
            let text: &str = comment;
            for cap in COMMENT_URL.captures_iter(text) {
                urls.push(cap[1].to_string());
            }
            for cap in COMMENT_PATH.captures_iter(text) {
                urls.push(cap[1].to_string());
            }
        }
    }
    urls.dedup();
    urls
}
