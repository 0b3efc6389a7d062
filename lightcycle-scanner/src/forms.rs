// Form filling and submission synthesis

use crate::browser::{FormElement, FormField};
use crate::request::{Body, MULTIPART, Request, Source};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

pub const DEFAULT_INPUT_TEXT: &str = "Lightcycle";

const MULTIPART_BOUNDARY: &str = "----LightcycleFormBoundary7MA4YWxkTrZu0gW";

/// Categories accepted by `--custom-form-values`.
pub const ALLOWED_FORM_CATEGORIES: &[&str] = &[
    "default", "mail", "code", "phone", "username", "password", "url", "date", "number",
];

// Checked in order; the first category whose keyword appears in the field's
// name, id or placeholder wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str], &str)] = &[
    ("password", &["pass", "pwd"], "Lightcycle6."),
    ("mail", &["mail"], "lightcycle@example.com"),
    ("code", &["captcha", "code", "ver", "yanzhengma"], "123a"),
    ("phone", &["phone", "mobile", "tel", "shouji"], "18812345678"),
    ("url", &["url", "site", "web", "blog", "link"], "https://lightcycle.example/"),
    ("date", &["date", "time", "year", "now"], "2018-01-01"),
    ("username", &["name", "user", "login", "account", "id"], "lightcycle"),
    ("number", &["day", "age", "num", "count", "qty"], "10"),
];

fn category_default(category: &str) -> &'static str {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(name, _, _)| *name == category)
        .map(|(_, _, value)| *value)
        .unwrap_or(DEFAULT_INPUT_TEXT)
}

fn category_for_type(input_type: &str) -> Option<&'static str> {
    match input_type {
        "email" => Some("mail"),
        "password" => Some("password"),
        "tel" => Some("phone"),
        "url" => Some("url"),
        "number" | "range" => Some("number"),
        "date" | "datetime-local" | "month" | "week" | "time" => Some("date"),
        _ => None,
    }
}

/// Chooses values for form fields.
#[derive(Debug, Clone, Default)]
pub struct FormFiller {
    /// Per-category overrides, keyed by a name from [`ALLOWED_FORM_CATEGORIES`].
    pub category_values: HashMap<String, String>,
    /// Substring of a field name mapped to the value to use.
    pub keyword_values: HashMap<String, String>,
}

impl FormFiller {
    pub fn new(
        category_values: HashMap<String, String>,
        keyword_values: HashMap<String, String>,
    ) -> Self {
        Self {
            category_values,
            keyword_values,
        }
    }

    fn category_value(&self, category: &str) -> String {
        self.category_values
            .get(category)
            .cloned()
            .unwrap_or_else(|| category_default(category).to_string())
    }

    fn default_text(&self) -> String {
        self.category_values
            .get("default")
            .cloned()
            .unwrap_or_else(|| DEFAULT_INPUT_TEXT.to_string())
    }

    /// Value for a free-form field (text, textarea, typed inputs).
    pub fn value_for(&self, field: &FormField) -> String {
        let name = field.name.to_ascii_lowercase();

        let mut keywords: Vec<(&String, &String)> = self.keyword_values.iter().collect();
        keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        if let Some((_, value)) = keywords
            .into_iter()
            .find(|(kw, _)| name.contains(&kw.to_ascii_lowercase()))
        {
            return value.clone();
        }

        if let Some(preset) = field.value.as_ref().filter(|v| !v.is_empty()) {
            return preset.clone();
        }

        if let Some(category) = category_for_type(&field.input_type) {
            return self.category_value(category);
        }

        let haystack = [
            Some(name.as_str()),
            field.id.as_deref(),
            field.placeholder.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

        for (category, keywords, _) in CATEGORY_KEYWORDS {
            if keywords.iter().any(|kw| haystack.contains(kw)) {
                return self.category_value(category);
            }
        }

        self.default_text()
    }

    /// Name/value pairs a browser would submit for `form`.
    pub fn fill(&self, form: &FormElement) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut radios_done: Vec<&str> = Vec::new();
        let mut submitter_done = false;

        for field in form.fields.iter().filter(|f| !f.disabled) {
            let value = match field.input_type.as_str() {
                "submit" | "image" => {
                    if submitter_done {
                        continue;
                    }
                    submitter_done = true;
                    field.value.clone().unwrap_or_default()
                }
                "button" | "reset" => continue,
                "hidden" => field.value.clone().unwrap_or_default(),
                "checkbox" => field.value.clone().unwrap_or_else(|| "on".to_string()),
                "radio" => {
                    if radios_done.contains(&field.name.as_str()) {
                        continue;
                    }
                    radios_done.push(&field.name);
                    field.value.clone().unwrap_or_else(|| "on".to_string())
                }
                "file" => "lightcycle.txt".to_string(),
                "select" => field
                    .value
                    .clone()
                    .or_else(|| field.options.first().cloned())
                    .unwrap_or_default(),
                _ => self.value_for(field),
            };
            pairs.push((field.name.clone(), value));
        }

        pairs
    }

    /// Builds the request submitting `form` from a page whose effective base is `base`.
    pub fn synthesize(&self, form: &FormElement, base: &Url) -> Option<Request> {
        let action = match form.action.as_deref() {
            Some(a) if !a.is_empty() => a,
            _ => base.as_str(),
        };
        let mut target = Request::resolve(base, action, "GET", Source::Form)?.url().clone();
        let pairs = self.fill(form);
        let str_pairs = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()));

        let request = if form.method == "POST" {
            let body = if form.enctype.as_deref() == Some(MULTIPART) {
                multipart_body(&pairs)
            } else {
                Body::urlencoded(str_pairs)
            };
            Request::new("POST", target, Source::Form).with_body(body)
        } else {
            // GET (and anything unknown) replaces the action's query string.
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(str_pairs)
                .finish();
            target.set_query((!query.is_empty()).then_some(query.as_str()));
            Request::new("GET", target, Source::Form)
        };

        debug!("Synthesized form submission {}", request);
        Some(request)
    }
}

fn multipart_body(pairs: &[(String, String)]) -> Body {
    let mut data = String::new();
    for (name, value) in pairs {
        data.push_str(&format!("--{}\r\n", MULTIPART_BOUNDARY));
        data.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            name, value
        ));
    }
    data.push_str(&format!("--{}--\r\n", MULTIPART_BOUNDARY));
    Body::new(
        Some(format!("{}; boundary={}", MULTIPART, MULTIPART_BOUNDARY)),
        data,
    )
}
