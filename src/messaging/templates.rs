use std::collections::HashMap;

use crate::shared::models::{Lead, Opportunity};

/// Replaces `{{name}}` placeholders against the supplied variables.
/// Unknown placeholders render as empty strings so a stale template never
/// leaks its own syntax into an outbound message.
pub fn render(body: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                if let Some(value) = vars.get(key) {
                    out.push_str(value);
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Variables are resolved at send time, not enqueue time, so the message
/// reflects the freshest lead and stage data.
pub fn build_vars(lead: &Lead, opportunity: Option<&Opportunity>) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("first_name", lead.first_name.clone());
    vars.insert("last_name", lead.last_name.clone());
    vars.insert(
        "full_name",
        format!("{} {}", lead.first_name, lead.last_name),
    );
    vars.insert("postcode", lead.postcode.clone());
    if let Some(project) = &lead.project_type {
        vars.insert("project_type", project.clone());
    }
    if let Some(opp) = opportunity {
        vars.insert("stage", opp.stage.clone());
        if let Some(value) = opp.value_estimate {
            vars.insert("value_estimate", format!("£{:.2}", value as f64 / 100.0));
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let rendered = render(
            "Hi {{first_name}}, your {{project_type}} quote is ready.",
            &vars(&[("first_name", "Ana"), ("project_type", "loft")]),
        );
        assert_eq!(rendered, "Hi Ana, your loft quote is ready.");
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let rendered = render("Hello {{nickname}}!", &vars(&[("first_name", "Ana")]));
        assert_eq!(rendered, "Hello !");
    }

    #[test]
    fn tolerates_whitespace_and_unclosed_braces() {
        let rendered = render(
            "Hi {{ first_name }}, see {{broken",
            &vars(&[("first_name", "Ana")]),
        );
        assert_eq!(rendered, "Hi Ana, see {{broken");
    }

    #[test]
    fn plain_text_passes_through() {
        let rendered = render("No placeholders here.", &HashMap::new());
        assert_eq!(rendered, "No placeholders here.");
    }
}
