//! ARIA candidate expansion.
//!
//! A recorded aria candidate has the shape `role[name=value]`. It expands
//! to a small set of attribute-selector alternatives per role, since the
//! accessible name may come from `aria-label`, `title`, or the native
//! element itself.

/// Expand `role[name=value]` into CSS attribute-selector alternatives.
/// Returns an empty vec when the value does not match the pattern.
pub fn expand_aria(value: &str) -> Vec<String> {
    let Some((role, rest)) = value.split_once('[') else {
        return Vec::new();
    };
    let role = role.trim();
    let Some(body) = rest.strip_suffix(']') else {
        return Vec::new();
    };
    let Some(name) = body.strip_prefix("name=") else {
        return Vec::new();
    };
    let name = name.trim().trim_matches('"').trim_matches('\'');
    if role.is_empty() || name.is_empty() {
        return Vec::new();
    }

    let escaped = name.replace('"', "\\\"");
    let mut selectors = vec![
        format!(r#"[role="{role}"][aria-label="{escaped}"]"#),
        format!(r#"[role="{role}"][title="{escaped}"]"#),
    ];

    for tag in native_tags(role) {
        selectors.push(format!(r#"{tag}[aria-label="{escaped}"]"#));
        selectors.push(format!(r#"{tag}[title="{escaped}"]"#));
    }

    selectors
}

/// Native elements that carry a role implicitly.
fn native_tags(role: &str) -> &'static [&'static str] {
    match role {
        "button" => &["button", "input[type=\"button\"]", "input[type=\"submit\"]"],
        "link" => &["a"],
        "textbox" => &["input", "textarea"],
        "checkbox" => &["input[type=\"checkbox\"]"],
        "radio" => &["input[type=\"radio\"]"],
        "combobox" => &["select"],
        "img" => &["img"],
        "heading" => &["h1", "h2", "h3"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_button_role() {
        let selectors = expand_aria("button[name=Submit order]");
        assert!(selectors.contains(&r#"[role="button"][aria-label="Submit order"]"#.to_string()));
        assert!(selectors.contains(&r#"button[aria-label="Submit order"]"#.to_string()));
    }

    #[test]
    fn unknown_role_still_gets_role_selectors() {
        let selectors = expand_aria("tab[name=Billing]");
        assert_eq!(
            selectors,
            vec![
                r#"[role="tab"][aria-label="Billing"]"#.to_string(),
                r#"[role="tab"][title="Billing"]"#.to_string(),
            ]
        );
    }

    #[test]
    fn malformed_pattern_expands_to_nothing() {
        assert!(expand_aria("button").is_empty());
        assert!(expand_aria("button[label=x]").is_empty());
        assert!(expand_aria("[name=x]").is_empty());
    }
}
