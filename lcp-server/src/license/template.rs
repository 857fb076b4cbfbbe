//! Minimal URI-template expansion for actionable links.
//!
//! Supports simple `{var}` substitution. Query-form expressions such as
//! `{?id,name}` are left in place: they belong to the client, which fills
//! them in when it calls an actionable link.

/// Expand `{name}` occurrences for each `(name, value)` pair.
/// Unknown variables and query-form expressions pass through untouched.
pub fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_single_var() {
        let href = expand(
            "https://example.org/hint/{license_id}",
            &[("license_id", "l-42")],
        );
        assert_eq!(href, "https://example.org/hint/l-42");
    }

    #[test]
    fn query_form_passes_through() {
        let href = expand(
            "https://example.org/renew/{license_id}{?end,id,name}",
            &[("license_id", "l-42")],
        );
        assert_eq!(href, "https://example.org/renew/l-42{?end,id,name}");
    }

    #[test]
    fn unknown_vars_untouched() {
        let href = expand("https://example.org/{other}", &[("license_id", "l-42")]);
        assert_eq!(href, "https://example.org/{other}");
    }
}
