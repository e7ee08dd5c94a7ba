/// Returns the last segment of a path, ignoring trailing slashes.
///
/// Used for deriving display names and slugs from project paths, so it must
/// behave for synthetic paths (`/unknown/port-4096`) as well as real ones.
#[must_use]
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment,
        _ => trimmed,
    }
}

/// Converts a project path to a hostname-safe slug.
///
/// Takes the last path segment, lowercases it, folds every run of
/// characters outside `[a-z0-9-]` into a single `-`, collapses repeated
/// hyphens, and trims hyphens from both ends. An empty result becomes
/// `default` so every backend always has a routable name.
///
/// `/home/alice/projects/My Awesome Project` becomes `my-awesome-project`.
#[must_use]
pub fn slugify(path: &str) -> String {
    let base = base_name(path).to_lowercase();

    let mut slug = String::with_capacity(base.len());
    for c in base.chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if mapped == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(mapped);
    }

    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_last_segment() {
        assert_eq!(slugify("/home/alice/myproject"), "myproject");
        assert_eq!(slugify("/home/alice/My Awesome Project"), "my-awesome-project");
        assert_eq!(slugify("relative/path/to/app"), "app");
        assert_eq!(slugify("bare-name"), "bare-name");
    }

    #[test]
    fn normalizes_special_characters() {
        assert_eq!(slugify("/srv/web_app.v2"), "web-app-v2");
        assert_eq!(slugify("/srv/hello---world"), "hello-world");
        assert_eq!(slugify("/srv/Ünïcode Prøject"), "n-code-pr-ject");
        assert_eq!(slugify("/srv/--edges--"), "edges");
    }

    #[test]
    fn empty_input_falls_back_to_default() {
        assert_eq!(slugify(""), "default");
        assert_eq!(slugify("/"), "default");
        assert_eq!(slugify("///"), "default");
        assert_eq!(slugify("/home/alice/!!!"), "default");
    }

    #[test]
    fn is_idempotent_and_stays_in_charset() {
        let inputs = [
            "/home/alice/My Awesome Project",
            "/srv/web_app.v2",
            "/unknown/port-4096",
            "Ünïcode Prøject",
            "!!!",
            "a",
        ];
        for input in inputs {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "not idempotent for {input:?}");
            assert!(!once.is_empty());
            assert!(!once.starts_with('-') && !once.ends_with('-'));
            assert!(!once.contains("--"));
            assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }
    }

    #[test]
    fn base_name_handles_trailing_slashes() {
        assert_eq!(base_name("/home/alice/proj/"), "proj");
        assert_eq!(base_name("/unknown/port-4096"), "port-4096");
        assert_eq!(base_name("plain"), "plain");
    }
}
