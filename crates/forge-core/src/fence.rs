//! Markdown code-fence stripping for generated source.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\n(.*?)```").expect("valid fence regex"))
}

/// Extract the body of the first fenced code block.
///
/// When `code` contains a fence of the form ```` ```lang\n...``` ````, the
/// text between the fences is trimmed and returned with a single trailing
/// newline. Text without a fence is returned unchanged.
pub fn strip_code_fences(code: &str) -> Cow<'_, str> {
    match fence().captures(code).and_then(|c| c.get(1)) {
        Some(body) => Cow::Owned(format!("{}\n", body.as_str().trim())),
        None => Cow::Borrowed(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tagged_fence() {
        let input = "```jsx\nexport default function App() {}\n```";
        assert_eq!(strip_code_fences(input), "export default function App() {}\n");
    }

    #[test]
    fn test_strips_untagged_fence_with_surrounding_prose() {
        let input = "Here you go:\n```\n  const a = 1;\n\n```\nEnjoy!";
        assert_eq!(strip_code_fences(input), "const a = 1;\n");
    }

    #[test]
    fn test_only_first_fence_is_used() {
        let input = "```tsx\nfirst\n```\ntext\n```tsx\nsecond\n```";
        assert_eq!(strip_code_fences(input), "first\n");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let input = "export default () => null;";
        assert!(matches!(strip_code_fences(input), Cow::Borrowed(_)));
        assert_eq!(strip_code_fences(input), input);
    }

    #[test]
    fn test_unterminated_fence_passes_through() {
        let input = "```jsx\nconst a = 1;";
        assert_eq!(strip_code_fences(input), input);
    }
}
