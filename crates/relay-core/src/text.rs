//! Small text helpers shared by the router, NLU policy, and task analysis.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"https?://\S+").ok());

/// First http(s) URL in the text, if any.
pub fn extract_url(text: &str) -> Option<String> {
    URL_RE
        .as_ref()
        .and_then(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

/// First whitespace-delimited token (empty for blank text).
pub fn leading_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Split `/cmd a b` into the command token and the remaining argument tokens.
pub fn split_command(text: &str) -> (String, Vec<String>) {
    let mut parts = text.split_whitespace();
    let command = parts.next().unwrap_or("").to_string();
    let args = parts.map(str::to_string).collect();
    (command, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_urls() {
        assert_eq!(
            extract_url("請分析 https://news.example.com/feed.xml 謝謝").as_deref(),
            Some("https://news.example.com/feed.xml")
        );
        assert!(extract_url("沒有網址").is_none());
    }

    #[test]
    fn splits_commands() {
        let (cmd, args) = split_command("  /畫圖  一隻  龍 ");
        assert_eq!(cmd, "/畫圖");
        assert_eq!(args, vec!["一隻", "龍"]);
        assert_eq!(leading_token("   "), "");
    }
}
