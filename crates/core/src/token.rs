use serde::{Deserialize, Serialize};

/// A positional unit of text taken from a page's embedded text layer or from
/// full-page OCR.
///
/// Coordinates are in the producing page's units with the origin at the
/// bottom-left corner, so `y` grows towards the top of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub text: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub line_index: usize,
    #[serde(default)]
    pub token_index: usize,
}

impl Token {
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            height,
            line_index: 0,
            token_index: 0,
        }
    }
}

/// Tokens that share one baseline, ordered left to right.
#[derive(Debug, Clone)]
pub struct Line<'a> {
    /// Baseline of the first (highest) token that opened the line.
    pub y: f64,
    pub tokens: Vec<&'a Token>,
}

impl Line<'_> {
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Group tokens into lines.
///
/// Tokens are walked top of page first; a token joins the running line while
/// its `y` is within `tolerance` of the line's anchor, otherwise it opens a
/// new line. Tokens inside a line are sorted by `x`.
pub fn group_lines(tokens: &[Token], tolerance: f64) -> Vec<Line<'_>> {
    let mut sorted: Vec<&Token> = tokens.iter().filter(|t| !t.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Line<'_>> = Vec::new();
    for token in sorted {
        match lines.last_mut() {
            Some(line) if (line.y - token.y).abs() <= tolerance => line.tokens.push(token),
            _ => lines.push(Line { y: token.y, tokens: vec![token] }),
        }
    }
    for line in &mut lines {
        line.tokens.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_top_down_and_left_to_right() {
        let tokens = vec![
            Token::new("b", 50.0, 700.4, 10.0, 8.0),
            Token::new("c", 10.0, 650.0, 10.0, 8.0),
            Token::new("a", 10.0, 699.8, 10.0, 8.0),
        ];
        let lines = group_lines(&tokens, 4.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "a b");
        assert_eq!(lines[1].text(), "c");
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let tokens = vec![Token::new("  ", 0.0, 10.0, 1.0, 1.0)];
        assert!(group_lines(&tokens, 4.0).is_empty());
    }

    #[test]
    fn deserializes_rasterizer_json() {
        let json = r#"{"text":"FBA1","x":12.5,"y":80,"width":30,"height":9,"lineIndex":2,"tokenIndex":1}"#;
        let t: Token = serde_json::from_str(json).unwrap();
        assert_eq!(t.text, "FBA1");
        assert_eq!(t.line_index, 2);
        assert_eq!(t.token_index, 1);
    }

    #[test]
    fn rows_straddling_a_grid_boundary_stay_together() {
        let tokens = vec![
            Token::new("10000001", 10.0, 700.0, 60.0, 8.0),
            Token::new("FBA15AAAAAA", 200.0, 700.0, 80.0, 8.0),
            Token::new("10000002", 10.0, 662.1, 60.0, 8.0),
            Token::new("FBA15BBBBBB", 200.0, 661.9, 80.0, 8.0),
        ];
        let lines = group_lines(&tokens, 4.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text(), "10000002 FBA15BBBBBB");
    }
}
