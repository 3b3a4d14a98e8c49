use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod notification;
pub mod session;
pub mod submission;
pub mod timer;

/// Placeholder the upstream uses when a question has no known answer.
pub const UNKNOWN_GABARITO: &str = "?";

/// Choice strings longer than this made only of base64 characters are inline images.
const INLINE_IMAGE_MIN_LEN: usize = 100;

lazy_static! {
    static ref BASE64_CONTENT: Regex = Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceLabel {
    A,
    B,
    C,
    D,
    E,
}

impl ChoiceLabel {
    pub const ALL: [ChoiceLabel; 5] = [
        ChoiceLabel::A,
        ChoiceLabel::B,
        ChoiceLabel::C,
        ChoiceLabel::D,
        ChoiceLabel::E,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceLabel::A => "a",
            ChoiceLabel::B => "b",
            ChoiceLabel::C => "c",
            ChoiceLabel::D => "d",
            ChoiceLabel::E => "e",
        }
    }

    /// Zero-based position of the label (a = 0 .. e = 4).
    pub fn position(self) -> usize {
        self as usize
    }

    pub fn from_position(position: usize) -> Option<Self> {
        Self::ALL.get(position).copied()
    }

    /// Case-insensitive parse; `None` for anything outside a..e (including `"?"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a" => Some(ChoiceLabel::A),
            "b" => Some(ChoiceLabel::B),
            "c" => Some(ChoiceLabel::C),
            "d" => Some(ChoiceLabel::D),
            "e" => Some(ChoiceLabel::E),
            _ => None,
        }
    }
}

impl fmt::Display for ChoiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A question exactly as the upstream simulado API returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    #[serde(default)]
    pub enunciado: String,
    #[serde(default)]
    pub a: String,
    #[serde(default)]
    pub b: String,
    #[serde(default)]
    pub c: String,
    #[serde(default)]
    pub d: String,
    #[serde(default)]
    pub e: String,
    #[serde(default = "unknown_gabarito")]
    pub gabarito: String,
    #[serde(default)]
    pub bloco: Option<usize>,
    #[serde(default)]
    pub fonte: Option<String>,
    #[serde(default)]
    pub imagens: Option<String>,
}

fn unknown_gabarito() -> String {
    UNKNOWN_GABARITO.to_string()
}

impl Question {
    pub fn choice(&self, label: ChoiceLabel) -> &str {
        match label {
            ChoiceLabel::A => &self.a,
            ChoiceLabel::B => &self.b,
            ChoiceLabel::C => &self.c,
            ChoiceLabel::D => &self.d,
            ChoiceLabel::E => &self.e,
        }
    }

    /// The authoritative answer, or `None` when the gabarito is unknown.
    pub fn correct_label(&self) -> Option<ChoiceLabel> {
        ChoiceLabel::parse(&self.gabarito)
    }
}

/// What a choice string actually holds once classified for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChoiceContent {
    Empty,
    Text { text: String },
    Image { base64: String },
}

impl ChoiceContent {
    pub fn classify(raw: &str) -> Self {
        if raw.is_empty() {
            return ChoiceContent::Empty;
        }

        if raw.len() > INLINE_IMAGE_MIN_LEN && BASE64_CONTENT.is_match(raw) {
            return ChoiceContent::Image {
                base64: raw.to_string(),
            };
        }

        // Older imports stored the alternative as a JSON image list
        if raw.contains("base64") {
            match serde_json::from_str::<Vec<QuestionImage>>(raw) {
                Ok(images) => {
                    if let Some(first) = images.into_iter().next() {
                        return ChoiceContent::Image {
                            base64: first.base64,
                        };
                    }
                }
                Err(e) => {
                    tracing::debug!("Choice mentions base64 but is not an image list: {}", e);
                }
            }
        }

        ChoiceContent::Text {
            text: raw.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionImage {
    pub base64: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Parses the JSON-encoded `imagens` string; `"[]"` and blank mean no images.
pub fn parse_images(imagens: &str) -> Result<Vec<QuestionImage>, serde_json::Error> {
    let trimmed = imagens.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed)
}

/// Body of `GET /api/simulados/current`.
#[derive(Debug, Deserialize)]
pub struct CurrentSimuladoResponse {
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// Body of `GET /api/simulados/question/{id}`.
#[derive(Debug, Deserialize)]
pub struct QuestionDetailResponse {
    #[serde(default)]
    pub imagens: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_label_parse_is_case_insensitive() {
        assert_eq!(ChoiceLabel::parse("A"), Some(ChoiceLabel::A));
        assert_eq!(ChoiceLabel::parse(" e "), Some(ChoiceLabel::E));
        assert_eq!(ChoiceLabel::parse("?"), None);
        assert_eq!(ChoiceLabel::parse("f"), None);
    }

    #[test]
    fn choice_label_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChoiceLabel::C).unwrap(), "\"c\"");
        let parsed: ChoiceLabel = serde_json::from_str("\"d\"").unwrap();
        assert_eq!(parsed, ChoiceLabel::D);
    }

    #[test]
    fn question_defaults_missing_gabarito_to_unknown() {
        let q: Question = serde_json::from_str(r#"{"id": 7, "enunciado": "x"}"#).unwrap();
        assert_eq!(q.gabarito, UNKNOWN_GABARITO);
        assert_eq!(q.correct_label(), None);
        assert_eq!(q.bloco, None);
    }

    #[test]
    fn classify_plain_text() {
        assert_eq!(
            ChoiceContent::classify("42 metros"),
            ChoiceContent::Text {
                text: "42 metros".to_string()
            }
        );
        assert_eq!(ChoiceContent::classify(""), ChoiceContent::Empty);
    }

    #[test]
    fn classify_inline_base64_image() {
        let raw = "iVBORw0KGgo".repeat(20);
        assert_eq!(
            ChoiceContent::classify(&raw),
            ChoiceContent::Image { base64: raw.clone() }
        );
    }

    #[test]
    fn short_base64_like_text_stays_text() {
        assert!(matches!(
            ChoiceContent::classify("ABCD"),
            ChoiceContent::Text { .. }
        ));
    }

    #[test]
    fn classify_legacy_json_image_list() {
        let raw = r#"[{"base64": "iVBORw0", "filename": "A.png"}]"#;
        assert_eq!(
            ChoiceContent::classify(raw),
            ChoiceContent::Image {
                base64: "iVBORw0".to_string()
            }
        );
    }

    #[test]
    fn text_mentioning_base64_stays_text() {
        let raw = "the base64 alphabet has 64 symbols";
        assert!(matches!(
            ChoiceContent::classify(raw),
            ChoiceContent::Text { .. }
        ));
    }

    #[test]
    fn parse_images_handles_empty_markers() {
        assert!(parse_images("[]").unwrap().is_empty());
        assert!(parse_images("  ").unwrap().is_empty());
        let images = parse_images(r#"[{"base64": "abc"}]"#).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, None);
        assert!(parse_images("not json").is_err());
    }
}
