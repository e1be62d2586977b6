use crate::config::Config;

const DETECTION_SAMPLE: usize = 30;
const CHINESE_RATIO: f32 = 0.5;

/// Trims every line, collapses runs of spaces/tabs, drops blank lines.
pub fn clean(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Judged on the first few characters only.
pub fn is_mostly_chinese(text: &str) -> bool {
    let sample: Vec<char> = text.chars().take(DETECTION_SAMPLE).collect();
    if sample.is_empty() {
        return false;
    }
    let cjk = sample.iter().filter(|c| is_cjk(**c)).count();
    cjk as f32 / sample.len() as f32 > CHINESE_RATIO
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthCheck {
    pub chars: usize,
    pub threshold: usize,
    pub chinese: bool,
}

impl LengthCheck {
    pub fn message(&self) -> String {
        let kind = if self.chinese { "Chinese" } else { "non-Chinese" };
        format!(
            "Clipboard text (mostly {}) is {} characters long.\n\
             Threshold: {} characters.\nTranslate anyway?",
            kind, self.chars, self.threshold
        )
    }
}

/// `Some` when the text is at or above the threshold for its script.
pub fn check_length(text: &str, cfg: &Config) -> Option<LengthCheck> {
    let chinese = is_mostly_chinese(text);
    let threshold = if chinese {
        cfg.chinese_threshold
    } else {
        cfg.english_threshold
    };
    let chars = text.chars().count();
    (chars >= threshold).then_some(LengthCheck {
        chars,
        threshold,
        chinese,
    })
}

/// First `n` chars followed by an ellipsis, for log lines.
pub fn preview(text: &str, n: usize) -> String {
    let mut out: String = text.chars().take(n).collect();
    if text.chars().nth(n).is_some() {
        out.push_str("...");
    }
    out
}
