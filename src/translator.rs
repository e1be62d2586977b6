use crate::config::Config;
use crate::error::TranslateError;
use crate::text::preview;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEPARATOR: &str = "<user_input>";
const COMPLETIONS_PATH: &str = "/chat/completions";

const PROMPT_TO_CHINESE: &str = "你是一个专业的翻译助手。请将用户提供的文本翻译成中文，文本被一对<user_input>标签包含。
要求：
1. 如果文本本身就是中文，原样输出；
2. 保持原文的语气和风格，译文准确、自然、流畅；
3. 专业术语优先使用标准译名；
4. 如果文本是句子，只输出译文，不要解释，也不要输出<user_input>标签；
5. 如果文本是单个英语单词（含各种时态或语态），给出词性、读音、一个或多个中文释义以及对应的双语例句。";

const PROMPT_TO_ENGLISH: &str = "You are a professional translation assistant. Translate the user's text, enclosed in a pair of <user_input> tags, into English.
Requirements:
1. If the text is already English, output it unchanged.
2. Keep the tone and style of the original; the translation must be accurate, natural and fluent.
3. Prefer the standard English names for technical terms.
4. Output only the translation, with no explanations or comments and without the <user_input> tags.";

const PROMPT_EMOJI: &str = "You are an emoji assistant. Reply with the emoji that best express the emotion or content of the user's text, enclosed in a pair of <user_input> tags.
Requirements:
1. Output only emoji, with no explanations.
2. Several emoji may be combined for complex feelings.
3. The emoji must reflect the tone and content of the text.
4. Never output the <user_input> tags.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    ToChinese,
    ToEnglish,
    Emoji,
}

impl Mode {
    /// Emoji generation is exempt from the length confirmation.
    pub fn is_translation(self) -> bool {
        !matches!(self, Mode::Emoji)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::ToChinese => "to-Chinese",
            Mode::ToEnglish => "to-English",
            Mode::Emoji => "emoji",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Chinese,
    English,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(skip)]
    pub model: String,
}

impl Usage {
    /// Estimated cost in yuan for (prompt, completion), from the provider's
    /// per-1k-token price list.
    pub fn cost(&self) -> (f64, f64) {
        let (p, c) = if self.model.to_lowercase().contains("turbo") {
            (0.001, 0.003)
        } else {
            (0.015, 0.045)
        };
        (
            p * self.prompt_tokens as f64 / 1000.0,
            c * self.completion_tokens as f64 / 1000.0,
        )
    }

    pub fn summary(&self) -> String {
        let (p, c) = self.cost();
        format!(
            "Token: {}+{}={} | Cost: {:.4}+{:.4}={:.4} 元",
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens,
            p,
            c,
            p + c
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub original: String,
    pub translated: String,
    pub mode: Mode,
    pub usage: Usage,
}

/// The two operations every translator variant offers. Both block the calling
/// thread; run them on a worker.
pub trait Translate: Send {
    fn mode(&self) -> Mode;

    fn translate(&self, text: &str) -> Result<Translation, TranslateError>;

    /// `on_chunk` gets the whole output accumulated so far each time it grows.
    fn translate_stream(
        &self,
        text: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<Translation, TranslateError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub url: String,
    pub key: String,
    pub model: String,
}

impl ApiSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            url: cfg.chat_api_url.trim().to_string(),
            key: cfg.chat_api_key.trim().to_string(),
            model: cfg.chat_api_model.trim().to_string(),
        }
    }

    fn validate(&self) -> Result<(), TranslateError> {
        if self.key.is_empty() {
            return Err(TranslateError::MissingSetting("API key"));
        }
        if self.url.is_empty() {
            return Err(TranslateError::MissingSetting("API URL"));
        }
        if self.model.is_empty() {
            return Err(TranslateError::MissingSetting("API model"));
        }
        Ok(())
    }

    /// Accepts either a base URL or the full chat-completions endpoint.
    pub fn endpoint(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if url.ends_with(COMPLETIONS_PATH) {
            url.to_string()
        } else {
            format!("{}{}", url, COMPLETIONS_PATH)
        }
    }
}

/// Chat-completion translator. Variants only differ in prompt, temperature
/// and how the raw output is tidied up.
#[derive(Debug, Clone)]
pub enum Translator {
    Chat { api: ApiSettings, target: Language },
    Emoji { api: ApiSettings },
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

impl Translator {
    pub fn for_mode(mode: Mode, cfg: &Config) -> Self {
        let api = ApiSettings::from_config(cfg);
        match mode {
            Mode::ToChinese => Translator::Chat {
                api,
                target: Language::Chinese,
            },
            Mode::ToEnglish => Translator::Chat {
                api,
                target: Language::English,
            },
            Mode::Emoji => Translator::Emoji { api },
        }
    }

    fn api(&self) -> &ApiSettings {
        match self {
            Translator::Chat { api, .. } | Translator::Emoji { api } => api,
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Translator::Chat {
                target: Language::Chinese,
                ..
            } => PROMPT_TO_CHINESE,
            Translator::Chat {
                target: Language::English,
                ..
            } => PROMPT_TO_ENGLISH,
            Translator::Emoji { .. } => PROMPT_EMOJI,
        }
    }

    fn temperature(&self) -> f32 {
        match self {
            Translator::Chat { .. } => 0.3,
            Translator::Emoji { .. } => 0.7,
        }
    }

    fn finish(&self, raw: &str) -> String {
        let stripped = raw.replace(SEPARATOR, "").replace("</user_input>", "");
        match self {
            Translator::Chat { .. } => stripped.trim().to_string(),
            Translator::Emoji { .. } => {
                stripped.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        }
    }

    fn result(
        &self,
        text: &str,
        raw: &str,
        usage: Option<Usage>,
    ) -> Result<Translation, TranslateError> {
        let translated = self.finish(raw);
        if translated.is_empty() {
            return Err(TranslateError::Empty);
        }
        let mut usage = usage.unwrap_or_default();
        usage.model = self.api().model.clone();
        info!("original: {}", preview(text, 15));
        info!("{}: {}", self.mode(), preview(&translated, 15));
        info!("model: {}", usage.model);
        Ok(Translation {
            original: text.to_string(),
            translated,
            mode: self.mode(),
            usage,
        })
    }

    fn request<'a>(&'a self, user: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.api().model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature(),
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, TranslateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| TranslateError::Runtime(e.to_string()))?;

        let resp = client
            .post(self.api().endpoint())
            .bearer_auth(&self.api().key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        warn!("API error {}: {}", status, preview(&text, 300));
        Err(match status.as_u16() {
            401 | 403 => TranslateError::Unauthorized {
                status: status.as_u16(),
            },
            code => TranslateError::Api {
                status: code,
                message: error_message(&text),
            },
        })
    }

    async fn complete(&self, text: &str) -> Result<Translation, TranslateError> {
        let user = wrap(text);
        let resp = self.send(&self.request(&user, false)).await?;
        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        self.result(text, &content, parsed.usage)
    }

    async fn stream(
        &self,
        text: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<Translation, TranslateError> {
        let user = wrap(text);
        let resp = self.send(&self.request(&user, true)).await?;

        let mut body = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut state = StreamState::default();
        let mut done = false;

        while let Some(chunk) = body.next().await {
            let bytes = chunk
                .map_err(|e| TranslateError::Network(format!("stream interrupted: {}", e)))?;
            for event in decoder.push(&bytes) {
                match event {
                    SseEvent::Done => {
                        done = true;
                        break;
                    }
                    SseEvent::Data(payload) => {
                        if state.apply(&payload)? {
                            on_chunk(&state.text);
                        }
                    }
                }
            }
            if done {
                break;
            }
        }
        if !done {
            if let Some(SseEvent::Data(payload)) = decoder.finish() {
                if state.apply(&payload)? {
                    on_chunk(&state.text);
                }
            }
            debug!("stream ended without [DONE]");
        }

        self.result(text, &state.text, state.usage)
    }
}

impl Translate for Translator {
    fn mode(&self) -> Mode {
        match self {
            Translator::Chat {
                target: Language::Chinese,
                ..
            } => Mode::ToChinese,
            Translator::Chat {
                target: Language::English,
                ..
            } => Mode::ToEnglish,
            Translator::Emoji { .. } => Mode::Emoji,
        }
    }

    fn translate(&self, text: &str) -> Result<Translation, TranslateError> {
        self.api().validate()?;
        block_on(self.complete(text))
    }

    fn translate_stream(
        &self,
        text: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<Translation, TranslateError> {
        self.api().validate()?;
        block_on(self.stream(text, on_chunk))
    }
}

fn wrap(text: &str) -> String {
    format!("{}{}{}", SEPARATOR, text, SEPARATOR)
}

fn block_on<T>(fut: impl Future<Output = Result<T, TranslateError>>) -> Result<T, TranslateError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TranslateError::Runtime(e.to_string()))?
        .block_on(fut)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ if body.trim().is_empty() => "no details".to_string(),
        _ => preview(body.trim(), 300),
    }
}

#[derive(Default)]
struct StreamState {
    text: String,
    usage: Option<Usage>,
}

impl StreamState {
    /// Folds one `data:` payload in; `true` when the text grew.
    fn apply(&mut self, payload: &str) -> Result<bool, TranslateError> {
        let chunk: StreamChunk = serde_json::from_str(payload)
            .map_err(|e| TranslateError::Malformed(format!("{} in {}", e, preview(payload, 200))))?;
        if let Some(err) = chunk.error {
            return Err(TranslateError::Api {
                status: 200,
                message: err.message,
            });
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let before = self.text.len();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text.push_str(&content);
            }
        }
        Ok(self.text.len() > before)
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits a server-sent-event byte stream into `data:` payloads. Bytes are
/// buffered until a full line arrives, so multi-byte characters split across
/// network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();
    match data {
        "" => None,
        "[DONE]" => Some(SseEvent::Done),
        payload => Some(SseEvent::Data(payload.to_string())),
    }
}
