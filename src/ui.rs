use crate::clipboard;
use crate::config::Config;
use crate::controller::{Command, View};
use crate::hotkey::Chord;
use crate::translator::{Mode, Translation};
use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui;
use egui_phosphor::regular as icons;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TITLE: &str = "ClipTranslate";
const DELIMITER: &str = "────────────────────────────────────────────────────────────";
const COPY_FEEDBACK: Duration = Duration::from_millis(1500);
const CJK_FONTS: &[&str] = &[
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\msyh.ttf",
    "C:\\Windows\\Fonts\\simsun.ttc",
    "C:\\Windows\\Fonts\\simhei.ttf",
];
const EMOJI_FONT: &str = "C:\\Windows\\Fonts\\seguiemj.ttf";

/// Set once the event loop is up so other threads can wake it.
static UI_CTX: Lazy<Mutex<Option<egui::Context>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug, Clone)]
pub enum UiMessage {
    Loading { original: String, mode: Mode },
    Progress(String),
    Finished(Translation),
    Failed(String),
    Show,
    Toggle,
    OpenSettings,
}

/// Sending side of the window; cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiMessage>,
}

pub fn channel() -> (UiHandle, Receiver<UiMessage>) {
    let (tx, rx) = unbounded();
    (UiHandle { tx }, rx)
}

impl UiHandle {
    fn send(&self, msg: UiMessage) {
        if self.tx.send(msg).is_err() {
            warn!("UI: window is gone, message dropped");
            return;
        }
        if let Some(ctx) = UI_CTX.lock().as_ref() {
            ctx.request_repaint();
        }
    }
}

impl View for UiHandle {
    fn loading(&self, original: &str, mode: Mode) {
        self.send(UiMessage::Loading {
            original: original.to_string(),
            mode,
        });
    }

    fn progress(&self, partial: &str) {
        self.send(UiMessage::Progress(partial.to_string()));
    }

    fn finished(&self, translation: &Translation) {
        self.send(UiMessage::Finished(translation.clone()));
    }

    fn failed(&self, message: &str) {
        self.send(UiMessage::Failed(message.to_string()));
    }

    fn show(&self) {
        self.send(UiMessage::Show);
    }

    fn toggle(&self) {
        self.send(UiMessage::Toggle);
    }

    fn open_settings(&self) {
        self.send(UiMessage::OpenSettings);
    }
}

/// Checks a settings draft before it is written to disk.
pub fn check_settings(cfg: &Config) -> Result<(), String> {
    let hotkeys = [
        ("Chinese", &cfg.hotkey_to_chinese),
        ("English", &cfg.hotkey_to_english),
        ("Emoji", &cfg.hotkey_to_emoji),
    ];
    for (label, name) in hotkeys {
        Chord::parse(name).map_err(|e| format!("{} hotkey: {}", label, e))?;
    }
    for (i, (_, a)) in hotkeys.iter().enumerate() {
        for (_, b) in &hotkeys[i + 1..] {
            if a.trim().eq_ignore_ascii_case(b.trim()) {
                return Err(format!("hotkey `{}` is used twice", a));
            }
        }
    }
    if cfg.chat_api_url.trim().is_empty() {
        return Err("API URL must not be empty".into());
    }
    if cfg.chat_api_model.trim().is_empty() {
        return Err("API model must not be empty".into());
    }
    Ok(())
}

struct SettingsForm {
    draft: Config,
    error: Option<String>,
}

struct TranslationApp {
    rx: Receiver<UiMessage>,
    config: Arc<Mutex<Config>>,
    commands: Sender<Command>,
    original: String,
    translated: String,
    mode: Option<Mode>,
    usage: String,
    error: Option<String>,
    busy: bool,
    visible: bool,
    copied_at: Option<Instant>,
    settings: Option<SettingsForm>,
    fonts_set: bool,
}

impl TranslationApp {
    fn new(
        rx: Receiver<UiMessage>,
        config: Arc<Mutex<Config>>,
        commands: Sender<Command>,
    ) -> Self {
        let hint = {
            let c = config.lock();
            format!(
                "Copy some text, then press {} (to Chinese), {} (to English) or {} (emoji).",
                c.hotkey_to_chinese, c.hotkey_to_english, c.hotkey_to_emoji
            )
        };
        Self {
            rx,
            config,
            commands,
            original: hint,
            translated: String::new(),
            mode: None,
            usage: String::new(),
            error: None,
            busy: false,
            visible: true,
            copied_at: None,
            settings: None,
            fonts_set: false,
        }
    }

    fn apply(&mut self, ctx: &egui::Context, msg: UiMessage) {
        match msg {
            UiMessage::Loading { original, mode } => {
                self.original = original;
                self.translated.clear();
                self.usage.clear();
                self.error = None;
                self.mode = Some(mode);
                self.busy = true;
                self.set_visible(ctx, true);
            }
            UiMessage::Progress(partial) => {
                self.translated = partial;
            }
            UiMessage::Finished(t) => {
                self.original = t.original;
                self.translated = t.translated;
                self.mode = Some(t.mode);
                self.usage = t.usage.summary();
                self.busy = false;
                self.set_visible(ctx, true);
            }
            UiMessage::Failed(message) => {
                // Whatever streamed in before the failure is not a result.
                self.translated.clear();
                self.error = Some(message);
                self.busy = false;
                self.set_visible(ctx, true);
            }
            UiMessage::Show => self.set_visible(ctx, true),
            UiMessage::Toggle => {
                let v = !self.visible;
                self.set_visible(ctx, v);
            }
            UiMessage::OpenSettings => {
                if self.settings.is_none() {
                    self.settings = Some(SettingsForm {
                        draft: self.config.lock().clone(),
                        error: None,
                    });
                }
                self.set_visible(ctx, true);
            }
        }
    }

    fn set_visible(&mut self, ctx: &egui::Context, visible: bool) {
        ctx.send_viewport_cmd(egui::ViewportCommand::Visible(visible));
        if visible {
            ctx.send_viewport_cmd(egui::ViewportCommand::Focus);
        }
        if self.visible != visible {
            info!("window {}", if visible { "shown" } else { "hidden" });
        }
        self.visible = visible;
    }

    fn fill(&self) -> egui::Color32 {
        let opacity = self.config.lock().window_opacity.clamp(0.0, 1.0);
        egui::Color32::from_rgba_unmultiplied(0xD2, 0xDC, 0xDF, (opacity * 255.0) as u8)
    }

    fn header(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let drag = ui.interact(ui.max_rect(), egui::Id::new("drag_area"), egui::Sense::drag());
        if drag.drag_started() {
            ctx.send_viewport_cmd(egui::ViewportCommand::StartDrag);
        }
        ui.horizontal(|ui| {
            let title = match self.mode {
                Some(mode) => format!("{} {} · {}", icons::TRANSLATE, TITLE, mode),
                None => format!("{} {}", icons::TRANSLATE, TITLE),
            };
            ui.heading(title);
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button(icons::X).on_hover_text("Hide (Esc)").clicked() {
                    self.set_visible(ctx, false);
                }
                if ui.button(icons::GEAR).on_hover_text("Settings").clicked() {
                    let _ = self.commands.send(Command::OpenSettings);
                }
                let copied = self.copied_at.is_some_and(|t| t.elapsed() < COPY_FEEDBACK);
                let label = if copied {
                    format!("{} Copied!", icons::CHECK)
                } else {
                    format!("{} Copy", icons::COPY)
                };
                let can_copy = !self.translated.is_empty() && !self.busy;
                if ui.add_enabled(can_copy, egui::Button::new(label)).clicked() {
                    match clipboard::write_string(&self.translated) {
                        Ok(()) => self.copied_at = Some(Instant::now()),
                        Err(e) => warn!("copy failed: {}", e),
                    }
                }
            });
        });
    }

    fn body(&self, ui: &mut egui::Ui) {
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                let mut original = self.original.as_str();
                ui.add(
                    egui::TextEdit::multiline(&mut original)
                        .desired_width(f32::INFINITY)
                        .frame(false),
                );
                if let Some(err) = &self.error {
                    ui.separator();
                    ui.colored_label(
                        egui::Color32::from_rgb(0xD3, 0x2F, 0x2F),
                        format!("Error: {}", err),
                    );
                } else if self.busy || !self.translated.is_empty() {
                    ui.label(DELIMITER);
                    let mut translated = self.translated.as_str();
                    ui.add(
                        egui::TextEdit::multiline(&mut translated)
                            .desired_width(f32::INFINITY)
                            .frame(false),
                    );
                }
            });
    }

    fn footer(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if self.busy {
                ui.add(egui::Spinner::new());
                ui.label("Translating...");
            } else if !self.usage.is_empty() {
                ui.label(egui::RichText::new(&self.usage).monospace().strong());
            }
        });
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        let Some(form) = self.settings.as_mut() else { return };
        let mut open = true;
        let mut save = false;
        let mut cancel = false;

        egui::Window::new(format!("{} Settings", icons::GEAR))
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                let d = &mut form.draft;
                ui.strong("Hotkeys");
                egui::Grid::new("hotkeys").num_columns(2).spacing([12.0, 6.0]).show(ui, |ui| {
                    ui.label("Translate to Chinese");
                    ui.text_edit_singleline(&mut d.hotkey_to_chinese);
                    ui.end_row();
                    ui.label("Translate to English");
                    ui.text_edit_singleline(&mut d.hotkey_to_english);
                    ui.end_row();
                    ui.label("Generate emoji");
                    ui.text_edit_singleline(&mut d.hotkey_to_emoji);
                    ui.end_row();
                });
                ui.separator();
                ui.strong("API");
                egui::Grid::new("api").num_columns(2).spacing([12.0, 6.0]).show(ui, |ui| {
                    ui.label("API key");
                    ui.add(egui::TextEdit::singleline(&mut d.chat_api_key).password(true));
                    ui.end_row();
                    ui.label("API URL");
                    ui.text_edit_singleline(&mut d.chat_api_url);
                    ui.end_row();
                    ui.label("Model");
                    ui.text_edit_singleline(&mut d.chat_api_model);
                    ui.end_row();
                });
                ui.separator();
                ui.strong("Window & limits");
                egui::Grid::new("limits").num_columns(2).spacing([12.0, 6.0]).show(ui, |ui| {
                    ui.label("Opacity");
                    ui.add(egui::Slider::new(&mut d.window_opacity, 0.2..=1.0));
                    ui.end_row();
                    ui.label("Chinese text threshold");
                    ui.add(egui::DragValue::new(&mut d.chinese_threshold).clamp_range(1..=100_000));
                    ui.end_row();
                    ui.label("Other text threshold");
                    ui.add(egui::DragValue::new(&mut d.english_threshold).clamp_range(1..=100_000));
                    ui.end_row();
                });
                if let Some(err) = &form.error {
                    ui.colored_label(egui::Color32::RED, err);
                }
                ui.horizontal(|ui| {
                    save = ui.button("Save").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if save {
            match check_settings(&form.draft) {
                Ok(()) => match form.draft.save() {
                    Ok(()) => {
                        *self.config.lock() = form.draft.clone();
                        let _ = self.commands.send(Command::ConfigSaved);
                        self.settings = None;
                        return;
                    }
                    Err(e) => {
                        warn!("saving settings failed: {}", e);
                        form.error = Some(format!("could not save: {}", e));
                    }
                },
                Err(e) => form.error = Some(e),
            }
        }
        if cancel || !open {
            self.settings = None;
        }
    }
}

impl eframe::App for TranslationApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(120));
        if !self.fonts_set {
            self.fonts_set = true;
            install_fonts(ctx);
        }
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(ctx, msg);
        }

        // Closing only hides; a running translation keeps going.
        if ctx.input(|i| i.viewport().close_requested()) {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            self.set_visible(ctx, false);
        }
        if self.settings.is_none() && ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.set_visible(ctx, false);
        }

        let frame = egui::Frame::none().fill(self.fill()).inner_margin(10.0);
        egui::TopBottomPanel::top("header")
            .frame(frame)
            .show(ctx, |ui| self.header(ctx, ui));
        egui::TopBottomPanel::bottom("footer")
            .frame(frame)
            .show(ctx, |ui| self.footer(ui));
        egui::CentralPanel::default()
            .frame(frame)
            .show(ctx, |ui| self.body(ui));

        self.settings_window(ctx);
    }

    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }
}

fn install_fonts(ctx: &egui::Context) {
    let mut fonts = egui::FontDefinitions::default();
    egui_phosphor::add_to_fonts(&mut fonts, egui_phosphor::Variant::Regular);

    match CJK_FONTS.iter().find_map(|p| fs::read(p).ok().map(|b| (p, b))) {
        Some((path, bytes)) => {
            fonts.font_data.insert("cjk".to_owned(), egui::FontData::from_owned(bytes));
            for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
                fonts.families.entry(family).or_default().insert(0, "cjk".to_owned());
            }
            info!("loaded CJK font {}", path);
        }
        None => warn!("no CJK font found; Chinese may render as squares"),
    }
    if let Ok(bytes) = fs::read(EMOJI_FONT) {
        fonts.font_data.insert("emoji".to_owned(), egui::FontData::from_owned(bytes));
        fonts
            .families
            .entry(egui::FontFamily::Proportional)
            .or_default()
            .push("emoji".to_owned());
    }
    ctx.set_fonts(fonts);
}

/// Runs the window's event loop on the calling (main) thread until exit.
pub fn run_ui_main_thread(
    rx: Receiver<UiMessage>,
    config: Arc<Mutex<Config>>,
    commands: Sender<Command>,
) -> anyhow::Result<()> {
    info!("UI: starting event loop");
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(TITLE)
            .with_inner_size([500.0, 300.0])
            .with_min_inner_size([320.0, 160.0])
            .with_always_on_top()
            .with_decorations(false)
            .with_transparent(true)
            .with_visible(true),
        ..Default::default()
    };
    let app = TranslationApp::new(rx, config, commands);
    eframe::run_native(
        TITLE,
        native_options,
        Box::new(move |cc| {
            *UI_CTX.lock() = Some(cc.egui_ctx.clone());
            Box::new(app)
        }),
    )
    .map_err(|e| anyhow::anyhow!("UI event loop failed: {}", e))?;
    info!("UI: event loop exited");
    Ok(())
}
