use crate::config::Config;
use crate::error::ClipboardError;
use crate::hotkey::Bindings;
use crate::text;
use crate::translator::{Mode, Translate, Translation, Translator};
use crate::worker::{self, WorkerEvent};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything the tray, the hotkey poller and the window can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Translate(Mode),
    ShowWindow,
    ToggleWindow,
    OpenSettings,
    ConfigSaved,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Validating,
    AwaitingConfirmation,
    Translating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Started,
    Busy,
    NoText,
    Declined,
    Failed,
}

pub trait ClipboardSource {
    fn read_text(&self) -> Result<String, ClipboardError>;
}

/// Native dialogs: a blocking yes/no question and a passive notification.
pub trait Dialogs {
    fn confirm(&self, title: &str, message: &str, detail: &str) -> bool;
    fn notify(&self, title: &str, body: &str);
}

/// The result window as seen from the controller.
pub trait View {
    fn loading(&self, original: &str, mode: Mode);
    fn progress(&self, partial: &str);
    fn finished(&self, translation: &Translation);
    fn failed(&self, message: &str);
    fn show(&self);
    fn toggle(&self);
    fn open_settings(&self);
}

pub type TranslatorFactory = Box<dyn Fn(Mode, &Config) -> Box<dyn Translate> + Send>;

pub fn default_factory() -> TranslatorFactory {
    Box::new(|mode, cfg: &Config| -> Box<dyn Translate> {
        Box::new(Translator::for_mode(mode, cfg))
    })
}

pub struct Controller {
    config: Arc<Mutex<Config>>,
    clipboard: Box<dyn ClipboardSource + Send>,
    dialogs: Box<dyn Dialogs + Send>,
    view: Box<dyn View + Send>,
    factory: TranslatorFactory,
    events: Sender<WorkerEvent>,
    rebind: Option<Sender<Bindings>>,
    state: State,
}

impl Controller {
    pub fn new(
        config: Arc<Mutex<Config>>,
        clipboard: Box<dyn ClipboardSource + Send>,
        dialogs: Box<dyn Dialogs + Send>,
        view: Box<dyn View + Send>,
        factory: TranslatorFactory,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            config,
            clipboard,
            dialogs,
            view,
            factory,
            events,
            rebind: None,
            state: State::Idle,
        }
    }

    /// Where rebuilt hotkey tables go after the settings are saved.
    pub fn with_rebind(mut self, rebind: Sender<Bindings>) -> Self {
        self.rebind = Some(rebind);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Serves commands and worker events until `Quit` arrives or every
    /// command sender is gone.
    pub fn run(mut self, commands: Receiver<Command>, events: Receiver<WorkerEvent>) {
        info!("controller started");
        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Quit) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(events) -> ev => {
                    if let Ok(ev) = ev {
                        self.handle_event(ev);
                    }
                }
            }
        }
        info!("controller stopped");
    }

    pub fn handle_command(&mut self, cmd: Command) {
        debug!("command {:?} while {:?}", cmd, self.state());
        match cmd {
            Command::Translate(mode) => {
                self.trigger(mode);
            }
            Command::ShowWindow => self.view.show(),
            Command::ToggleWindow => self.view.toggle(),
            Command::OpenSettings => self.view.open_settings(),
            Command::ConfigSaved => self.apply_settings(),
            Command::Quit => {}
        }
    }

    /// Idle -> Validating -> (AwaitingConfirmation) -> Translating. Requests
    /// arriving while a translation runs are dropped.
    pub fn trigger(&mut self, mode: Mode) -> Outcome {
        if self.state == State::Translating {
            info!("translation in progress, ignoring {} request", mode);
            return Outcome::Busy;
        }
        info!("clipboard {} request", mode);
        self.state = State::Validating;

        let text = match self.clipboard.read_text() {
            Ok(raw) => text::clean(&raw),
            Err(e) => {
                warn!("{}", e);
                self.state = State::Idle;
                return Outcome::NoText;
            }
        };
        if text.is_empty() {
            info!("clipboard has no text");
            self.state = State::Idle;
            return Outcome::NoText;
        }
        debug!("clipboard text: {}", text::preview(&text, 80));

        // Request-scoped snapshot; settings edits during the request don't leak in.
        let cfg = self.config.lock().clone();

        if mode.is_translation() {
            if let Some(check) = text::check_length(&text, &cfg) {
                info!(
                    "text is {} chars, threshold {}, asking for confirmation",
                    check.chars, check.threshold
                );
                self.state = State::AwaitingConfirmation;
                let accepted = self.dialogs.confirm(
                    "ClipTranslate",
                    &check.message(),
                    "Translating long text may:\n1. consume many tokens;\n\
                     2. hit the model's context limit.",
                );
                if !accepted {
                    info!("user declined long text");
                    self.state = State::Idle;
                    return Outcome::Declined;
                }
            }
        }

        self.start(text, mode, &cfg)
    }

    fn start(&mut self, text: String, mode: Mode, cfg: &Config) -> Outcome {
        let translator = (self.factory)(mode, cfg);
        self.view.loading(&text, mode);
        self.state = State::Translating;
        match worker::spawn(translator, text, self.events.clone()) {
            Ok(_) => Outcome::Started,
            Err(e) => {
                error!("failed to start worker: {}", e);
                self.view.failed(&format!("failed to start worker: {}", e));
                self.state = State::Idle;
                Outcome::Failed
            }
        }
    }

    pub fn handle_event(&mut self, ev: WorkerEvent) {
        if self.state != State::Translating {
            warn!("worker event while {:?}, ignored", self.state);
            return;
        }
        if ev.is_terminal() {
            self.state = State::Idle;
        }
        match ev {
            WorkerEvent::Progress(partial) => self.view.progress(&partial),
            WorkerEvent::Finished(translation) => self.view.finished(&translation),
            WorkerEvent::Failed(message) => self.view.failed(&message),
        }
    }

    fn apply_settings(&mut self) {
        let cfg = self.config.lock().clone();
        if let Some(rebind) = &self.rebind {
            if rebind.send(Bindings::from_config(&cfg)).is_err() {
                warn!("hotkey poller is gone; new hotkeys not applied");
            }
        }
        info!(
            "settings applied: chinese={}, english={}, emoji={}",
            cfg.hotkey_to_chinese, cfg.hotkey_to_english, cfg.hotkey_to_emoji
        );
        self.dialogs.notify(
            "Settings updated",
            &format!(
                "Hotkeys: Chinese={}, English={}, Emoji={}",
                cfg.hotkey_to_chinese, cfg.hotkey_to_english, cfg.hotkey_to_emoji
            ),
        );
    }
}
