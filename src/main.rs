#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use anyhow::Context;
use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

mod clipboard;
mod config;
mod controller;
mod error;
mod hotkey;
mod logger;
mod text;
mod translator;
mod ui;
mod worker;

use controller::{Command, Controller, Dialogs};

#[cfg(windows)]
mod tray {
    use crate::controller::Command;
    use crossbeam_channel::{Receiver, Sender};
    use std::thread;
    use std::time::Duration;
    use tracing::{error, info};
    use tray_icon as tri;
    use tray_icon::menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu};
    use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

    pub struct TrayHandle {
        #[allow(dead_code)]
        tray: TrayIcon,
        menu_event_rx: Receiver<MenuEvent>,
        tray_event_rx: Receiver<tri::TrayIconEvent>,
        items: Vec<(MenuId, Command)>,
        commands: Sender<Command>,
    }

    impl TrayHandle {
        pub fn new(commands: Sender<Command>) -> anyhow::Result<Self> {
            let to_chinese = MenuItem::new("Translate to Chinese", true, None);
            let to_english = MenuItem::new("Translate to English", true, None);
            let emoji = MenuItem::new("Generate emoji", true, None);
            let show = MenuItem::new("Show window", true, None);
            let settings = MenuItem::new("Settings...", true, None);
            let quit = MenuItem::new("Quit", true, None);

            let translate = Submenu::new("Translate clipboard", true);
            translate.append_items(&[&to_chinese, &to_english, &emoji])?;

            let menu = Menu::new();
            menu.append_items(&[
                &translate,
                &show,
                &settings,
                &PredefinedMenuItem::separator(),
                &quit,
            ])?;

            // 16x16 teal square
            let (w, h) = (16usize, 16usize);
            let rgba: Vec<u8> = std::iter::repeat([0x14, 0xB8, 0xA6, 0xFF])
                .take(w * h)
                .flatten()
                .collect();
            let icon = Icon::from_rgba(rgba, w as u32, h as u32)?;

            let tray = TrayIconBuilder::new()
                .with_tooltip("ClipTranslate")
                .with_menu(Box::new(menu))
                .with_icon(icon)
                .build()?;

            let items = vec![
                (to_chinese.id().clone(), Command::Translate(crate::translator::Mode::ToChinese)),
                (to_english.id().clone(), Command::Translate(crate::translator::Mode::ToEnglish)),
                (emoji.id().clone(), Command::Translate(crate::translator::Mode::Emoji)),
                (show.id().clone(), Command::ShowWindow),
                (settings.id().clone(), Command::OpenSettings),
                (quit.id().clone(), Command::Quit),
            ];

            Ok(Self {
                tray,
                menu_event_rx: MenuEvent::receiver().clone(),
                tray_event_rx: tri::TrayIconEvent::receiver().clone(),
                items,
                commands,
            })
        }

        pub fn pump(&self) {
            while let Ok(event) = self.menu_event_rx.try_recv() {
                if let Some((_, cmd)) = self.items.iter().find(|(id, _)| *id == event.id) {
                    info!("Tray: {:?}", cmd);
                    let _ = self.commands.send(*cmd);
                }
            }
            while let Ok(event) = self.tray_event_rx.try_recv() {
                if let tri::ClickType::Double = event.click_type {
                    info!("Tray: double-click, toggling window");
                    let _ = self.commands.send(Command::ToggleWindow);
                }
            }
        }
    }

    /// The tray and its Win32 message pump live on their own thread.
    pub fn spawn(commands: Sender<Command>) {
        let spawned = thread::Builder::new().name("tray".into()).spawn(move || {
            use windows::Win32::Foundation::HWND;
            use windows::Win32::UI::WindowsAndMessaging as wm;

            let tray = match TrayHandle::new(commands) {
                Ok(t) => t,
                Err(e) => {
                    error!("Tray failed: {}", e);
                    crate::toast("ClipTranslate", &format!("Tray failed: {}", e));
                    return;
                }
            };
            info!("Tray created");
            loop {
                unsafe {
                    let mut msg = wm::MSG::default();
                    let all = HWND(std::ptr::null_mut());
                    while wm::PeekMessageW(&mut msg, all, 0, 0, wm::PM_REMOVE).into() {
                        let _ = wm::TranslateMessage(&msg);
                        wm::DispatchMessageW(&msg);
                    }
                }
                tray.pump();
                thread::sleep(Duration::from_millis(25));
            }
        });
        if let Err(e) = spawned {
            error!("failed to spawn tray thread: {}", e);
        }
    }
}

#[cfg(not(windows))]
mod tray {
    use crate::controller::Command;
    use crossbeam_channel::Sender;

    pub fn spawn(_commands: Sender<Command>) {
        tracing::info!("no tray icon on this platform");
    }
}

pub(crate) fn toast(title: &str, body: &str) {
    #[cfg(windows)]
    {
        use winrt_notification::Toast;
        if let Err(e) = Toast::new(Toast::POWERSHELL_APP_ID)
            .title(title)
            .text1(body)
            .show()
        {
            tracing::warn!("toast failed: {}", e);
        }
    }
    #[cfg(not(windows))]
    {
        info!("{}: {}", title, body);
    }
}

#[cfg(windows)]
fn ask_yes_no(title: &str, text: &str) -> bool {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging as wm;
    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }
    let (text, title) = (wide(text), wide(title));
    let answer = unsafe {
        wm::MessageBoxW(
            HWND(std::ptr::null_mut()),
            windows::core::PCWSTR(text.as_ptr()),
            windows::core::PCWSTR(title.as_ptr()),
            wm::MB_YESNO
                | wm::MB_ICONWARNING
                | wm::MB_DEFBUTTON2
                | wm::MB_TOPMOST
                | wm::MB_SETFOREGROUND,
        )
    };
    answer == wm::IDYES
}

#[cfg(not(windows))]
fn ask_yes_no(title: &str, _text: &str) -> bool {
    tracing::warn!("no dialog backend, declining `{}`", title);
    false
}

struct NativeDialogs;

impl Dialogs for NativeDialogs {
    fn confirm(&self, title: &str, message: &str, detail: &str) -> bool {
        ask_yes_no(title, &format!("{}\n\n{}", message, detail))
    }

    fn notify(&self, title: &str, body: &str) {
        toast(title, body);
    }
}

fn run() -> anyhow::Result<()> {
    logger::init()?;
    info!("App starting");

    let cfg = config::Config::load().context("cannot prepare the config directory")?;
    info!("Config loaded");
    let needs_key = cfg.chat_api_key.trim().is_empty();
    let bindings = hotkey::Bindings::from_config(&cfg);
    let cfg = Arc::new(Mutex::new(cfg));

    let (cmd_tx, cmd_rx) = unbounded::<Command>();
    let (event_tx, event_rx) = unbounded();
    let (rebind_tx, rebind_rx) = unbounded();
    let (view, ui_rx) = ui::channel();

    hotkey::spawn_poller(bindings, rebind_rx, cmd_tx.clone())
        .context("failed to start the hotkey poller")?;
    tray::spawn(cmd_tx.clone());

    let controller = Controller::new(
        Arc::clone(&cfg),
        Box::new(clipboard::SystemClipboard),
        Box::new(NativeDialogs),
        Box::new(view),
        controller::default_factory(),
        event_tx,
    )
    .with_rebind(rebind_tx);
    thread::Builder::new()
        .name("controller".into())
        .spawn(move || {
            controller.run(cmd_rx, event_rx);
            info!("Quit");
            std::process::exit(0);
        })
        .context("failed to start the controller")?;

    if needs_key {
        toast("ClipTranslate", "Set the API key in Settings.");
        let _ = cmd_tx.send(Command::OpenSettings);
    } else {
        toast("ClipTranslate", "Ready. Copy text and press a hotkey to translate.");
    }

    // Blocks until the window's event loop ends.
    ui::run_ui_main_thread(ui_rx, cfg, cmd_tx)
}

fn main() {
    if let Err(e) = run() {
        error!("startup failed: {:#}", e);
        eprintln!("ClipTranslate failed to start: {:#}", e);
        toast("ClipTranslate", &format!("Startup failed: {}", e));
        std::process::exit(1);
    }
}
