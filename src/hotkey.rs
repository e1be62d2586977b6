use crate::config::Config;
use crate::controller::Command;
use crate::error::HotkeyError;
use crate::translator::Mode;
use crossbeam_channel::{Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const COOLDOWN: Duration = Duration::from_millis(500);

/// Win32 virtual-key codes for the names users can type in Settings.
fn virtual_key(name: &str) -> Option<u16> {
    let vk = match name {
        "ctrl" | "control" => 0x11,
        "alt" | "menu" => 0x12,
        "shift" => 0x10,
        "win" | "windows" | "super" => 0x5B,
        "space" => 0x20,
        "enter" | "return" => 0x0D,
        "esc" | "escape" => 0x1B,
        "tab" => 0x09,
        "backspace" => 0x08,
        "capslock" | "caps lock" => 0x14,
        "insert" => 0x2D,
        "delete" | "del" => 0x2E,
        "home" => 0x24,
        "end" => 0x23,
        "pageup" | "page up" => 0x21,
        "pagedown" | "page down" => 0x22,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "pause" => 0x13,
        "printscreen" | "print screen" => 0x2C,
        "`" => 0xC0,
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u16,
                (Some('f'), Some(_)) => {
                    let n: u16 = name[1..].parse().ok()?;
                    if (1..=24).contains(&n) {
                        0x70 + n - 1
                    } else {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    };
    Some(vk)
}

/// Keys that must all be down at once, e.g. `ctrl+shift+t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord(Vec<u16>);

impl Chord {
    pub fn parse(name: &str) -> Result<Self, HotkeyError> {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(HotkeyError::Empty);
        }
        let keys = name
            .split('+')
            .map(|part| {
                let part = part.trim();
                virtual_key(part).ok_or_else(|| HotkeyError::UnknownKey(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(keys))
    }

    fn is_down(&self, keys: &dyn KeyState) -> Result<bool, HotkeyError> {
        for vk in &self.0 {
            if !keys.is_down(*vk)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// OS key-state query.
pub trait KeyState {
    fn is_down(&self, vk: u16) -> Result<bool, HotkeyError>;
}

pub struct SystemKeys;

#[cfg(windows)]
impl KeyState for SystemKeys {
    fn is_down(&self, vk: u16) -> Result<bool, HotkeyError> {
        use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
        let state = unsafe { GetAsyncKeyState(vk as i32) };
        Ok(state as u16 & 0x8000 != 0)
    }
}

#[cfg(not(windows))]
impl KeyState for SystemKeys {
    fn is_down(&self, _vk: u16) -> Result<bool, HotkeyError> {
        Err(HotkeyError::Unsupported)
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub action: Mode,
    chord: Chord,
    last_fired: Option<Instant>,
    warned: bool,
}

impl Binding {
    pub fn new(name: &str, action: Mode) -> Result<Self, HotkeyError> {
        Ok(Self {
            name: name.trim().to_string(),
            action,
            chord: Chord::parse(name)?,
            last_fired: None,
            warned: false,
        })
    }
}

/// The bindings table the poller owns. Cooldown is tracked per binding.
#[derive(Debug, Clone)]
pub struct Bindings {
    entries: Vec<Binding>,
    cooldown: Duration,
}

impl Bindings {
    pub fn new(entries: Vec<Binding>, cooldown: Duration) -> Self {
        Self { entries, cooldown }
    }

    /// Unparsable hotkeys are logged and left out.
    pub fn from_config(cfg: &Config) -> Self {
        let mut entries = Vec::new();
        for (name, action) in [
            (&cfg.hotkey_to_chinese, Mode::ToChinese),
            (&cfg.hotkey_to_english, Mode::ToEnglish),
            (&cfg.hotkey_to_emoji, Mode::Emoji),
        ] {
            match Binding::new(name, action) {
                Ok(b) => entries.push(b),
                Err(e) => warn!("hotkey `{}` for {} ignored: {}", name, action, e),
            }
        }
        Self::new(entries, COOLDOWN)
    }

    pub fn entries(&self) -> &[Binding] {
        &self.entries
    }

    /// One poll tick. Returns the actions that fired, in table order.
    pub fn poll(&mut self, keys: &dyn KeyState, now: Instant) -> Vec<Mode> {
        let cooldown = self.cooldown;
        let mut fired = Vec::new();
        for b in &mut self.entries {
            match b.chord.is_down(keys) {
                Ok(true) => {
                    let cooled = b
                        .last_fired
                        .map_or(true, |t| now.saturating_duration_since(t) >= cooldown);
                    if cooled {
                        debug!("hotkey {} pressed -> {}", b.name, b.action);
                        b.last_fired = Some(now);
                        fired.push(b.action);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    if b.warned {
                        debug!("hotkey {} check skipped: {}", b.name, e);
                    } else {
                        warn!("hotkey {} check skipped: {}", b.name, e);
                        b.warned = true;
                    }
                }
            }
        }
        fired
    }
}

/// Polls on a fixed tick until the command channel closes. A new table sent on
/// `rebind` replaces the current one.
pub fn spawn_poller(
    mut bindings: Bindings,
    rebind: Receiver<Bindings>,
    commands: Sender<Command>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("hotkey".into())
        .spawn(move || {
            info!(
                "hotkey poller started: {}",
                bindings
                    .entries()
                    .iter()
                    .map(|b| format!("{}={}", b.name, b.action))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let keys = SystemKeys;
            loop {
                while let Ok(next) = rebind.try_recv() {
                    info!("hotkey bindings replaced");
                    bindings = next;
                }
                for mode in bindings.poll(&keys, Instant::now()) {
                    if commands.send(Command::Translate(mode)).is_err() {
                        info!("hotkey poller stopping");
                        return;
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeKeys {
        down: RefCell<HashSet<u16>>,
        broken: bool,
    }

    impl FakeKeys {
        fn press(&self, vk: u16) {
            self.down.borrow_mut().insert(vk);
        }
        fn release_all(&self) {
            self.down.borrow_mut().clear();
        }
    }

    impl KeyState for FakeKeys {
        fn is_down(&self, vk: u16) -> Result<bool, HotkeyError> {
            if self.broken {
                return Err(HotkeyError::Unsupported);
            }
            Ok(self.down.borrow().contains(&vk))
        }
    }

    const F2: u16 = 0x71;
    const F4: u16 = 0x73;

    #[test]
    fn parses_key_names() {
        assert_eq!(Chord::parse("f2"), Ok(Chord(vec![0x71])));
        assert_eq!(Chord::parse("F12"), Ok(Chord(vec![0x7B])));
        assert_eq!(Chord::parse("ctrl+shift+t"), Ok(Chord(vec![0x11, 0x10, 0x54])));
        assert_eq!(Chord::parse("alt + 1"), Ok(Chord(vec![0x12, 0x31])));
        assert_eq!(Chord::parse(""), Err(HotkeyError::Empty));
        assert_eq!(Chord::parse("f25"), Err(HotkeyError::UnknownKey("f25".into())));
        assert_eq!(Chord::parse("ctrl+nope"), Err(HotkeyError::UnknownKey("nope".into())));
    }

    #[test]
    fn fires_once_per_cooldown() {
        let keys = FakeKeys::default();
        let mut table = Bindings::new(vec![Binding::new("f2", Mode::ToChinese).unwrap()], COOLDOWN);
        let t0 = Instant::now();

        assert!(table.poll(&keys, t0).is_empty());
        keys.press(F2);
        assert_eq!(table.poll(&keys, t0), vec![Mode::ToChinese]);
        assert!(table.poll(&keys, t0 + Duration::from_millis(100)).is_empty());
        assert!(table.poll(&keys, t0 + Duration::from_millis(499)).is_empty());
        assert_eq!(table.poll(&keys, t0 + COOLDOWN), vec![Mode::ToChinese]);
    }

    #[test]
    fn cooldown_is_per_binding() {
        let keys = FakeKeys::default();
        let mut table = Bindings::new(
            vec![
                Binding::new("f2", Mode::ToChinese).unwrap(),
                Binding::new("f4", Mode::ToEnglish).unwrap(),
            ],
            COOLDOWN,
        );
        let t0 = Instant::now();
        keys.press(F2);
        assert_eq!(table.poll(&keys, t0), vec![Mode::ToChinese]);

        keys.release_all();
        keys.press(F4);
        assert_eq!(table.poll(&keys, t0 + Duration::from_millis(100)), vec![Mode::ToEnglish]);
    }

    #[test]
    fn chord_needs_every_key() {
        let keys = FakeKeys::default();
        let binding = Binding::new("ctrl+f2", Mode::Emoji).unwrap();
        let mut table = Bindings::new(vec![binding], COOLDOWN);
        keys.press(F2);
        assert!(table.poll(&keys, Instant::now()).is_empty());
        keys.press(0x11);
        assert_eq!(table.poll(&keys, Instant::now()), vec![Mode::Emoji]);
    }

    #[test]
    fn failing_query_skips_without_firing() {
        let keys = FakeKeys {
            broken: true,
            ..Default::default()
        };
        let mut table = Bindings::from_config(&Config::default());
        for i in 0..3 {
            assert!(table.poll(&keys, Instant::now() + Duration::from_secs(i)).is_empty());
        }
        assert!(table.entries().iter().all(|b| b.warned));
    }

    #[test]
    fn from_config_skips_bad_names() {
        let cfg = Config {
            hotkey_to_english: "hyper+q".into(),
            ..Config::default()
        };
        let table = Bindings::from_config(&cfg);
        let actions: Vec<Mode> = table.entries().iter().map(|b| b.action).collect();
        assert_eq!(actions, vec![Mode::ToChinese, Mode::Emoji]);
    }
}
